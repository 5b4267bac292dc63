use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use tracing::{debug, info, instrument};

use crate::error::{DeskewError, Result};

/// Suffix appended to the input file stem for the derived output path.
pub const OUTPUT_SUFFIX: &str = "_deskewed";

/// Encoding for the flattened card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg { quality: 95 }
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Decode the image at `path`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let decode_error = |source| DeskewError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .map_err(|err| decode_error(image::ImageError::IoError(err)))?
        .with_guessed_format()
        .map_err(|err| decode_error(image::ImageError::IoError(err)))?
        .decode()
        .map_err(decode_error)?;

    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(DeskewError::EmptyImage {
            path: path.to_path_buf(),
            width,
            height,
        });
    }

    debug!(width, height, color = ?image.color(), "image decoded");
    Ok(image)
}

/// `<dir>/<stem>_deskewed.<ext>` next to the input.
pub fn derive_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}{}.{}", stem, OUTPUT_SUFFIX, format.extension()))
}

/// Encode into memory. JPEG has no alpha channel, so it is dropped first.
pub fn encode_image(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match format {
        OutputFormat::Jpeg { quality } => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder).map_err(DeskewError::Encode)?;
        }
        OutputFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(DeskewError::Encode)?;
        }
    }
    Ok(bytes)
}

/// Encode `image` and write it to `path`, returning the path written.
///
/// Encoding finishes before the file is created, so a failure never leaves
/// a truncated file behind.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn write_image(image: &RgbaImage, path: &Path, format: OutputFormat) -> Result<PathBuf> {
    let bytes = encode_image(image, format)?;

    std::fs::write(path, &bytes).map_err(|source| DeskewError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), bytes = bytes.len(), "output written");
    Ok(path.to_path_buf())
}
