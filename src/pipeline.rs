use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage};
use tracing::{info, instrument, warn};

use crate::corners::order_corners;
use crate::detection::{detect_card, DetectionConfig};
use crate::error::{DeskewError, Result};
use crate::geometry::{resolve_perspective, OrderedCorners};
use crate::io::{derive_output_path, load_image, write_image, OutputFormat};
use crate::region::{select_region, CropRegion};
use crate::transform::{warp_perspective, Background};

/// What to do when no card outline is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoCardPolicy {
    /// Surface [`DeskewError::NoCardFound`] to the caller.
    #[default]
    Fail,
    /// Hand back the input path untouched; nothing is written.
    ReturnOriginal,
}

#[derive(Debug, Clone, Default)]
pub struct DeskewConfig {
    pub region: CropRegion,
    pub detection: DetectionConfig,
    pub background: Background,
    pub format: OutputFormat,
    pub no_card: NoCardPolicy,
}

/// A flattened card plus the corners it was cut from (in cropped-image coordinates).
#[derive(Debug, Clone)]
pub struct Deskewed {
    pub image: RgbaImage,
    pub corners: OrderedCorners,
}

/// Crop, detect, order, resolve and warp an in-memory image.
#[instrument(skip(image, config), fields(width = image.width(), height = image.height()))]
pub fn deskew_image(image: DynamicImage, config: &DeskewConfig) -> Result<Deskewed> {
    let cropped = select_region(image, &config.region)?;
    let quad = detect_card(&cropped, &config.detection)?;
    let corners = order_corners(&quad)?;
    let transform = resolve_perspective(&corners)?;
    let warped = warp_perspective(&cropped, &transform, config.background)?;

    info!(
        width = warped.width(),
        height = warped.height(),
        ?corners,
        "card deskewed"
    );
    Ok(Deskewed {
        image: warped,
        corners,
    })
}

/// Deskew the card photographed in `input` and write the result.
///
/// The output goes to `output` when given, otherwise beside the input as
/// `<stem>_deskewed.<ext>`. Nothing is written unless every stage succeeds.
#[instrument(skip(input, config), fields(input = %input.display()))]
pub fn deskew_file(
    input: &Path,
    output: Option<&Path>,
    config: &DeskewConfig,
) -> Result<PathBuf> {
    let image = load_image(input)?;

    let deskewed = match deskew_image(image, config) {
        Ok(deskewed) => deskewed,
        Err(DeskewError::NoCardFound) if config.no_card == NoCardPolicy::ReturnOriginal => {
            warn!("no card found, returning original image");
            return Ok(input.to_path_buf());
        }
        Err(err) => return Err(err),
    };

    let target = match output {
        Some(path) => path.to_path_buf(),
        None => derive_output_path(input, config.format),
    };
    write_image(&deskewed.image, &target, config.format)
}
