use image::DynamicImage;
use tracing::{debug, instrument};

use crate::error::{DeskewError, Result};

/// Optional crop applied before detection. Each field is independent: a
/// missing `x`/`y` means 0, a missing `width`/`height` means "to the image edge".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropRegion {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// A pixel rectangle guaranteed to lie inside its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            width: Some(width),
            height: Some(height),
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::default()
    }

    /// Intersect the requested rectangle with `[0, image_width) x [0, image_height)`.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Result<PixelRect> {
        let (x, width) = clamp_axis(self.x, self.width, image_width);
        let (y, height) = clamp_axis(self.y, self.height, image_height);

        if width == 0 || height == 0 {
            return Err(DeskewError::InvalidRegion {
                image_width,
                image_height,
            });
        }

        Ok(PixelRect {
            x,
            y,
            width,
            height,
        })
    }
}

/// One axis of the intersection: returns (start, length), length 0 if empty.
fn clamp_axis(start: Option<i64>, length: Option<i64>, extent: u32) -> (u32, u32) {
    let extent = extent as i64;
    let start = start.unwrap_or(0);
    let end = match length {
        Some(len) => start.saturating_add(len),
        None => extent,
    };

    let lo = start.clamp(0, extent);
    let hi = end.clamp(0, extent);
    if hi <= lo {
        (lo as u32, 0)
    } else {
        (lo as u32, (hi - lo) as u32)
    }
}

/// Crop `image` to `region`, or hand it back untouched when no crop is requested.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn select_region(image: DynamicImage, region: &CropRegion) -> Result<DynamicImage> {
    if region.is_unset() {
        return Ok(image);
    }

    let rect = region.clamp_to(image.width(), image.height())?;
    if rect.x == 0 && rect.y == 0 && rect.width == image.width() && rect.height == image.height()
    {
        return Ok(image);
    }

    debug!(
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        "cropping to region"
    );
    Ok(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
}
