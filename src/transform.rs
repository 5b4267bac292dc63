use image::{DynamicImage, Rgba, RgbaImage};
use tracing::{debug, instrument};

use crate::error::{DeskewError, Result};
use crate::geometry::{transform_point, PerspectiveTransform};

/// Fill for output pixels whose source falls outside the input image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Background {
    #[default]
    White,
    Black,
    Transparent,
}

impl Background {
    pub fn pixel(self) -> Rgba<u8> {
        match self {
            Background::White => Rgba([255, 255, 255, 255]),
            Background::Black => Rgba([0, 0, 0, 255]),
            Background::Transparent => Rgba([0, 0, 0, 0]),
        }
    }
}

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels()
        .map(|pixel| {
            let alpha = pixel[3] as f64 / 255.0;
            [
                pixel[0] as f64 * alpha,
                pixel[1] as f64 * alpha,
                pixel[2] as f64 * alpha,
                pixel[3] as f64,
            ]
        })
        .collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3];
    if alpha < 0.5 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha / 255.0;
    let channel = |v: f64| (v / alpha_norm).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(premultiplied[0]),
        channel(premultiplied[1]),
        channel(premultiplied[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Bilinear interpolation, neighbours clamped to the image edge.
fn bilinear_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    x: f64,
    y: f64,
) -> [f64; 4] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let get_pixel = |px: i64, py: i64| -> [f64; 4] {
        let px = px.clamp(0, width as i64 - 1) as usize;
        let py = py.clamp(0, height as i64 - 1) as usize;
        premultiplied[py * width as usize + px]
    };

    let p00 = get_pixel(x0, y0);
    let p10 = get_pixel(x0 + 1, y0);
    let p01 = get_pixel(x0, y0 + 1);
    let p11 = get_pixel(x0 + 1, y0 + 1);

    let mut result = [0.0; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - x_frac) + p10[c] * x_frac;
        let bottom = p01[c] * (1.0 - x_frac) + p11[c] * x_frac;
        result[c] = top * (1.0 - y_frac) + bottom * y_frac;
    }

    result
}

/// Resample `image` into a `transform.width` x `transform.height` buffer.
///
/// Every output pixel is pulled back through the inverse homography and
/// sampled bilinearly. Sources outside the image (beyond half a pixel) get
/// `background`.
#[instrument(skip(image, transform), fields(width = transform.width, height = transform.height))]
pub fn warp_perspective(
    image: &DynamicImage,
    transform: &PerspectiveTransform,
    background: Background,
) -> Result<RgbaImage> {
    let inverse = transform.inverse().ok_or_else(|| {
        DeskewError::SingularTransform("cannot invert transform for resampling".into())
    })?;

    let rgba = image.to_rgba8();
    let (src_width, src_height) = rgba.dimensions();
    let premultiplied = premultiply_alpha(&rgba);
    let fill = background.pixel();

    let (min_x, min_y) = (-0.5, -0.5);
    let (max_x, max_y) = (src_width as f64 - 0.5, src_height as f64 - 0.5);

    let mut output = RgbaImage::new(transform.width, transform.height);
    let mut outside = 0usize;

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (src_x, src_y) = transform_point(&inverse, out_x as f64, out_y as f64);

        let inside = src_x.is_finite()
            && src_y.is_finite()
            && src_x >= min_x
            && src_x <= max_x
            && src_y >= min_y
            && src_y <= max_y;

        *pixel = if inside {
            let sample = bilinear_interpolate(&premultiplied, src_width, src_height, src_x, src_y);
            unpremultiply_alpha(sample)
        } else {
            outside += 1;
            fill
        };
    }

    debug!(outside, "warp complete");
    Ok(output)
}
