use std::path::PathBuf;

use thiserror::Error;

/// Every way a deskew call can fail.
///
/// Only [`DeskewError::NoCardFound`] is expected in normal operation; the rest
/// mean the input or the environment is broken.
#[derive(Debug, Error)]
pub enum DeskewError {
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image {path} has empty dimensions ({width}x{height})")]
    EmptyImage {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    #[error("crop region does not intersect the {image_width}x{image_height} image")]
    InvalidRegion { image_width: u32, image_height: u32 },

    #[error("no card boundary found")]
    NoCardFound,

    #[error("corner ordering is ambiguous: {0}")]
    DegenerateQuadrilateral(String),

    #[error("perspective transform is singular: {0}")]
    SingularTransform(String),

    #[error("failed to encode output image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeskewError {
    /// True when the caller should fall back (e.g. show the original photo)
    /// rather than report a hard failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeskewError::NoCardFound)
    }
}

pub type Result<T> = std::result::Result<T, DeskewError>;
