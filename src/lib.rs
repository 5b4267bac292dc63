pub mod cli;
pub mod corners;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod io;
pub mod pipeline;
pub mod region;
pub mod transform;

pub use cli::Cli;
pub use corners::order_corners;
pub use detection::{detect_card, DetectionConfig};
pub use error::{DeskewError, Result};
pub use geometry::{resolve_perspective, OrderedCorners, PerspectiveTransform, Point, Quadrilateral};
pub use io::{derive_output_path, load_image, write_image, OutputFormat};
pub use pipeline::{deskew_file, deskew_image, DeskewConfig, Deskewed, NoCardPolicy};
pub use region::{select_region, CropRegion};
pub use transform::{warp_perspective, Background};
