use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::detection::DetectionConfig;
use crate::io::OutputFormat;
use crate::pipeline::{DeskewConfig, NoCardPolicy};
use crate::region::CropRegion;
use crate::transform::Background;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Jpeg,
    Png,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundArg {
    White,
    Black,
    Transparent,
}

impl From<BackgroundArg> for Background {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::White => Background::White,
            BackgroundArg::Black => Background::Black,
            BackgroundArg::Transparent => Background::Transparent,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "card-deskew")]
#[command(version, about = "Find a photographed card and flatten it to an upright rectangle")]
pub struct Cli {
    /// Input image path
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output path [default: <input>_deskewed.<ext>]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Left edge of the search region
    #[arg(long, allow_negative_numbers = true)]
    pub x: Option<i64>,

    /// Top edge of the search region
    #[arg(long, allow_negative_numbers = true)]
    pub y: Option<i64>,

    /// Width of the search region [default: to the right edge]
    #[arg(long, allow_negative_numbers = true)]
    pub width: Option<i64>,

    /// Height of the search region [default: to the bottom edge]
    #[arg(long, allow_negative_numbers = true)]
    pub height: Option<i64>,

    /// Output encoding
    #[arg(short, long, value_enum, default_value = "jpeg")]
    pub format: FormatArg,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value = "95", value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    /// Fill for pixels outside the source image
    #[arg(long, value_enum, default_value = "white")]
    pub background: BackgroundArg,

    /// Minimum card area as a fraction of the (cropped) image
    #[arg(long, default_value = "0.1", value_parser = parse_fraction)]
    pub min_area: f64,

    /// Print the input path instead of failing when no card is found
    #[arg(long)]
    pub fallback_original: bool,

    /// Show detection details
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn region(&self) -> CropRegion {
        CropRegion {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match self.format {
            FormatArg::Jpeg => OutputFormat::Jpeg {
                quality: self.quality,
            },
            FormatArg::Png => OutputFormat::Png,
        }
    }

    pub fn config(&self) -> DeskewConfig {
        DeskewConfig {
            region: self.region(),
            detection: DetectionConfig {
                min_area_fraction: self.min_area,
                ..Default::default()
            },
            background: self.background.into(),
            format: self.output_format(),
            no_card: if self.fallback_original {
                NoCardPolicy::ReturnOriginal
            } else {
                NoCardPolicy::Fail
            },
        }
    }
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("Invalid fraction '{}'", s))?;

    if !(0.0..=1.0).contains(&value) {
        return Err("Fraction must be between 0 and 1".to_string());
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_fields_are_independent() {
        let cli = Cli::parse_from(["card-deskew", "card.jpg", "--x", "-10", "--height", "300"]);
        assert_eq!(
            cli.region(),
            CropRegion {
                x: Some(-10),
                y: None,
                width: None,
                height: Some(300),
            }
        );
    }

    #[test]
    fn test_defaults_match_library() {
        let cli = Cli::parse_from(["card-deskew", "card.jpg"]);
        let config = cli.config();
        assert!(config.region.is_unset());
        assert_eq!(config.format, OutputFormat::default());
        assert_eq!(config.background, Background::White);
        assert_eq!(config.no_card, NoCardPolicy::Fail);
    }

    #[test]
    fn test_png_and_fallback_flags() {
        let cli = Cli::parse_from([
            "card-deskew",
            "card.jpg",
            "--format",
            "png",
            "--background",
            "transparent",
            "--fallback-original",
        ]);
        let config = cli.config();
        assert_eq!(config.format, OutputFormat::Png);
        assert_eq!(config.background, Background::Transparent);
        assert_eq!(config.no_card, NoCardPolicy::ReturnOriginal);
    }

    #[test]
    fn test_black_background_flag() {
        let cli = Cli::parse_from(["card-deskew", "card.jpg", "--background", "black"]);
        assert_eq!(cli.background, BackgroundArg::Black);
        assert_eq!(cli.config().background, Background::Black);
        assert!(Cli::try_parse_from(["card-deskew", "card.jpg", "--background", "grey"]).is_err());
    }

    #[test]
    fn test_fraction_out_of_range_rejected() {
        assert!(parse_fraction("1.5").is_err());
        assert!(parse_fraction("abc").is_err());
        assert_eq!(parse_fraction("0.25"), Ok(0.25));
    }
}
