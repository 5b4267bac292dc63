use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use card_deskew::{deskew_file, Cli, DeskewError};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info,card_deskew=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config();
    tracing::debug!(?config, "starting");

    match deskew_file(&cli.input, cli.output.as_deref(), &config) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(err @ DeskewError::NoCardFound) => Err(err).with_context(|| {
            format!(
                "No card found in {:?} (use --fallback-original to keep the photo)",
                cli.input
            )
        }),
        Err(err) => Err(err).with_context(|| format!("Failed to deskew {:?}", cli.input)),
    }
}
