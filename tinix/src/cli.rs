use std::path::PathBuf;

use clap::Parser;

use crate::config::DISK_IMAGE_NAME;

/// A teaching-grade single-machine OS simulator
#[derive(Parser)]
pub struct Cli {
    /// Backing disk image path
    #[arg(long, default_value = DISK_IMAGE_NAME)]
    pub disk: PathBuf,
}
