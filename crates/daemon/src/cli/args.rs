pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shoal")]
#[command(about = "A Scuttlebutt peer that replicates the feeds you follow")]
pub struct Args {
    /// Path to the shoal config directory (defaults to ~/.shoal)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
