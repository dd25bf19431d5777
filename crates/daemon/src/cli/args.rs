pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skylock")]
#[command(about = "Skylock storage daemon")]
pub struct Args {
    /// Path to the skylock config directory (defaults to ~/.skylock)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
