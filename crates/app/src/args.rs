pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cask")]
#[command(about = "Publish content-addressed software trees to a storage gateway")]
pub struct Args {
    /// Path to the cask config directory (defaults to ~/.cask)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    /// Directory for log files (logs to stderr only if not set)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
