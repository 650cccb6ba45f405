pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Encrypted, deduplicated file storage")]
pub struct Args {
    /// Path to the tessera state directory (defaults to ~/.tessera)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level, overriding the config file (RUST_LOG still wins)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}
