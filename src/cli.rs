//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mirador", version, about = "Real-time device status gateway")]
pub struct Cli {
    /// Path to a JSON config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen port (overrides the config file and MIRADOR_PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Emit JSON logs regardless of the configured format.
    #[arg(long)]
    pub json_logs: bool,
}
