//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

/// Minaret - WebSocket bridge for a running game host
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "minaret.toml")]
    pub config: PathBuf,

    /// Listen address as host:port, overrides the config file
    #[arg(short, long)]
    pub url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Read JSON requests from stdin and run them as the host console
    #[arg(long)]
    pub console: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("minaret.toml"),
            url: None,
            log_level: None,
            json_logs: false,
            console: false,
        }
    }
}
