//! Logging system setup.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides `level` when set. With `json_format` every event is
/// written as one JSON object per line.
pub fn setup_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json_format {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}
