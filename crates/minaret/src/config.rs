//! Configuration management for the Minaret binary.
//!
//! Settings are read from a TOML file. A missing file is created with the
//! default settings so operators always have a template to edit.

use anyhow::{Context, Result};
use minaret_bridge::{Credentials, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket listener settings
    pub websocket: WebSocketSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Listener and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Listen address as `host:port`
    pub url: String,
    /// Basic auth username; empty disables authentication
    pub auth_username: String,
    pub auth_password: String,
    /// Seconds to wait for connections to close on shutdown
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: "localhost:8765".to_string(),
            auth_username: String::new(),
            auth_password: String::new(),
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults to `path`
    /// first if it does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Builds the library configuration from these settings.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig::from_url(&self.websocket.url)?
            .with_credentials(Credentials::optional(
                &self.websocket.auth_username,
                &self.websocket.auth_password,
            ))
            .with_shutdown_grace(Duration::from_secs(self.websocket.shutdown_grace_secs));
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Err(e) = ServerConfig::from_url(&self.websocket.url) {
            return Err(format!("Invalid WebSocket url '{}': {}", self.websocket.url, e));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        if !self.websocket.auth_username.is_empty() && self.websocket.auth_password.is_empty() {
            return Err("auth_password must be set when auth_username is set".to_string());
        }

        Ok(())
    }
}
