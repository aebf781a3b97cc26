//! Server configuration types and defaults.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind target, also used when a URL omits parts of it.
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8765;

/// Errors raised while interpreting a `host:port` URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid WebSocket URL '{0}', expected host:port")]
    InvalidUrl(String),
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

/// Basic authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns credentials only when `username` is non-empty, which is the
    /// condition for enabling authentication.
    pub fn optional(username: &str, password: &str) -> Option<Self> {
        (!username.is_empty()).then(|| Self::new(username, password))
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"*".repeat(self.password.len()))
            .finish()
    }
}

/// Configuration structure for the WebSocket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or IP address to bind to
    pub host: String,

    /// TCP port; 0 picks an ephemeral port
    pub port: u16,

    /// Basic auth credentials, `None` disables authentication
    pub credentials: Option<Credentials>,

    /// How long `stop()` waits for connection tasks before aborting them
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            credentials: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Builds a config from a `host:port` string.
    ///
    /// An empty host falls back to `localhost` and a missing port to 8765.
    /// Bracketed IPv6 literals such as `[::1]:8765` are accepted.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::InvalidUrl`] for schemes, paths, whitespace or extra
    ///   colons
    /// * [`ConfigError::InvalidPort`] if the port is not a `u16`
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let invalid = || ConfigError::InvalidUrl(url.to_string());
        if url.contains(char::is_whitespace) || url.contains('/') {
            return Err(invalid());
        }

        let (host, port) = if let Some(rest) = url.strip_prefix('[') {
            let (address, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                _ => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
            };
            (&url[..address.len() + 2], port)
        } else {
            match url.split_once(':') {
                Some((_, port)) if port.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, Some(port)),
                None => (url, None),
            }
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(port.to_string()))?,
            None => DEFAULT_PORT,
        };
        let host = if host.is_empty() { DEFAULT_HOST } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
            ..Self::default()
        })
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn auth_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// The `host:port` string handed to the resolver.
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_target(), "localhost:8765");
        assert!(!config.auth_enabled());
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_from_url() {
        let config = ServerConfig::from_url("0.0.0.0:9000").unwrap();
        assert_eq!((config.host.as_str(), config.port), ("0.0.0.0", 9000));

        let config = ServerConfig::from_url("example.org").unwrap();
        assert_eq!((config.host.as_str(), config.port), ("example.org", 8765));

        let config = ServerConfig::from_url(":7000").unwrap();
        assert_eq!((config.host.as_str(), config.port), ("localhost", 7000));

        let config = ServerConfig::from_url("[::1]:8800").unwrap();
        assert_eq!(config.bind_target(), "[::1]:8800");

        let config = ServerConfig::from_url("[::1]").unwrap();
        assert_eq!(config.port, 8765);
    }

    #[test]
    fn test_from_url_errors() {
        assert_eq!(
            ServerConfig::from_url("localhost:http").unwrap_err(),
            ConfigError::InvalidPort("http".to_string())
        );
        assert_eq!(
            ServerConfig::from_url("localhost:70000").unwrap_err(),
            ConfigError::InvalidPort("70000".to_string())
        );
        assert!(matches!(
            ServerConfig::from_url("ws://localhost:8765"),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(matches!(
            ServerConfig::from_url("::1:8765"),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(matches!(
            ServerConfig::from_url("[::1]8765"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_credentials() {
        assert_eq!(Credentials::optional("", "secret"), None);
        let credentials = Credentials::optional("admin", "secret").unwrap();
        assert!(credentials.matches("admin", "secret"));
        assert!(!credentials.matches("admin", "wrong"));
        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
