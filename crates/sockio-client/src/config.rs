//! Client configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sockio_core::DEFAULT_RESOURCE;
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`Socket`](crate::Socket).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Resource path on the server (default `"socket.io"`).
    pub resource: String,
    /// Timeout for the handshake request and for opening the transport.
    pub connect_timeout_secs: u64,
    /// Overrides the heartbeat timeout negotiated by the handshake.
    pub heartbeat_timeout_secs: Option<u64>,
    /// Watchdog ticks per heartbeat timeout window (at least 2).
    pub heartbeat_ticks_per_timeout: u32,
    /// Capacity of the event channel handed to the application.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resource: DEFAULT_RESOURCE.into(),
            connect_timeout_secs: 10,
            heartbeat_timeout_secs: None,
            heartbeat_ticks_per_timeout: 3,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_ticks_per_timeout < 2 {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_ticks_per_timeout must be at least 2, got {}",
                self.heartbeat_ticks_per_timeout
            )));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be non-zero".into()));
        }
        if self.heartbeat_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_secs must be non-zero when set".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_override(&self) -> Option<Duration> {
        self.heartbeat_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.resource, "socket.io");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_override(), None);
        assert_eq!(cfg.heartbeat_ticks_per_timeout, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ClientConfig::from_toml_str("heartbeat_timeout_secs = 15\n").unwrap();
        assert_eq!(cfg.heartbeat_override(), Some(Duration::from_secs(15)));
        assert_eq!(cfg.resource, "socket.io");
        assert_eq!(cfg.event_capacity, 256);
    }

    #[test]
    fn full_toml() {
        let toml = r#"
            resource = "io"
            connect_timeout_secs = 3
            heartbeat_ticks_per_timeout = 4
            event_capacity = 8
        "#;
        let cfg = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.resource, "io");
        assert_eq!(cfg.connect_timeout_secs, 3);
        assert_eq!(cfg.heartbeat_ticks_per_timeout, 4);
        assert_eq!(cfg.event_capacity, 8);
    }

    #[test]
    fn rejects_single_tick_window() {
        let err = ClientConfig::from_toml_str("heartbeat_ticks_per_timeout = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = ClientConfig::from_toml_str("resource = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_missing_file() {
        let err = ClientConfig::load("/nonexistent/sockio.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
