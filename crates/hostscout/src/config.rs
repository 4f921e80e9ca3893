// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Address to bind the discovery endpoints to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Well-known discovery port (default: 7430)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between interface broadcast/multicast queries (seconds)
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_secs: u64,

    /// Interval between loopback queries (seconds). Much shorter than the
    /// broadcast interval so a local agent is found promptly.
    #[serde(default = "default_loopback_interval")]
    pub loopback_interval_secs: u64,

    /// Interval between unicast queries to every known host address (seconds)
    #[serde(default = "default_known_host_interval")]
    pub known_host_interval_secs: u64,

    /// Interval between staleness scans (seconds)
    #[serde(default = "default_stale_check_interval")]
    pub stale_check_interval_secs: u64,

    /// A host is shaded stale after this many seconds without an answer
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Send scheduled broadcast queries (auto-search). Answers are received
    /// and processed either way.
    #[serde(default = "default_true")]
    pub auto_broadcast: bool,

    /// Path of the settings database the registry is saved to
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    crate::DEFAULT_DISCOVERY_PORT
}

fn default_broadcast_interval() -> u64 {
    10
}

fn default_loopback_interval() -> u64 {
    3
}

fn default_known_host_interval() -> u64 {
    30
}

fn default_stale_check_interval() -> u64 {
    10
}

fn default_stale_after() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_store_path() -> String {
    "hostscout.db".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            broadcast_interval_secs: default_broadcast_interval(),
            loopback_interval_secs: default_loopback_interval(),
            known_host_interval_secs: default_known_host_interval(),
            stale_check_interval_secs: default_stale_check_interval(),
            stale_after_secs: default_stale_after(),
            auto_broadcast: true,
            store_path: default_store_path(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn loopback_interval(&self) -> Duration {
        Duration::from_secs(self.loopback_interval_secs)
    }

    pub fn known_host_interval(&self) -> Duration {
        Duration::from_secs(self.known_host_interval_secs)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_secs(self.stale_check_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        for (name, value) in [
            ("broadcast_interval_secs", self.broadcast_interval_secs),
            ("loopback_interval_secs", self.loopback_interval_secs),
            ("known_host_interval_secs", self.known_host_interval_secs),
            ("stale_check_interval_secs", self.stale_check_interval_secs),
            ("stale_after_secs", self.stale_after_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} cannot be 0", name)));
            }
        }
        if self.store_path.is_empty() {
            return Err(ConfigError::InvalidValue("store_path cannot be empty".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsoleConfig::default();
        assert_eq!(config.port, crate::DEFAULT_DISCOVERY_PORT);
        assert!(config.auto_broadcast);
        assert!(config.loopback_interval_secs < config.broadcast_interval_secs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ConsoleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ConsoleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.store_path, parsed.store_path);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let parsed: ConsoleConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.stale_after_secs, 60);
    }

    #[test]
    fn test_validation_port_zero() {
        let config = ConsoleConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_interval_zero() {
        let config = ConsoleConfig {
            loopback_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
