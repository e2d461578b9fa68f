// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::store::DEFAULT_PREFIX;
use crate::util::parse_key_prefix;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8126;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Configuration for the logd server, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind the UDP socket to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind the UDP socket to
    pub port: u16,
    /// Prefix of every storage key
    pub prefix: String,
    /// How long received log lines wait before they are stored
    pub flush_interval: Duration,
    /// Directory of the sled database; the store is in memory when unset
    pub store_path: Option<PathBuf>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: DEFAULT_PREFIX.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            store_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("LOGD_HOST").unwrap_or(defaults.host);
        let port = match lookup("LOGD_PORT") {
            Some(port) => port.trim().parse::<u16>().map_err(|_| {
                ConfigError::InvalidConfig(format!("LOGD_PORT is not a port number: '{port}'"))
            })?,
            None => defaults.port,
        };
        let prefix = match lookup("LOGD_PREFIX") {
            Some(prefix) => parse_key_prefix(&prefix).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("Invalid LOGD_PREFIX '{prefix}'"))
            })?,
            None => defaults.prefix,
        };
        let flush_interval = match lookup("LOGD_FLUSH_INTERVAL_MS") {
            Some(ms) => ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                ConfigError::InvalidConfig(format!(
                    "LOGD_FLUSH_INTERVAL_MS is not a number of milliseconds: '{ms}'"
                ))
            })?,
            None => defaults.flush_interval,
        };
        let store_path = lookup("LOGD_STORE_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let log_level = lookup("LOGD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            host,
            port,
            prefix,
            flush_interval,
            store_path,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "LOGD_PORT must be greater than 0".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "LOGD_HOST cannot be empty".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "LOGD_FLUSH_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Address the UDP socket binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
