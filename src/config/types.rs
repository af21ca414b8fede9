//! Configuration types and defaults.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Server identity and listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name shown in the connection banner.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// TCP port; 0 asks the OS for an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Tunable limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Consecutive failed logins before the connection is dropped.
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    /// Ring capacity for channels created without explicit sizing.
    #[serde(default = "default_buffer_size")]
    pub default_buffer_size: usize,
    /// Replay length for channels created without explicit sizing.
    #[serde(default = "default_replay_size")]
    pub default_replay_size: usize,
    /// Hard cap on any channel's ring capacity.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Longest accepted inbound line, in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or ":memory:" for an ephemeral database.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_server_name() -> String {
    "confabulator".to_string()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_login_attempts() -> u32 {
    3
}

fn default_buffer_size() -> usize {
    100
}

fn default_replay_size() -> usize {
    10
}

fn default_max_buffer_size() -> usize {
    10_000
}

fn default_max_line_length() -> usize {
    1024
}

fn default_db_path() -> String {
    "confab.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            login_attempts: default_login_attempts(),
            default_buffer_size: default_buffer_size(),
            default_replay_size: default_replay_size(),
            max_buffer_size: default_max_buffer_size(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.login_attempts == 0 {
            return Err(ConfigError::Invalid(
                "limits.login_attempts must be at least 1".to_string(),
            ));
        }
        if limits.default_buffer_size == 0 || limits.max_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer sizes must be at least 1".to_string(),
            ));
        }
        if limits.default_replay_size > limits.default_buffer_size {
            return Err(ConfigError::Invalid(format!(
                "limits.default_replay_size ({}) exceeds default_buffer_size ({})",
                limits.default_replay_size, limits.default_buffer_size
            )));
        }
        if limits.default_buffer_size > limits.max_buffer_size {
            return Err(ConfigError::Invalid(format!(
                "limits.default_buffer_size ({}) exceeds max_buffer_size ({})",
                limits.default_buffer_size, limits.max_buffer_size
            )));
        }
        if limits.max_line_length < 64 {
            return Err(ConfigError::Invalid(
                "limits.max_line_length must be at least 64".to_string(),
            ));
        }
        Ok(())
    }

    /// Address string the listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8989);
        assert_eq!(config.limits.login_attempts, 3);
        assert_eq!(config.limits.default_replay_size, 10);
        assert_eq!(config.database.path, "confab.db");
        config.validate().unwrap();
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 4242

            [limits]
            login_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.limits.login_attempts, 5);
        assert_eq!(config.limits.default_buffer_size, 100);
    }

    #[test]
    fn replay_larger_than_buffer_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            default_buffer_size = 5
            default_replay_size = 6
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn listen_addr_joins_bind_and_port() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8989");
    }
}
