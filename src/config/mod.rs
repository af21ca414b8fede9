//! Server configuration.
//!
//! Everything is optional in the TOML file; omitted sections fall back to
//! defaults that run a usable server on port 8989 with an on-disk database.

mod types;

pub use types::{Config, ConfigError, DatabaseConfig, LimitsConfig, ServerConfig};
