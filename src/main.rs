//! confabd - the Confabulator chat daemon.
//!
//! A small line-oriented chat server: accounts, channels with replayable
//! history, private inboxes, and a graph of privilege groups, all persisted
//! in SQLite.

mod config;
mod db;
mod error;
mod handlers;
mod net;
mod security;
mod session;
mod state;

use crate::config::Config;
use crate::db::Database;
use crate::handlers::Registry;
use crate::net::Gateway;
use crate::state::Engine;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration. An explicit path must exist; without one, a
    // missing config.toml just means defaults.
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).map_err(|e| {
            error!(path = %path, error = %e, "Failed to load config");
            e
        })?,
        None if std::path::Path::new("config.toml").exists() => Config::load("config.toml")?,
        None => Config::default(),
    };

    info!(
        server = %config.server.name,
        addr = %config.listen_addr(),
        "Starting confabd"
    );

    // Initialize database (runs migrations)
    let db = Database::new(&config.database.path).await?;

    // Restore persistent state: groups, channels, blocks, settings
    let engine = Engine::new(&config, db).await?;

    // Command handler registry
    let registry = Arc::new(Registry::standard());

    let gateway = Gateway::bind(&config, engine, registry).await?;
    gateway.run().await?;

    info!("confabd stopped");
    Ok(())
}
