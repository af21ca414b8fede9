//! Persistence layer.
//!
//! Async SQLite access through SQLx for every durable aggregate: accounts
//! and contacts, the privilege graph, channels and their retained lines,
//! moderation state (blocked addresses, bans, mutes), inboxes, and global
//! settings. Live state is rebuilt from here at startup.

mod accounts;
mod channels;
mod inbox;
mod moderation;
mod privileges;
mod settings;

pub use accounts::{AccountRecord, AccountRepository};
pub use channels::{ChannelLineRecord, ChannelRecord, ChannelRepository};
pub use inbox::{InboxRecord, InboxRepository};
pub use moderation::ModerationRepository;
pub use privileges::{GroupRecord, PrivilegeRepository};
pub use settings::SettingsRepository;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Sequence for naming in-memory databases, so parallel tests never share one.
static EPHEMERAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("account already exists: {0}")]
    AccountExists(String),
    #[error("channel already exists: {0}")]
    ChannelExists(String),
    #[error("privilege group already exists: {0}")]
    GroupExists(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Shared handle over the connection pool. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database at `path` (`":memory:"` for an ephemeral one),
    /// apply migrations, and verify integrity.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let (options, max_connections) = if path == ":memory:" {
            // A named shared-cache memory database per call; the plain
            // `:memory:` form would hand every pool connection its own
            // empty database.
            let seq = EPHEMERAL_SEQ.fetch_add(1, Ordering::Relaxed);
            let uri = format!(
                "file:confabd-mem-{}-{seq}?mode=memory&cache=shared",
                std::process::id()
            );
            let options = SqliteConnectOptions::new()
                .filename(&uri)
                .shared_cache(true)
                .create_if_missing(true);
            // A single connection keeps the memory database alive.
            (options, 1)
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Could not create database directory");
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            (options, 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(60)))
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        info!(path = %path, "Database opened");

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Schema migrations applied");

        // WAL lets reads proceed while a write is in progress; the schema
        // relies on ON DELETE CASCADE, which needs foreign_keys on.
        for pragma in [
            "PRAGMA journal_mode=WAL",
            "PRAGMA foreign_keys=ON",
            "PRAGMA synchronous=NORMAL",
        ] {
            sqlx::query(pragma).execute(&pool).await?;
        }

        let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;
        if verdict != "ok" {
            tracing::error!(verdict = %verdict, "Database integrity check failed");
            return Err(DbError::Internal(format!(
                "database integrity check failed: {verdict}"
            )));
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(&self.pool)
    }

    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    pub fn moderation(&self) -> ModerationRepository<'_> {
        ModerationRepository::new(&self.pool)
    }

    pub fn inbox(&self) -> InboxRepository<'_> {
        InboxRepository::new(&self.pool)
    }

    pub fn privileges(&self) -> PrivilegeRepository<'_> {
        PrivilegeRepository::new(&self.pool)
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.pool)
    }
}
