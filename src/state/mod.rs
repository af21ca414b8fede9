//! Central server state.
//!
//! [`Engine`] is the shared hub every session task talks to. Lock-free maps
//! carry the hot paths (online sessions, channel handles, blocked addresses),
//! the privilege graph sits behind an async `RwLock`, and per-channel state
//! lives in dedicated actors reached through mailboxes. The engine impl is
//! split by concern: account directory in `directory`, channel registry in
//! `registry`, message routing in `router`.

pub mod channel;
pub mod directory;
pub mod graph;
pub mod registry;
pub mod router;

pub use channel::{
    ChannelActor, ChannelEvent, ChannelHandle, ChannelLine, ChannelStatus, ChannelSummary,
    WhisperOutcome,
};
pub use directory::{AccountIdentity, AccountOverview, EffectiveCapabilities, ViolationOutcome};
pub use graph::PrivilegeGraph;

use crate::config::Config;
use crate::db::Database;
use crate::error::EngineResult;
use crate::security::{Argon2Hasher, SecretHasher};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};

/// Messages queued to a session's writer task.
///
/// Sessions mostly receive plain lines, but a few state transitions have to
/// reach the session loop itself: losing channel focus and server-side
/// disconnects.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A complete line to write to the peer.
    Line(String),
    /// The named channel no longer holds this session (kick, ban, delete).
    /// The session drops its focus only if it still points at `channel`.
    FocusDropped { channel: String, notice: String },
    /// Print the notice and close the connection.
    Shutdown { notice: String },
}

/// Sender half of a session's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Presence entry for a logged-in account.
#[derive(Debug, Clone)]
pub struct OnlineSession {
    pub account_id: i64,
    pub addr: IpAddr,
    pub outbound: OutboundSender,
    pub connected_at: i64,
}

/// Shared server state. One per process, wrapped in an `Arc`.
pub struct Engine {
    pub(crate) db: Database,
    pub(crate) hasher: Arc<dyn SecretHasher>,
    pub(crate) server_name: String,
    pub(crate) limits: crate::config::LimitsConfig,
    pub(crate) graph: RwLock<PrivilegeGraph>,
    pub(crate) sessions: DashMap<String, OnlineSession>,
    pub(crate) channels: DashMap<String, ChannelHandle>,
    pub(crate) blocked: DashSet<IpAddr>,
    pub(crate) settings: parking_lot::RwLock<BTreeMap<String, String>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Engine {
    /// Build the engine from a loaded configuration and an open store, then
    /// rehydrate persistent state: the privilege graph, the block list,
    /// global settings, and an actor per persisted channel.
    pub async fn new(config: &Config, db: Database) -> EngineResult<Arc<Self>> {
        let groups = db.privileges().all_groups().await?;
        let edges = db.privileges().all_edges().await?;
        let graph = PrivilegeGraph::from_records(&groups, &edges);

        let blocked = DashSet::new();
        for stored in db.moderation().blocked_addresses().await? {
            match stored.parse::<IpAddr>() {
                Ok(addr) => {
                    blocked.insert(addr);
                }
                Err(_) => warn!(address = %stored, "Ignoring unparseable blocked address"),
            }
        }

        let settings: BTreeMap<String, String> =
            db.settings().all().await?.into_iter().collect();

        let (shutdown_tx, _) = broadcast::channel(8);

        let engine = Arc::new(Self {
            db,
            hasher: Arc::new(Argon2Hasher),
            server_name: config.server.name.clone(),
            limits: config.limits.clone(),
            graph: RwLock::new(graph),
            sessions: DashMap::new(),
            channels: DashMap::new(),
            blocked,
            settings: parking_lot::RwLock::new(settings),
            shutdown_tx,
        });

        let restored = engine.rehydrate_channels().await?;
        info!(
            groups = groups.len(),
            channels = restored,
            blocked = engine.blocked.len(),
            "Engine state restored"
        );
        Ok(engine)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn limits(&self) -> &crate::config::LimitsConfig {
        &self.limits
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    pub fn is_online(&self, account: &str) -> bool {
        self.sessions.contains_key(account)
    }

    /// Queue a line to an online account. Returns false when the account has
    /// no live session.
    pub fn notify_account(&self, account: &str, line: String) -> bool {
        match self.sessions.get(account) {
            Some(entry) => entry.outbound.send(Outbound::Line(line)).is_ok(),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Global settings
    // ------------------------------------------------------------------

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.read().get(key).cloned()
    }

    pub fn settings_snapshot(&self) -> Vec<(String, String)> {
        self.settings
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Write-through: the store first, then the cache.
    pub async fn set_setting(&self, key: &str, value: &str) -> EngineResult<()> {
        self.db.settings().set(key, value).await?;
        self.settings
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Announce shutdown to every live session and stop the acceptor. The
    /// sessions drain their queues, print the notice, and disconnect.
    pub fn begin_shutdown(&self, notice: &str) {
        info!("Server shutdown requested");
        for entry in self.sessions.iter() {
            let _ = entry.outbound.send(Outbound::Shutdown {
                notice: notice.to_string(),
            });
        }
        let _ = self.shutdown_tx.send(());
    }
}
