//! Account directory: registration, authentication, presence, contacts,
//! privilege administration, and the address block list.

use crate::db::AccountRecord;
use crate::error::{EngineError, EngineResult};
use crate::state::{ChannelEvent, Engine, OnlineSession, Outbound, OutboundSender};
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use tracing::{info, warn};

/// Unauthorized administration attempts tolerated before expulsion.
const FORGIVENESS_LIMIT: i64 = 3;

/// What a session knows about its logged-in account.
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub id: i64,
    pub name: String,
    pub group: String,
}

/// A row for the admin account listing.
#[derive(Debug, Clone)]
pub struct AccountOverview {
    pub name: String,
    pub group: String,
    pub online: bool,
    pub forgiven: i64,
    pub registered_at: i64,
}

/// Privilege reach of a group, for `whoami` and help filtering.
#[derive(Debug, Clone)]
pub struct EffectiveCapabilities {
    pub group: String,
    pub reaches: Vec<String>,
}

/// Result of recording an unauthorized administration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Still within tolerance; `remaining` strikes left.
    Warned { remaining: i64 },
    /// The account was expelled: deleted, its address blocked, its session
    /// dropped.
    Expelled,
}

/// Shared naming rule for accounts, channels, and privilege groups.
pub(crate) fn validate_name(kind: &str, name: &str) -> EngineResult<()> {
    let ok = !name.is_empty()
        && name.len() <= 32
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfiguration(format!(
            "{kind} names are 1-32 characters: letters, digits, '_' or '-'"
        )))
    }
}

impl Engine {
    // ------------------------------------------------------------------
    // Registration and login
    // ------------------------------------------------------------------

    /// Create an account and log it in. The very first account on a fresh
    /// server lands in `administrators`; everyone after that in `users`.
    pub async fn register_account(
        &self,
        name: &str,
        password: &str,
        addr: IpAddr,
        outbound: OutboundSender,
    ) -> EngineResult<AccountIdentity> {
        validate_name("account", name)?;
        if password.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "password must not be empty".to_string(),
            ));
        }

        let first_account = self.db.accounts().count().await? == 0;
        let group_name = if first_account {
            "administrators"
        } else {
            "users"
        };
        let group_id = {
            let graph = self.graph.read().await;
            graph
                .group_id(group_name)
                .ok_or_else(|| EngineError::Internal(format!("missing group {group_name}")))?
        };

        let secret = self.hasher.derive(password)?;
        let record = self
            .db
            .accounts()
            .create(name, &secret.salt, &secret.digest, group_id)
            .await
            .map_err(|e| match e {
                crate::db::DbError::AccountExists(_) => EngineError::DuplicateName(name.to_string()),
                other => other.into(),
            })?;

        info!(account = %record.name, group = %group_name, first = first_account, "Account registered");
        let identity = AccountIdentity {
            id: record.id,
            name: record.name,
            group: group_name.to_string(),
        };
        self.attach_session(&identity, addr, outbound)?;
        Ok(identity)
    }

    /// Verify credentials and bring the account online. Unknown names burn a
    /// dummy hash and fail exactly like a wrong password, so neither timing
    /// nor the reply reveals whether an account exists.
    pub async fn authenticate(
        &self,
        name: &str,
        password: &str,
        addr: IpAddr,
        outbound: OutboundSender,
    ) -> EngineResult<AccountIdentity> {
        let Some(record) = self.db.accounts().find_by_name(name).await? else {
            self.hasher.burn(password);
            return Err(EngineError::BadCredentials);
        };

        if !self
            .hasher
            .verify(password, &record.password_salt, &record.password_hash)
        {
            return Err(EngineError::BadCredentials);
        }

        let identity = self.identity_of(&record).await?;
        self.attach_session(&identity, addr, outbound)?;
        info!(account = %identity.name, %addr, "Login");
        Ok(identity)
    }

    /// Resolve the group name for a stored account.
    async fn identity_of(&self, record: &AccountRecord) -> EngineResult<AccountIdentity> {
        let graph = self.graph.read().await;
        let group = graph.group_name(record.group_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "account {} references unknown group {}",
                record.name, record.group_id
            ))
        })?;
        Ok(AccountIdentity {
            id: record.id,
            name: record.name.clone(),
            group: group.to_string(),
        })
    }

    /// One session per account: a second login is refused while the first
    /// is alive.
    fn attach_session(
        &self,
        identity: &AccountIdentity,
        addr: IpAddr,
        outbound: OutboundSender,
    ) -> EngineResult<()> {
        match self.sessions.entry(identity.name.clone()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyOnline),
            Entry::Vacant(slot) => {
                slot.insert(OnlineSession {
                    account_id: identity.id,
                    addr,
                    outbound,
                    connected_at: chrono::Utc::now().timestamp(),
                });
                Ok(())
            }
        }
    }

    /// Take the account offline. Channel membership is expected to be gone
    /// already; the session loop leaves its focus before calling this.
    /// Only the entry owned by `outbound` is removed, so a session whose
    /// seat was already taken over cannot log out its successor.
    pub fn deauthenticate(&self, account: &str, outbound: &OutboundSender) {
        let removed = self
            .sessions
            .remove_if(account, |_, session| {
                session.outbound.same_channel(outbound)
            });
        if let Some((_, session)) = removed {
            let seconds = chrono::Utc::now().timestamp() - session.connected_at;
            info!(%account, session_seconds = seconds, "Logout");
        }
    }

    /// Server-side disconnect: print a notice and close the session.
    pub fn force_disconnect(&self, account: &str, notice: &str) -> bool {
        match self.sessions.remove(account) {
            Some((_, session)) => {
                let _ = session.outbound.send(Outbound::Shutdown {
                    notice: notice.to_string(),
                });
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Account maintenance
    // ------------------------------------------------------------------

    /// Check a plaintext against the stored digest without touching session
    /// state. Used before a self-service password change.
    pub async fn verify_password(&self, account: &str, password: &str) -> EngineResult<()> {
        let record = self.require_account(account).await?;
        if self
            .hasher
            .verify(password, &record.password_salt, &record.password_hash)
        {
            Ok(())
        } else {
            Err(EngineError::BadCredentials)
        }
    }

    pub async fn change_password(&self, account_id: i64, new_password: &str) -> EngineResult<()> {
        if new_password.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "password must not be empty".to_string(),
            ));
        }
        let secret = self.hasher.derive(new_password)?;
        self.db
            .accounts()
            .update_password(account_id, &secret.salt, &secret.digest)
            .await?;
        Ok(())
    }

    /// Admin password reset by account name.
    pub async fn reset_password(&self, account: &str, new_password: &str) -> EngineResult<()> {
        let record = self.require_account(account).await?;
        self.change_password(record.id, new_password).await
    }

    /// Move an account into another privilege group.
    pub async fn set_account_group(&self, account: &str, group: &str) -> EngineResult<()> {
        let record = self.require_account(account).await?;
        let group_id = {
            let graph = self.graph.read().await;
            graph.group_id(group).ok_or_else(|| {
                EngineError::InvalidConfiguration(format!("no such group: {group}"))
            })?
        };
        self.db.accounts().update_group(record.id, group_id).await?;
        Ok(())
    }

    /// Remove an account and everything hanging off it: owned channels are
    /// deleted with notice, moderation rows naming the account are scrubbed,
    /// contacts and inbox rows cascade, and any live session is dropped.
    pub async fn delete_account(&self, account: &str, notice: &str) -> EngineResult<()> {
        let record = self.require_account(account).await?;

        let owned = self.db.channels().owned_by(record.id).await?;
        for channel in owned {
            self.remove_channel_internal(&channel.name, channel.id).await?;
        }

        // Stale in-memory bans and mutes naming the account would otherwise
        // leak onto a future account with the same name.
        for entry in self.channels.iter() {
            let _ = entry
                .tx
                .send(ChannelEvent::ScrubAccount {
                    account: account.to_string(),
                })
                .await;
        }

        self.db.moderation().clear_account(account).await?;
        self.db.channels().clear_delegations_of(account).await?;
        self.db.accounts().delete(record.id).await?;
        self.force_disconnect(account, notice);
        info!(%account, "Account deleted");
        Ok(())
    }

    async fn require_account(&self, name: &str) -> EngineResult<AccountRecord> {
        self.db
            .accounts()
            .find_by_name(name)
            .await?
            .ok_or_else(|| EngineError::UnknownAccount(name.to_string()))
    }

    /// Listing for the admin console.
    pub async fn account_overviews(&self) -> EngineResult<Vec<AccountOverview>> {
        let records = self.db.accounts().all().await?;
        let graph = self.graph.read().await;
        Ok(records
            .into_iter()
            .map(|r| AccountOverview {
                online: self.sessions.contains_key(&r.name),
                group: graph
                    .group_name(r.group_id)
                    .unwrap_or("<unknown>")
                    .to_string(),
                forgiven: r.forgiven,
                registered_at: r.registered_at,
                name: r.name,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub async fn add_contact(&self, owner: &AccountIdentity, friend: &str) -> EngineResult<()> {
        if friend == owner.name {
            return Err(EngineError::InvalidConfiguration(
                "you cannot add yourself".to_string(),
            ));
        }
        let record = self
            .db
            .accounts()
            .find_by_name(friend)
            .await?
            .ok_or_else(|| EngineError::UnknownAccount(friend.to_string()))?;
        self.db.accounts().add_contact(owner.id, record.id).await?;
        Ok(())
    }

    /// Removing an absent contact is a no-op.
    pub async fn remove_contact(&self, owner: &AccountIdentity, friend: &str) -> EngineResult<()> {
        if let Some(record) = self.db.accounts().find_by_name(friend).await? {
            self.db
                .accounts()
                .remove_contact(owner.id, record.id)
                .await?;
        }
        Ok(())
    }

    /// Drop every contact the owner holds (`options purge`).
    pub async fn clear_contacts(&self, owner_id: i64) -> EngineResult<()> {
        self.db.accounts().clear_contacts(owner_id).await?;
        Ok(())
    }

    /// Contact names with their presence, sorted by name.
    pub async fn contacts_with_presence(
        &self,
        owner_id: i64,
    ) -> EngineResult<Vec<(String, bool)>> {
        let names = self.db.accounts().contacts_of(owner_id).await?;
        Ok(names
            .into_iter()
            .map(|name| {
                let online = self.sessions.contains_key(&name);
                (name, online)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Privilege graph
    // ------------------------------------------------------------------

    /// True when `group` reaches `required` through inheritance.
    pub async fn group_grants(&self, group: &str, required: &str) -> bool {
        self.graph.read().await.grants(group, required)
    }

    pub async fn is_server_admin(&self, group: &str) -> bool {
        self.group_grants(group, "administrators").await
    }

    pub async fn effective_capabilities(&self, group: &str) -> EffectiveCapabilities {
        let graph = self.graph.read().await;
        EffectiveCapabilities {
            group: group.to_string(),
            reaches: graph.reachable_from(group).into_iter().collect(),
        }
    }

    /// The raw edge set, for the admin console.
    pub async fn graph_edges(&self) -> Vec<(String, String)> {
        self.graph.read().await.edge_list()
    }

    /// All groups with the full set each reaches, for the admin console.
    pub async fn group_overviews(&self) -> Vec<(String, Vec<String>)> {
        let graph = self.graph.read().await;
        graph
            .group_names()
            .map(|name| {
                let reaches = graph.reachable_from(name).into_iter().collect();
                (name.to_string(), reaches)
            })
            .collect()
    }

    pub async fn create_group(&self, name: &str) -> EngineResult<()> {
        validate_name("group", name)?;
        let record = self.db.privileges().create_group(name).await.map_err(|e| {
            match e {
                crate::db::DbError::GroupExists(_) => EngineError::DuplicateName(name.to_string()),
                other => other.into(),
            }
        })?;
        self.graph.write().await.add_group(&record.name, record.id)?;
        Ok(())
    }

    /// Grant: parent inherits everything child grants. The in-memory graph
    /// validates (unknown groups, cycles) before the store is touched; a
    /// store failure rolls the edge back.
    pub async fn grant_edge(&self, parent: &str, child: &str) -> EngineResult<()> {
        let mut graph = self.graph.write().await;
        graph.add_edge(parent, child)?;
        let (pid, cid) = match (graph.group_id(parent), graph.group_id(child)) {
            (Some(p), Some(c)) => (p, c),
            _ => {
                graph.remove_edge(parent, child);
                return Err(EngineError::Internal("group ids out of sync".to_string()));
            }
        };
        if let Err(e) = self.db.privileges().add_edge(pid, cid).await {
            graph.remove_edge(parent, child);
            return Err(e.into());
        }
        Ok(())
    }

    /// Revoke an inheritance edge. Missing edges are a no-op.
    pub async fn revoke_edge(&self, parent: &str, child: &str) -> EngineResult<()> {
        let mut graph = self.graph.write().await;
        let (pid, cid) = match (graph.group_id(parent), graph.group_id(child)) {
            (Some(p), Some(c)) => (p, c),
            _ => {
                return Err(EngineError::InvalidConfiguration(
                    "no such group".to_string(),
                ))
            }
        };
        self.db.privileges().remove_edge(pid, cid).await?;
        graph.remove_edge(parent, child);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Address block list
    // ------------------------------------------------------------------

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.blocked.contains(&addr)
    }

    pub fn blocked_snapshot(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.blocked.iter().map(|a| a.to_string()).collect();
        addrs.sort();
        addrs
    }

    /// Block an address and drop every live session connected from it.
    pub async fn block_address(&self, addr: IpAddr) -> EngineResult<()> {
        self.db
            .moderation()
            .block_address(&addr.to_string())
            .await?;
        self.blocked.insert(addr);

        let doomed: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.addr == addr)
            .map(|entry| entry.key().clone())
            .collect();
        for name in doomed {
            self.force_disconnect(&name, "** your address was blocked by an administrator");
        }
        warn!(%addr, "Address blocked");
        Ok(())
    }

    pub async fn unblock_address(&self, addr: IpAddr) -> EngineResult<()> {
        self.db
            .moderation()
            .unblock_address(&addr.to_string())
            .await?;
        self.blocked.remove(&addr);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Forgiveness
    // ------------------------------------------------------------------

    /// Record an unauthorized administration attempt. Three strikes expels
    /// the account: deletion, address block, disconnect.
    pub async fn record_admin_violation(&self, account: &str) -> EngineResult<ViolationOutcome> {
        let record = self.require_account(account).await?;
        let strikes = self.db.accounts().increment_forgiven(record.id).await?;
        if strikes < FORGIVENESS_LIMIT {
            warn!(%account, strikes, "Unauthorized administration attempt");
            return Ok(ViolationOutcome::Warned {
                remaining: FORGIVENESS_LIMIT - strikes,
            });
        }

        // Deletion first, so the closing notice reaches the offender before
        // the address block sweeps every session on that address.
        let addr = self.sessions.get(account).map(|s| s.addr);
        self.delete_account(account, "** you were warned; goodbye").await?;
        if let Some(addr) = addr {
            self.block_address(addr).await?;
        }
        warn!(%account, "Account expelled after repeated administration attempts");
        Ok(ViolationOutcome::Expelled)
    }

    /// Admin clemency: reset the strike counter.
    pub async fn forgive_account(&self, account: &str) -> EngineResult<()> {
        let record = self.require_account(account).await?;
        self.db.accounts().reset_forgiven(record.id).await?;
        Ok(())
    }
}
