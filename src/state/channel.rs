//! Actor model for channel state.
//!
//! Each channel runs in its own task and owns all of its state: members,
//! the bounded ring of retained lines, bans, mutes, password, sizing, and
//! lifecycle status. Every interaction arrives as a [`ChannelEvent`] through
//! the mailbox, so appends, evictions, and fan-outs are serialized per
//! channel while distinct channels proceed in parallel.

use crate::db::{ChannelLineRecord, ChannelRecord, Database};
use crate::error::{EngineError, EngineResult};
use crate::security::SecretHasher;
use crate::state::{Outbound, OutboundSender};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Channel lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Accepting joins and posts.
    Open,
    /// Existing members continue; no new joins.
    Locked,
    /// No new joins and no new posts.
    Archived,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Locked => "locked",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "locked" => Some(Self::Locked),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// One retained chat line.
#[derive(Debug, Clone)]
pub struct ChannelLine {
    pub author: String,
    pub body: String,
    pub sent_at: i64,
}

impl ChannelLine {
    fn render(&self) -> String {
        format!("{}: {}", self.author, self.body)
    }
}

/// Snapshot of channel facts for listings and the admin console.
#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub name: String,
    pub owner: String,
    pub admin_name: Option<String>,
    pub status: ChannelStatus,
    pub buffer_size: usize,
    pub replay_size: usize,
    pub member_count: usize,
    pub retained: usize,
    pub has_password: bool,
}

/// Outcome of a whisper attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperOutcome {
    /// Written to the target's session.
    Delivered,
    /// Target absent, or the target has muted the sender; fall back to inbox.
    Absent,
}

/// Events handled by a channel actor.
#[derive(Debug)]
pub enum ChannelEvent {
    Join {
        account: String,
        sender: OutboundSender,
        password: Option<String>,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    Leave {
        account: String,
        reply_tx: oneshot::Sender<bool>,
    },
    Post {
        author: String,
        body: String,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    Whisper {
        from: String,
        to: String,
        body: String,
        reply_tx: oneshot::Sender<WhisperOutcome>,
    },
    AddInvite {
        to: String,
        reply_tx: oneshot::Sender<()>,
    },
    Ban {
        by: String,
        server_admin: bool,
        target: String,
        reply_tx: oneshot::Sender<EngineResult<bool>>,
    },
    Unban {
        by: String,
        server_admin: bool,
        target: String,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    ListBans {
        by: String,
        server_admin: bool,
        reply_tx: oneshot::Sender<EngineResult<Vec<String>>>,
    },
    Mute {
        owner: String,
        target: String,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    Unmute {
        owner: String,
        target: String,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    ListMutes {
        owner: String,
        reply_tx: oneshot::Sender<Vec<String>>,
    },
    Kick {
        by: String,
        server_admin: bool,
        target: String,
        reply_tx: oneshot::Sender<EngineResult<bool>>,
    },
    ListMembers {
        requester: String,
        reply_tx: oneshot::Sender<Vec<(String, bool)>>,
    },
    Summary {
        reply_tx: oneshot::Sender<ChannelSummary>,
    },
    SetPassword {
        by: String,
        server_admin: bool,
        password: Option<String>,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    SetBuffer {
        by: String,
        server_admin: bool,
        size: usize,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    SetReplay {
        by: String,
        server_admin: bool,
        size: usize,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    SetStatus {
        by: String,
        server_admin: bool,
        status: ChannelStatus,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    SetDelegate {
        by: String,
        delegate: Option<String>,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    Purge {
        by: String,
        server_admin: bool,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
    /// Forced removal without authorization, used when an account is
    /// deleted or its session is being torn down server-side.
    Evict {
        account: String,
        notice: String,
    },
    /// Forget every in-memory trace of a deleted account: membership,
    /// bans, invites, and mutes in both directions. The store rows are
    /// already scrubbed by the caller.
    ScrubAccount {
        account: String,
    },
    Delete {
        by: String,
        server_admin: bool,
        reply_tx: oneshot::Sender<EngineResult<()>>,
    },
}

/// Cloneable address of a running channel actor.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub id: i64,
    pub name: String,
    pub tx: mpsc::Sender<ChannelEvent>,
}

/// The channel actor. Owns the state of a single channel and processes
/// events sequentially.
pub struct ChannelActor {
    id: i64,
    name: String,
    owner_name: String,
    admin_name: Option<String>,
    status: ChannelStatus,
    password: Option<(String, String)>,
    buffer_size: usize,
    replay_size: usize,
    max_buffer: usize,
    members: BTreeMap<String, OutboundSender>,
    ring: VecDeque<ChannelLine>,
    bans: BTreeSet<String>,
    mutes: BTreeMap<String, BTreeSet<String>>,
    invited: BTreeSet<String>,
    db: Database,
    hasher: Arc<dyn SecretHasher>,
}

impl ChannelActor {
    /// Spawn an actor for a persisted channel, seeded with its retained
    /// tail, bans, and mutes.
    pub fn spawn(
        record: &ChannelRecord,
        owner_name: String,
        ring_tail: Vec<ChannelLineRecord>,
        bans: Vec<String>,
        mutes: Vec<(String, String)>,
        db: Database,
        hasher: Arc<dyn SecretHasher>,
        max_buffer: usize,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::channel(100);

        let password = match (&record.password_salt, &record.password_hash) {
            (Some(salt), Some(digest)) => Some((salt.clone(), digest.clone())),
            _ => None,
        };

        let buffer_size = record.buffer_size.max(1) as usize;
        let mut ring: VecDeque<ChannelLine> = ring_tail
            .into_iter()
            .map(|line| ChannelLine {
                author: line.author,
                body: line.body,
                sent_at: line.sent_at,
            })
            .collect();
        while ring.len() > buffer_size {
            ring.pop_front();
        }

        let mut mute_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (owner, muted) in mutes {
            mute_map.entry(owner).or_default().insert(muted);
        }

        let status = ChannelStatus::parse(&record.status).unwrap_or_else(|| {
            warn!(channel = %record.name, status = %record.status, "Unknown status in store, treating as open");
            ChannelStatus::Open
        });

        let actor = Self {
            id: record.id,
            name: record.name.clone(),
            owner_name,
            admin_name: record.admin_name.clone(),
            status,
            password,
            buffer_size,
            replay_size: record.replay_size.max(1) as usize,
            max_buffer,
            members: BTreeMap::new(),
            ring,
            bans: bans.into_iter().collect(),
            mutes: mute_map,
            invited: BTreeSet::new(),
            db,
            hasher,
        };

        let handle = ChannelHandle {
            id: record.id,
            name: record.name.clone(),
            tx,
        };

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        handle
    }

    /// The main actor loop. Ends when the mailbox closes or the channel is
    /// deleted.
    async fn run(mut self, mut rx: mpsc::Receiver<ChannelEvent>) {
        debug!(channel = %self.name, "Channel actor started");
        while let Some(event) = rx.recv().await {
            if self.handle_event(event).await.is_break() {
                break;
            }
        }
        debug!(channel = %self.name, "Channel actor stopped");
    }

    /// True when `who` may run owner-level channel administration.
    fn privileged(&self, who: &str, server_admin: bool) -> bool {
        server_admin || who == self.owner_name || self.admin_name.as_deref() == Some(who)
    }

    fn require_privilege(&self, who: &str, server_admin: bool) -> EngineResult<()> {
        if self.privileged(who, server_admin) {
            Ok(())
        } else {
            Err(EngineError::NotOwner)
        }
    }

    /// Deliver a line to every member except `skip`, dropping members whose
    /// sessions are gone. Returns the names that were dropped.
    fn broadcast(&mut self, line: &str, skip: Option<&str>) -> Vec<String> {
        let mut dead = Vec::new();
        for (name, sender) in &self.members {
            if skip == Some(name.as_str()) {
                continue;
            }
            if sender.send(Outbound::Line(line.to_string())).is_err() {
                dead.push(name.clone());
            }
        }
        for name in &dead {
            self.members.remove(name);
        }
        dead
    }

    fn evict_ring(&mut self) {
        while self.ring.len() > self.buffer_size {
            self.ring.pop_front();
        }
    }

    /// Remove a member and tell their session the focus is gone. The notice
    /// names this channel so a session already focused elsewhere ignores it.
    fn drop_member(&mut self, account: &str, notice: String) -> bool {
        if let Some(sender) = self.members.remove(account) {
            let _ = sender.send(Outbound::FocusDropped {
                channel: self.name.clone(),
                notice,
            });
            true
        } else {
            false
        }
    }

    async fn handle_event(&mut self, event: ChannelEvent) -> ControlFlow<()> {
        match event {
            ChannelEvent::Join {
                account,
                sender,
                password,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_join(account, sender, password));
            }
            ChannelEvent::Leave { account, reply_tx } => {
                let was_member = self.members.remove(&account).is_some();
                if was_member {
                    self.broadcast(&format!("** {account} left"), None);
                }
                let _ = reply_tx.send(was_member);
            }
            ChannelEvent::Post {
                author,
                body,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_post(author, body).await);
            }
            ChannelEvent::Whisper {
                from,
                to,
                body,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_whisper(&from, &to, &body));
            }
            ChannelEvent::AddInvite { to, reply_tx } => {
                self.invited.insert(to);
                let _ = reply_tx.send(());
            }
            ChannelEvent::Ban {
                by,
                server_admin,
                target,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_ban(&by, server_admin, target).await);
            }
            ChannelEvent::Unban {
                by,
                server_admin,
                target,
                reply_tx,
            } => {
                let result = match self.require_privilege(&by, server_admin) {
                    Ok(()) => match self.db.moderation().remove_ban(self.id, &target).await {
                        Ok(()) => {
                            self.bans.remove(&target);
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(e),
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::ListBans {
                by,
                server_admin,
                reply_tx,
            } => {
                let result = self
                    .require_privilege(&by, server_admin)
                    .map(|()| self.bans.iter().cloned().collect());
                let _ = reply_tx.send(result);
            }
            ChannelEvent::Mute {
                owner,
                target,
                reply_tx,
            } => {
                let result = if owner == target {
                    Err(EngineError::InvalidConfiguration(
                        "you cannot mute yourself".to_string(),
                    ))
                } else {
                    match self.db.moderation().add_mute(self.id, &owner, &target).await {
                        Ok(()) => {
                            self.mutes.entry(owner).or_default().insert(target);
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::Unmute {
                owner,
                target,
                reply_tx,
            } => {
                let result = match self
                    .db
                    .moderation()
                    .remove_mute(self.id, &owner, &target)
                    .await
                {
                    Ok(()) => {
                        if let Some(set) = self.mutes.get_mut(&owner) {
                            set.remove(&target);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::ListMutes { owner, reply_tx } => {
                let muted = self
                    .mutes
                    .get(&owner)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                let _ = reply_tx.send(muted);
            }
            ChannelEvent::Kick {
                by,
                server_admin,
                target,
                reply_tx,
            } => {
                let result = match self.require_privilege(&by, server_admin) {
                    Ok(()) => {
                        let notice =
                            format!("** you were kicked from '{}' by {}", self.name, by);
                        let was_member = self.drop_member(&target, notice);
                        if was_member {
                            self.broadcast(&format!("** {target} was kicked by {by}"), None);
                        }
                        Ok(was_member)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::ListMembers {
                requester,
                reply_tx,
            } => {
                let muted_by_requester = self.mutes.get(&requester);
                let listing = self
                    .members
                    .keys()
                    .map(|name| {
                        let muted = muted_by_requester
                            .map(|set| set.contains(name))
                            .unwrap_or(false);
                        (name.clone(), muted)
                    })
                    .collect();
                let _ = reply_tx.send(listing);
            }
            ChannelEvent::Summary { reply_tx } => {
                let _ = reply_tx.send(ChannelSummary {
                    name: self.name.clone(),
                    owner: self.owner_name.clone(),
                    admin_name: self.admin_name.clone(),
                    status: self.status,
                    buffer_size: self.buffer_size,
                    replay_size: self.replay_size,
                    member_count: self.members.len(),
                    retained: self.ring.len(),
                    has_password: self.password.is_some(),
                });
            }
            ChannelEvent::SetPassword {
                by,
                server_admin,
                password,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_set_password(&by, server_admin, password).await);
            }
            ChannelEvent::SetBuffer {
                by,
                server_admin,
                size,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_set_buffer(&by, server_admin, size).await);
            }
            ChannelEvent::SetReplay {
                by,
                server_admin,
                size,
                reply_tx,
            } => {
                let _ = reply_tx.send(self.handle_set_replay(&by, server_admin, size).await);
            }
            ChannelEvent::SetStatus {
                by,
                server_admin,
                status,
                reply_tx,
            } => {
                let result = match self.require_privilege(&by, server_admin) {
                    Ok(()) => match self
                        .db
                        .channels()
                        .update_status(self.id, status.as_str())
                        .await
                    {
                        Ok(()) => {
                            self.status = status;
                            self.broadcast(
                                &format!("** '{}' is now {}", self.name, status.as_str()),
                                None,
                            );
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(e),
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::SetDelegate {
                by,
                delegate,
                reply_tx,
            } => {
                // Delegation is the one owner-only operation; not even a
                // server administrator may reassign it.
                let result = if by != self.owner_name {
                    Err(EngineError::NotOwner)
                } else {
                    match self
                        .db
                        .channels()
                        .update_admin_name(self.id, delegate.as_deref())
                        .await
                    {
                        Ok(()) => {
                            self.admin_name = delegate;
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::Purge {
                by,
                server_admin,
                reply_tx,
            } => {
                let result = match self.require_privilege(&by, server_admin) {
                    Ok(()) => match self.db.channels().purge_lines(self.id).await {
                        Ok(()) => {
                            self.ring.clear();
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(e),
                };
                let _ = reply_tx.send(result);
            }
            ChannelEvent::Evict { account, notice } => {
                if self.drop_member(&account, notice) {
                    self.broadcast(&format!("** {account} left"), None);
                }
            }
            ChannelEvent::ScrubAccount { account } => {
                if self.members.remove(&account).is_some() {
                    self.broadcast(&format!("** {account} left"), None);
                }
                self.bans.remove(&account);
                self.invited.remove(&account);
                self.mutes.remove(&account);
                for set in self.mutes.values_mut() {
                    set.remove(&account);
                }
                if self.admin_name.as_deref() == Some(account.as_str()) {
                    self.admin_name = None;
                }
            }
            ChannelEvent::Delete {
                by,
                server_admin,
                reply_tx,
            } => {
                if let Err(e) = self.require_privilege(&by, server_admin) {
                    let _ = reply_tx.send(Err(e));
                } else {
                    let notice = format!("** channel '{}' was deleted", self.name);
                    let names: Vec<String> = self.members.keys().cloned().collect();
                    for name in names {
                        self.drop_member(&name, notice.clone());
                    }
                    let _ = reply_tx.send(Ok(()));
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_join(
        &mut self,
        account: String,
        sender: OutboundSender,
        password: Option<String>,
    ) -> EngineResult<()> {
        if self.bans.contains(&account) {
            return Err(EngineError::Banned);
        }

        // An invitation opens the door past the lock and the password, but
        // never past a ban. It is consumed on success.
        let invited = self.invited.contains(&account);

        if !invited {
            if self.status != ChannelStatus::Open {
                return Err(EngineError::ChannelLocked);
            }
            if let Some((salt, digest)) = &self.password {
                match password {
                    Some(given) if self.hasher.verify(&given, salt, digest) => {}
                    _ => return Err(EngineError::BadChannelPassword),
                }
            }
        } else if self.status == ChannelStatus::Archived {
            // Archived channels admit nobody, invited or not.
            return Err(EngineError::ChannelLocked);
        }

        self.invited.remove(&account);

        // Banner, then replay oldest-first, then the live marker: everything
        // is queued to the joiner before the membership insert below, so no
        // later fan-out can interleave with the replay.
        let mut greeting = vec![format!(
            "** joined '{}' as {} ({} here)",
            self.name,
            account,
            self.members.len() + 1
        )];
        let replay_from = self.ring.len().saturating_sub(self.replay_size);
        for line in self.ring.iter().skip(replay_from) {
            greeting.push(line.render());
        }
        greeting.push(format!(
            "** '{}' is live; :help for commands, :exit to leave",
            self.name
        ));
        for line in greeting {
            let _ = sender.send(Outbound::Line(line));
        }

        self.members.insert(account.clone(), sender);
        self.broadcast(&format!("** {account} joined"), Some(&account));
        Ok(())
    }

    async fn handle_post(&mut self, author: String, body: String) -> EngineResult<()> {
        if !self.members.contains_key(&author) {
            return Err(EngineError::NotAMember);
        }
        if self.bans.contains(&author) {
            return Err(EngineError::Banned);
        }
        if self.status == ChannelStatus::Archived {
            return Err(EngineError::ChannelArchived);
        }

        let sent_at = chrono::Utc::now().timestamp();
        self.db
            .channels()
            .append_line(self.id, &author, &body)
            .await?;

        let line = ChannelLine {
            author: author.clone(),
            body,
            sent_at,
        };
        let rendered = line.render();
        self.ring.push_back(line);
        self.evict_ring();

        // Fan out, honoring each recipient's mute set. Authors always see
        // their own lines, muted or not.
        let mut dead = Vec::new();
        for (name, sender) in &self.members {
            if name != &author
                && self
                    .mutes
                    .get(name)
                    .map(|set| set.contains(&author))
                    .unwrap_or(false)
            {
                continue;
            }
            if sender.send(Outbound::Line(rendered.clone())).is_err() {
                dead.push(name.clone());
            }
        }
        for name in &dead {
            self.members.remove(name);
        }
        Ok(())
    }

    fn handle_whisper(&mut self, from: &str, to: &str, body: &str) -> WhisperOutcome {
        let target_muted_sender = self
            .mutes
            .get(to)
            .map(|set| set.contains(from))
            .unwrap_or(false);
        match self.members.get(to) {
            Some(sender) if !target_muted_sender => {
                let _ = sender.send(Outbound::Line(format!("{from} whispers: {body}")));
                WhisperOutcome::Delivered
            }
            _ => WhisperOutcome::Absent,
        }
    }

    async fn handle_ban(
        &mut self,
        by: &str,
        server_admin: bool,
        target: String,
    ) -> EngineResult<bool> {
        self.require_privilege(by, server_admin)?;
        self.db.moderation().add_ban(self.id, &target).await?;
        self.bans.insert(target.clone());
        self.invited.remove(&target);

        let notice = format!("** you were banned from '{}' by {}", self.name, by);
        let was_member = self.drop_member(&target, notice);
        if was_member {
            self.broadcast(&format!("** {target} was banned by {by}"), None);
        }
        Ok(was_member)
    }

    async fn handle_set_password(
        &mut self,
        by: &str,
        server_admin: bool,
        password: Option<String>,
    ) -> EngineResult<()> {
        self.require_privilege(by, server_admin)?;
        match password {
            Some(plaintext) => {
                let secret = self.hasher.derive(&plaintext)?;
                self.db
                    .channels()
                    .update_password(self.id, Some(&secret.salt), Some(&secret.digest))
                    .await?;
                self.password = Some((secret.salt, secret.digest));
            }
            None => {
                self.db.channels().update_password(self.id, None, None).await?;
                self.password = None;
            }
        }
        Ok(())
    }

    async fn handle_set_buffer(
        &mut self,
        by: &str,
        server_admin: bool,
        size: usize,
    ) -> EngineResult<()> {
        self.require_privilege(by, server_admin)?;
        if size == 0 || size > self.max_buffer {
            return Err(EngineError::InvalidConfiguration(format!(
                "buffer size must be between 1 and {}",
                self.max_buffer
            )));
        }
        if size < self.replay_size {
            return Err(EngineError::InvalidConfiguration(format!(
                "buffer size {} is smaller than replay size {}",
                size, self.replay_size
            )));
        }
        self.db
            .channels()
            .update_sizes(self.id, size as i64, self.replay_size as i64)
            .await?;
        self.buffer_size = size;
        self.evict_ring();
        Ok(())
    }

    async fn handle_set_replay(
        &mut self,
        by: &str,
        server_admin: bool,
        size: usize,
    ) -> EngineResult<()> {
        self.require_privilege(by, server_admin)?;
        if size == 0 || size > self.buffer_size {
            return Err(EngineError::InvalidConfiguration(format!(
                "replay size must be between 1 and the buffer size ({})",
                self.buffer_size
            )));
        }
        self.db
            .channels()
            .update_sizes(self.id, self.buffer_size as i64, size as i64)
            .await?;
        self.replay_size = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Argon2Hasher;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        db: Database,
        record: ChannelRecord,
    }

    async fn fixture() -> Fixture {
        let db = Database::new(":memory:").await.unwrap();
        let group: i64 = sqlx::query_scalar("SELECT id FROM privilege_groups WHERE name = 'users'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let owner = db
            .accounts()
            .create("owner", "s", "d", group)
            .await
            .unwrap();
        let record = db
            .channels()
            .create("lobby", owner.id, None, None, 100, 10)
            .await
            .unwrap();
        Fixture { db, record }
    }

    fn spawn_default(fx: &Fixture) -> ChannelHandle {
        ChannelActor::spawn(
            &fx.record,
            "owner".to_string(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            fx.db.clone(),
            Arc::new(Argon2Hasher),
            10_000,
        )
    }

    fn session() -> (OutboundSender, UnboundedReceiver<Outbound>) {
        tokio::sync::mpsc::unbounded_channel()
    }

    async fn join(
        handle: &ChannelHandle,
        account: &str,
        sender: OutboundSender,
        password: Option<&str>,
    ) -> EngineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Join {
                account: account.to_string(),
                sender,
                password: password.map(String::from),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap()
    }

    async fn post(handle: &ChannelHandle, author: &str, body: &str) -> EngineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Post {
                author: author.to_string(),
                body: body.to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap()
    }

    fn drain_lines(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Line(line) => lines.push(line),
                Outbound::FocusDropped { notice, .. } => lines.push(notice),
                Outbound::Shutdown { notice } => lines.push(notice),
            }
        }
        lines
    }

    #[tokio::test]
    async fn join_then_post_reaches_members_in_order() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (alice_tx, mut alice_rx) = session();
        let (bob_tx, mut bob_rx) = session();
        join(&handle, "alice", alice_tx, None).await.unwrap();
        join(&handle, "bob", bob_tx, None).await.unwrap();

        post(&handle, "alice", "first").await.unwrap();
        post(&handle, "bob", "second").await.unwrap();

        let alice_lines = drain_lines(&mut alice_rx);
        assert!(alice_lines.contains(&"** bob joined".to_string()));
        let chat: Vec<&String> = alice_lines
            .iter()
            .filter(|l| !l.starts_with("**"))
            .collect();
        assert_eq!(chat, ["alice: first", "bob: second"]);

        // Authors receive their own posts.
        let bob_lines = drain_lines(&mut bob_rx);
        assert!(bob_lines.contains(&"bob: second".to_string()));
    }

    #[tokio::test]
    async fn replay_is_oldest_first_and_precedes_live() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (owner_tx, _owner_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();
        for i in 1..=15 {
            post(&handle, "owner", &format!("msg {i}")).await.unwrap();
        }

        let (late_tx, mut late_rx) = session();
        join(&handle, "late", late_tx, None).await.unwrap();
        post(&handle, "owner", "after-join").await.unwrap();

        let lines = drain_lines(&mut late_rx);
        // Banner, then the last 10 retained lines (replay_size), then the
        // live marker, then live traffic.
        assert!(lines[0].starts_with("** joined 'lobby'"));
        let replay: Vec<&String> = lines[1..11].iter().collect();
        assert_eq!(replay[0], "owner: msg 6");
        assert_eq!(replay[9], "owner: msg 15");
        assert!(lines[11].contains("is live"));
        assert_eq!(lines[12], "owner: after-join");
    }

    #[tokio::test]
    async fn ring_eviction_is_fifo() {
        let fx = fixture().await;
        // Shrink the buffer to 3 with replay 3.
        fx.db.channels().update_sizes(fx.record.id, 3, 3).await.unwrap();
        let record = fx.db.channels().find_by_name("lobby").await.unwrap().unwrap();
        let handle = ChannelActor::spawn(
            &record,
            "owner".to_string(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            fx.db.clone(),
            Arc::new(Argon2Hasher),
            10_000,
        );

        let (owner_tx, _owner_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();
        for i in 1..=5 {
            post(&handle, "owner", &format!("m{i}")).await.unwrap();
        }

        let (late_tx, mut late_rx) = session();
        join(&handle, "late", late_tx, None).await.unwrap();
        let lines = drain_lines(&mut late_rx);
        let replay: Vec<&String> = lines
            .iter()
            .filter(|l| !l.starts_with("**"))
            .collect();
        assert_eq!(replay, ["owner: m3", "owner: m4", "owner: m5"]);
    }

    #[tokio::test]
    async fn mutes_filter_delivery_but_not_authors_own_copy() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (alice_tx, mut alice_rx) = session();
        let (bob_tx, mut bob_rx) = session();
        join(&handle, "alice", alice_tx, None).await.unwrap();
        join(&handle, "bob", bob_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Mute {
                owner: "alice".to_string(),
                target: "bob".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        post(&handle, "bob", "can you hear me").await.unwrap();
        post(&handle, "alice", "talking to myself").await.unwrap();

        let alice_lines = drain_lines(&mut alice_rx);
        assert!(!alice_lines.iter().any(|l| l.contains("can you hear me")));
        assert!(alice_lines.contains(&"alice: talking to myself".to_string()));

        // Bob still sees everything, including his own line.
        let bob_lines = drain_lines(&mut bob_rx);
        assert!(bob_lines.contains(&"bob: can you hear me".to_string()));
        assert!(bob_lines.contains(&"alice: talking to myself".to_string()));
    }

    #[tokio::test]
    async fn ban_kicks_current_member_and_blocks_rejoin() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (owner_tx, _owner_rx) = session();
        let (troll_tx, mut troll_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();
        join(&handle, "troll", troll_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Ban {
                by: "owner".to_string(),
                server_admin: false,
                target: "troll".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().unwrap());

        let troll_lines = drain_lines(&mut troll_rx);
        assert!(troll_lines.iter().any(|l| l.contains("you were banned")));

        // Posting now fails closed even though the ban already severed
        // membership.
        let err = post(&handle, "troll", "hello?").await.unwrap_err();
        assert_eq!(err.error_code(), "not_a_member");

        let (retry_tx, _retry_rx) = session();
        let err = join(&handle, "troll", retry_tx, None).await.unwrap_err();
        assert_eq!(err.error_code(), "banned");

        // The ban row survives in the store.
        assert_eq!(
            fx.db.moderation().bans_for(fx.record.id).await.unwrap(),
            vec!["troll"]
        );
    }

    #[tokio::test]
    async fn ban_requires_privilege() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (peon_tx, _peon_rx) = session();
        join(&handle, "peon", peon_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Ban {
                by: "peon".to_string(),
                server_admin: false,
                target: "owner".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        let err = reply_rx.await.unwrap().unwrap_err();
        assert_eq!(err.error_code(), "not_owner");
    }

    #[tokio::test]
    async fn password_and_lock_gate_joins_but_invites_pass() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (owner_tx, _owner_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetPassword {
                by: "owner".to_string(),
                server_admin: false,
                password: Some("sesame".to_string()),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        let (a_tx, _a_rx) = session();
        let err = join(&handle, "alice", a_tx, None).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_channel_password");

        let (b_tx, _b_rx) = session();
        let err = join(&handle, "alice", b_tx, Some("wrong")).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_channel_password");

        let (c_tx, _c_rx) = session();
        join(&handle, "alice", c_tx, Some("sesame")).await.unwrap();

        // Lock the channel; a fresh join fails, an invited one passes.
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetStatus {
                by: "owner".to_string(),
                server_admin: false,
                status: ChannelStatus::Locked,
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        let (d_tx, _d_rx) = session();
        let err = join(&handle, "bob", d_tx, None).await.unwrap_err();
        assert_eq!(err.error_code(), "channel_locked");

        let (inv_tx, inv_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::AddInvite {
                to: "bob".to_string(),
                reply_tx: inv_tx,
            })
            .await
            .unwrap();
        inv_rx.await.unwrap();

        let (e_tx, _e_rx) = session();
        join(&handle, "bob", e_tx, None).await.unwrap();

        // The invitation was single-use.
        let (f_tx, _f_rx) = session();
        let err = join(&handle, "bob", f_tx, None).await.unwrap_err();
        assert_eq!(err.error_code(), "channel_locked");
    }

    #[tokio::test]
    async fn archived_channels_refuse_posts() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (owner_tx, _owner_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetStatus {
                by: "owner".to_string(),
                server_admin: false,
                status: ChannelStatus::Archived,
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        let err = post(&handle, "owner", "anyone?").await.unwrap_err();
        assert_eq!(err.error_code(), "channel_archived");
    }

    #[tokio::test]
    async fn delegate_gains_privilege_but_cannot_redelegate() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (owner_tx, _owner_rx) = session();
        let (mod_tx, _mod_rx) = session();
        join(&handle, "owner", owner_tx, None).await.unwrap();
        join(&handle, "mod", mod_tx, None).await.unwrap();

        // A random member cannot delegate.
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetDelegate {
                by: "mod".to_string(),
                delegate: Some("mod".to_string()),
                reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap_err().error_code(), "not_owner");

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetDelegate {
                by: "owner".to_string(),
                delegate: Some("mod".to_string()),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        // The delegate can now kick.
        let (victim_tx, _victim_rx) = session();
        join(&handle, "victim", victim_tx, None).await.unwrap();
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Kick {
                by: "mod".to_string(),
                server_admin: false,
                target: "victim".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn whisper_respects_target_mutes() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (a_tx, _a_rx) = session();
        let (b_tx, mut b_rx) = session();
        join(&handle, "alice", a_tx, None).await.unwrap();
        join(&handle, "bob", b_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Whisper {
                from: "alice".to_string(),
                to: "bob".to_string(),
                body: "psst".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap(), WhisperOutcome::Delivered);
        assert!(drain_lines(&mut b_rx).contains(&"alice whispers: psst".to_string()));

        // Bob mutes alice; the next whisper must fall back.
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Mute {
                owner: "bob".to_string(),
                target: "alice".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Whisper {
                from: "alice".to_string(),
                to: "bob".to_string(),
                body: "psst again".to_string(),
                reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap(), WhisperOutcome::Absent);
    }

    #[tokio::test]
    async fn shrinking_buffer_below_replay_is_invalid() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::SetBuffer {
                by: "owner".to_string(),
                server_admin: false,
                size: 5,
                reply_tx,
            })
            .await
            .unwrap();
        let err = reply_rx.await.unwrap().unwrap_err();
        assert_eq!(err.error_code(), "invalid_configuration");
    }

    #[tokio::test]
    async fn delete_notifies_members_and_stops_the_actor() {
        let fx = fixture().await;
        let handle = spawn_default(&fx);

        let (a_tx, mut a_rx) = session();
        join(&handle, "alice", a_tx, None).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ChannelEvent::Delete {
                by: "owner".to_string(),
                server_admin: false,
                reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        let lines = drain_lines(&mut a_rx);
        assert!(lines.iter().any(|l| l.contains("was deleted")));

        // The mailbox closes once the actor stops.
        let (reply_tx, _reply_rx) = oneshot::channel();
        let send_result = handle
            .tx
            .send(ChannelEvent::Summary { reply_tx })
            .await;
        assert!(send_result.is_err());
    }
}
