//! Channel registry: creation, restart rehydration, join plumbing,
//! deletion, and listings.

use crate::db::ChannelRecord;
use crate::error::{EngineError, EngineResult};
use crate::state::directory::{validate_name, AccountIdentity};
use crate::state::{ChannelEvent, ChannelHandle, ChannelSummary, Engine, OutboundSender};
use crate::state::channel::ChannelActor;
use tokio::sync::oneshot;
use tracing::{debug, warn};

impl Engine {
    /// Spawn an actor for every persisted channel. Called once at boot.
    pub(crate) async fn rehydrate_channels(&self) -> EngineResult<usize> {
        let records = self.db.channels().all().await?;
        let mut restored = 0;
        for record in records {
            let Some(owner) = self.db.accounts().find_by_id(record.owner_id).await? else {
                warn!(channel = %record.name, "Skipping channel with missing owner");
                continue;
            };
            self.spawn_channel(&record, owner.name).await?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Load a channel's moderation rows and retained tail, start its actor,
    /// and publish the handle.
    async fn spawn_channel(
        &self,
        record: &ChannelRecord,
        owner_name: String,
    ) -> EngineResult<ChannelHandle> {
        let bans = self.db.moderation().bans_for(record.id).await?;
        let mutes = self.db.moderation().mutes_for(record.id).await?;
        let tail = self.db.channels().tail(record.id, record.buffer_size).await?;

        let handle = ChannelActor::spawn(
            record,
            owner_name,
            tail,
            bans,
            mutes,
            self.db.clone(),
            self.hasher.clone(),
            self.limits.max_buffer_size,
        );
        self.channels.insert(record.name.clone(), handle.clone());
        debug!(channel = %record.name, "Channel actor online");
        Ok(handle)
    }

    pub fn channel_handle(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.get(name).map(|h| h.clone())
    }

    /// Join an existing channel, or create it with default sizing when the
    /// name is free, then join. The optional password is a join credential;
    /// a channel created this way starts without one.
    pub async fn open_channel(
        &self,
        account: &AccountIdentity,
        name: &str,
        password: Option<String>,
        sender: &OutboundSender,
    ) -> EngineResult<ChannelHandle> {
        if let Some(handle) = self.channel_handle(name) {
            self.join_via(&handle, &account.name, password, sender).await?;
            return Ok(handle);
        }

        let buffer = self.limits.default_buffer_size;
        let replay = self.limits.default_replay_size.min(buffer);
        match self
            .create_channel(account, name, buffer, replay, None, sender)
            .await
        {
            Err(EngineError::DuplicateName(_)) => {
                // Lost a creation race; the winner's handle appears as soon
                // as its spawn completes.
                for _ in 0..2 {
                    if let Some(handle) = self.channel_handle(name) {
                        self.join_via(&handle, &account.name, password, sender).await?;
                        return Ok(handle);
                    }
                    tokio::task::yield_now().await;
                }
                Err(EngineError::UnknownChannel(name.to_string()))
            }
            other => other,
        }
    }

    /// Explicit creation with caller-chosen sizing, then join. The creator
    /// becomes the owner.
    pub async fn create_channel(
        &self,
        owner: &AccountIdentity,
        name: &str,
        buffer_size: usize,
        replay_size: usize,
        password: Option<&str>,
        sender: &OutboundSender,
    ) -> EngineResult<ChannelHandle> {
        validate_name("channel", name)?;
        if buffer_size == 0 || buffer_size > self.limits.max_buffer_size {
            return Err(EngineError::InvalidConfiguration(format!(
                "buffer size must be between 1 and {}",
                self.limits.max_buffer_size
            )));
        }
        if replay_size == 0 || replay_size > buffer_size {
            return Err(EngineError::InvalidConfiguration(
                "replay size must be between 1 and the buffer size".to_string(),
            ));
        }

        let secret = match password {
            Some(plaintext) => Some(self.hasher.derive(plaintext)?),
            None => None,
        };
        let record = self
            .db
            .channels()
            .create(
                name,
                owner.id,
                secret.as_ref().map(|s| s.salt.as_str()),
                secret.as_ref().map(|s| s.digest.as_str()),
                buffer_size as i64,
                replay_size as i64,
            )
            .await
            .map_err(|e| match e {
                crate::db::DbError::ChannelExists(_) => {
                    EngineError::DuplicateName(name.to_string())
                }
                other => other.into(),
            })?;

        let handle = self.spawn_channel(&record, owner.name.clone()).await?;
        self.join_via(&handle, &owner.name, password.map(String::from), sender)
            .await?;
        Ok(handle)
    }

    /// Send a join through a channel mailbox and wait for the verdict.
    async fn join_via(
        &self,
        handle: &ChannelHandle,
        account: &str,
        password: Option<String>,
        sender: &OutboundSender,
    ) -> EngineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = ChannelEvent::Join {
            account: account.to_string(),
            sender: sender.clone(),
            password,
            reply_tx,
        };
        if handle.tx.send(event).await.is_err() {
            self.forget_channel(&handle.name);
            return Err(EngineError::UnknownChannel(handle.name.clone()));
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => {
                self.forget_channel(&handle.name);
                Err(EngineError::UnknownChannel(handle.name.clone()))
            }
        }
    }

    /// Leave a channel. Absent membership or a dead channel is a no-op.
    pub async fn leave_channel(&self, name: &str, account: &str) -> bool {
        let Some(handle) = self.channel_handle(name) else {
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = ChannelEvent::Leave {
            account: account.to_string(),
            reply_tx,
        };
        if handle.tx.send(event).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Delete a channel: the actor notifies and drops its members and stops,
    /// then the row goes away and the name becomes reusable.
    pub async fn delete_channel(&self, by: &AccountIdentity, name: &str) -> EngineResult<()> {
        let handle = self
            .channel_handle(name)
            .ok_or_else(|| EngineError::UnknownChannel(name.to_string()))?;
        let server_admin = self.is_server_admin(&by.group).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let event = ChannelEvent::Delete {
            by: by.name.clone(),
            server_admin,
            reply_tx,
        };
        if handle.tx.send(event).await.is_err() {
            self.forget_channel(name);
            return Err(EngineError::UnknownChannel(name.to_string()));
        }
        reply_rx
            .await
            .map_err(|_| EngineError::UnknownChannel(name.to_string()))??;

        self.db.channels().delete(handle.id).await?;
        self.forget_channel(name);
        Ok(())
    }

    /// Cascade path for account deletion: authorization was already decided
    /// by the caller.
    pub(crate) async fn remove_channel_internal(&self, name: &str, id: i64) -> EngineResult<()> {
        if let Some(handle) = self.channel_handle(name) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let event = ChannelEvent::Delete {
                by: String::new(),
                server_admin: true,
                reply_tx,
            };
            if handle.tx.send(event).await.is_ok() {
                let _ = reply_rx.await;
            }
        }
        self.forget_channel(name);
        self.db.channels().delete(id).await?;
        Ok(())
    }

    pub(crate) fn forget_channel(&self, name: &str) {
        self.channels.remove(name);
    }

    /// Request/response round trip with a channel actor. The closure builds
    /// the event around the reply sender; a dead mailbox surfaces as
    /// `UnknownChannel` and prunes the handle.
    pub(crate) async fn channel_request<T>(
        &self,
        channel: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> ChannelEvent,
    ) -> EngineResult<T> {
        let handle = self
            .channel_handle(channel)
            .ok_or_else(|| EngineError::UnknownChannel(channel.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.tx.send(make(reply_tx)).await.is_err() {
            self.forget_channel(channel);
            return Err(EngineError::UnknownChannel(channel.to_string()));
        }
        match reply_rx.await {
            Ok(value) => Ok(value),
            Err(_) => {
                self.forget_channel(channel);
                Err(EngineError::UnknownChannel(channel.to_string()))
            }
        }
    }

    /// Summaries of every live channel, name order. Dead handles are pruned
    /// on the way.
    pub async fn channel_summaries(&self) -> Vec<ChannelSummary> {
        let handles: Vec<ChannelHandle> =
            self.channels.iter().map(|entry| entry.clone()).collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .tx
                .send(ChannelEvent::Summary { reply_tx })
                .await
                .is_err()
            {
                self.forget_channel(&handle.name);
                continue;
            }
            match reply_rx.await {
                Ok(summary) => summaries.push(summary),
                Err(_) => self.forget_channel(&handle.name),
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::state::tests::test_engine;
    use crate::state::{ChannelStatus, Outbound};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type Sink = (OutboundSender, mpsc::UnboundedReceiver<Outbound>);

    fn sink() -> Sink {
        mpsc::unbounded_channel()
    }

    fn lines(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                Outbound::Line(line) => out.push(line),
                Outbound::FocusDropped { notice, .. } => out.push(notice),
                Outbound::Shutdown { notice } => out.push(notice),
            }
        }
        out
    }

    async fn registered(engine: &Arc<Engine>, name: &str) -> (AccountIdentity, Sink) {
        let (tx, rx) = sink();
        let id = engine
            .register_account(name, "pw", "10.1.1.1".parse().unwrap(), tx.clone())
            .await
            .unwrap();
        (id, (tx, rx))
    }

    #[tokio::test]
    async fn open_creates_when_free_then_joins_when_not() {
        let engine = test_engine().await;
        let (alice, (alice_tx, mut alice_rx)) = registered(&engine, "alice").await;
        let (bob, (bob_tx, mut bob_rx)) = registered(&engine, "bob").await;

        engine
            .open_channel(&alice, "lobby", None, &alice_tx)
            .await
            .unwrap();
        assert!(lines(&mut alice_rx)
            .iter()
            .any(|l| l.contains("joined 'lobby'")));

        engine
            .open_channel(&bob, "lobby", None, &bob_tx)
            .await
            .unwrap();
        assert!(lines(&mut bob_rx).iter().any(|l| l.contains("is live")));

        let summaries = engine.channel_summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "lobby");
        assert_eq!(summaries[0].owner, "alice");
        assert_eq!(summaries[0].member_count, 2);
        assert_eq!(summaries[0].status, ChannelStatus::Open);
    }

    #[tokio::test]
    async fn create_validates_sizing() {
        let engine = test_engine().await;
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;

        let err = engine
            .create_channel(&alice, "lobby", 5, 6, None, &alice_tx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_configuration");

        let err = engine
            .create_channel(&alice, "lobby", 0, 1, None, &alice_tx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_configuration");

        let err = engine
            .create_channel(&alice, "lobby", 1_000_000, 10, None, &alice_tx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_configuration");

        engine
            .create_channel(&alice, "lobby", 50, 5, Some("sesame"), &alice_tx)
            .await
            .unwrap();
        let err = engine
            .create_channel(&alice, "lobby", 50, 5, None, &alice_tx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "duplicate_name");
    }

    #[tokio::test]
    async fn password_protected_channel_requires_the_password_to_open() {
        let engine = test_engine().await;
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;
        let (bob, (bob_tx, _bob_rx)) = registered(&engine, "bob").await;

        engine
            .create_channel(&alice, "vault", 50, 5, Some("sesame"), &alice_tx)
            .await
            .unwrap();

        let err = engine
            .open_channel(&bob, "vault", None, &bob_tx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "bad_channel_password");

        engine
            .open_channel(&bob, "vault", Some("sesame".to_string()), &bob_tx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_requires_privilege_and_frees_the_name() {
        let engine = test_engine().await;
        // First account is an administrator; use the second as a plain owner.
        let (_root, _) = registered(&engine, "root").await;
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;
        let (bob, (bob_tx, mut bob_rx)) = registered(&engine, "bob").await;

        engine
            .open_channel(&alice, "lobby", None, &alice_tx)
            .await
            .unwrap();
        engine
            .open_channel(&bob, "lobby", None, &bob_tx)
            .await
            .unwrap();

        let err = engine.delete_channel(&bob, "lobby").await.unwrap_err();
        assert_eq!(err.error_code(), "not_owner");

        engine.delete_channel(&alice, "lobby").await.unwrap();
        assert!(lines(&mut bob_rx).iter().any(|l| l.contains("was deleted")));
        assert!(engine.channel_handle("lobby").is_none());
        assert!(engine
            .db()
            .channels()
            .find_by_name("lobby")
            .await
            .unwrap()
            .is_none());

        // The name is reusable.
        engine
            .open_channel(&bob, "lobby", None, &bob_tx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_admin_may_delete_any_channel() {
        let engine = test_engine().await;
        let (root, _) = registered(&engine, "root").await;
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;

        engine
            .open_channel(&alice, "lobby", None, &alice_tx)
            .await
            .unwrap();
        engine.delete_channel(&root, "lobby").await.unwrap();
        assert!(engine.channel_handle("lobby").is_none());
    }

    #[tokio::test]
    async fn deleting_an_account_deletes_its_channels() {
        let engine = test_engine().await;
        let (_root, _) = registered(&engine, "root").await;
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;
        let (bob, (bob_tx, mut bob_rx)) = registered(&engine, "bob").await;

        engine
            .open_channel(&alice, "alices-place", None, &alice_tx)
            .await
            .unwrap();
        engine
            .open_channel(&bob, "alices-place", None, &bob_tx)
            .await
            .unwrap();

        engine
            .delete_account("alice", "** your account was removed")
            .await
            .unwrap();

        assert!(engine.channel_handle("alices-place").is_none());
        assert!(lines(&mut bob_rx).iter().any(|l| l.contains("was deleted")));
        assert!(!engine.is_online("alice"));
    }

    #[tokio::test]
    async fn rings_survive_restart() {
        let config = Config::default();
        let db = Database::new(":memory:").await.unwrap();

        let engine = Engine::new(&config, db.clone()).await.unwrap();
        let (alice, (alice_tx, _alice_rx)) = registered(&engine, "alice").await;
        let handle = engine
            .open_channel(&alice, "lobby", None, &alice_tx)
            .await
            .unwrap();
        for i in 1..=3 {
            let (reply_tx, reply_rx) = oneshot::channel();
            handle
                .tx
                .send(ChannelEvent::Post {
                    author: "alice".to_string(),
                    body: format!("m{i}"),
                    reply_tx,
                })
                .await
                .unwrap();
            reply_rx.await.unwrap().unwrap();
        }

        // A second engine over the same store sees the retained tail.
        let rebooted = Engine::new(&config, db).await.unwrap();
        let (tx, rx) = sink();
        let bob = rebooted
            .register_account("bob", "pw", "10.1.1.2".parse().unwrap(), tx.clone())
            .await
            .unwrap();
        let mut rx = rx;
        rebooted
            .open_channel(&bob, "lobby", None, &tx)
            .await
            .unwrap();

        let replay: Vec<String> = lines(&mut rx)
            .into_iter()
            .filter(|l| !l.starts_with("**"))
            .collect();
        assert_eq!(replay, ["alice: m1", "alice: m2", "alice: m3"]);
    }
}
