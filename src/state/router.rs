//! Message routing: channel posts and whispers through the channel actors,
//! plus the persistent inbox with live-recipient notification.

use crate::db::InboxRecord;
use crate::error::{EngineError, EngineResult};
use crate::state::{ChannelEvent, Engine, WhisperOutcome};

impl Engine {
    // ------------------------------------------------------------------
    // Channel traffic
    // ------------------------------------------------------------------

    /// Append, evict, and fan out one channel line. Total order per channel
    /// comes from the actor's mailbox.
    pub async fn post_channel_message(
        &self,
        channel: &str,
        author: &str,
        body: &str,
    ) -> EngineResult<()> {
        self.channel_request(channel, |reply_tx| ChannelEvent::Post {
            author: author.to_string(),
            body: body.to_string(),
            reply_tx,
        })
        .await?
    }

    /// Direct line to a co-present member; the caller handles the inbox
    /// fallback on [`WhisperOutcome::Absent`].
    pub async fn whisper(
        &self,
        channel: &str,
        from: &str,
        to: &str,
        body: &str,
    ) -> EngineResult<WhisperOutcome> {
        self.channel_request(channel, |reply_tx| ChannelEvent::Whisper {
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            reply_tx,
        })
        .await
    }

    /// Record a one-shot invitation with the channel actor.
    pub async fn invite_to_channel(&self, channel: &str, invitee: &str) -> EngineResult<()> {
        self.channel_request(channel, |reply_tx| ChannelEvent::AddInvite {
            to: invitee.to_string(),
            reply_tx,
        })
        .await
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    /// Persist an inbox message and nudge the recipient's live session when
    /// one exists.
    pub async fn send_inbox_message(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> EngineResult<()> {
        let record = self
            .db
            .accounts()
            .find_by_name(recipient)
            .await?
            .ok_or_else(|| EngineError::UnknownRecipient(recipient.to_string()))?;
        self.db.inbox().insert(record.id, sender, body).await?;
        self.notify_account(recipient, format!("** new inbox message from {sender}"));
        Ok(())
    }

    /// Inbox contents, unread first, newest first within each bucket. The
    /// positions in this listing are the indexes `read` and `delete` take.
    pub async fn inbox_listing(&self, owner_id: i64) -> EngineResult<Vec<InboxRecord>> {
        Ok(self.db.inbox().list_for(owner_id).await?)
    }

    pub async fn inbox_unread_count(&self, owner_id: i64) -> EngineResult<i64> {
        Ok(self.db.inbox().unread_count(owner_id).await?)
    }

    /// Fetch a message by its current listing index (1-based) and clear its
    /// unread flag.
    pub async fn read_inbox_message(
        &self,
        owner_id: i64,
        index: usize,
    ) -> EngineResult<InboxRecord> {
        let record = self.inbox_at(owner_id, index).await?;
        self.db.inbox().mark_read(record.id).await?;
        Ok(record)
    }

    /// Clear the unread flag of a message the reader owns.
    pub async fn mark_read(&self, message_id: i64, reader_id: i64) -> EngineResult<()> {
        let record = self
            .db
            .inbox()
            .get(message_id)
            .await?
            .ok_or(EngineError::NotOwner)?;
        if record.recipient_id != reader_id {
            return Err(EngineError::NotOwner);
        }
        self.db.inbox().mark_read(message_id).await?;
        Ok(())
    }

    /// Delete a message by its current listing index (1-based).
    pub async fn delete_inbox_message(&self, owner_id: i64, index: usize) -> EngineResult<()> {
        let record = self.inbox_at(owner_id, index).await?;
        self.db.inbox().delete(record.id).await?;
        Ok(())
    }

    /// Empty the inbox.
    pub async fn delete_all_inbox(&self, owner_id: i64) -> EngineResult<()> {
        self.db.inbox().delete_all(owner_id).await?;
        Ok(())
    }

    async fn inbox_at(&self, owner_id: i64, index: usize) -> EngineResult<InboxRecord> {
        let listing = self.db.inbox().list_for(owner_id).await?;
        index
            .checked_sub(1)
            .and_then(|i| listing.into_iter().nth(i))
            .ok_or_else(|| {
                EngineError::InvalidConfiguration(format!("no message at index {index}"))
            })
    }
}
