//! Moderation repository: blocked addresses, channel bans, per-owner mutes.

use super::DbError;
use sqlx::SqlitePool;

/// Repository for moderation state.
pub struct ModerationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ModerationRepository<'a> {
    /// Create a new moderation repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Blocked addresses
    // ------------------------------------------------------------------

    /// Every blocked address.
    pub async fn blocked_addresses(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT address FROM blocked_clients ORDER BY address",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    /// Block an address; already-blocked is a no-op.
    pub async fn block_address(&self, address: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO blocked_clients (address) VALUES (?)")
            .bind(address)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Unblock an address; not-blocked is a no-op.
    pub async fn unblock_address(&self, address: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM blocked_clients WHERE address = ?")
            .bind(address)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel bans
    // ------------------------------------------------------------------

    /// Banned account names for a channel, name order.
    pub async fn bans_for(&self, channel_id: i64) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT account_name FROM channel_bans WHERE channel_id = ? ORDER BY account_name",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Ban a name; banning twice is a no-op.
    pub async fn add_ban(&self, channel_id: i64, account_name: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO channel_bans (channel_id, account_name) VALUES (?, ?)")
            .bind(channel_id)
            .bind(account_name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Lift a ban; absent ban is a no-op.
    pub async fn remove_ban(&self, channel_id: i64, account_name: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_bans WHERE channel_id = ? AND account_name = ?")
            .bind(channel_id)
            .bind(account_name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-owner mutes
    // ------------------------------------------------------------------

    /// Every (owner, muted) pair for a channel.
    pub async fn mutes_for(&self, channel_id: i64) -> Result<Vec<(String, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT owner_name, muted_name FROM channel_mutes WHERE channel_id = ? \
             ORDER BY owner_name, muted_name",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Record a mute; muting twice is a no-op.
    pub async fn add_mute(
        &self,
        channel_id: i64,
        owner_name: &str,
        muted_name: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO channel_mutes (channel_id, owner_name, muted_name) \
             VALUES (?, ?, ?)",
        )
        .bind(channel_id)
        .bind(owner_name)
        .bind(muted_name)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Clear a mute; absent mute is a no-op.
    pub async fn remove_mute(
        &self,
        channel_id: i64,
        owner_name: &str,
        muted_name: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "DELETE FROM channel_mutes WHERE channel_id = ? AND owner_name = ? AND muted_name = ?",
        )
        .bind(channel_id)
        .bind(owner_name)
        .bind(muted_name)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Scrub every ban and mute row naming a deleted account.
    pub async fn clear_account(&self, account_name: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_bans WHERE account_name = ?")
            .bind(account_name)
            .execute(self.pool)
            .await?;
        sqlx::query("DELETE FROM channel_mutes WHERE owner_name = ? OR muted_name = ?")
            .bind(account_name)
            .bind(account_name)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
