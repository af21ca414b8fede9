//! Channel repository: channel rows and their retained chat lines.

use super::DbError;
use sqlx::SqlitePool;

/// A channel row.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub password_salt: Option<String>,
    pub password_hash: Option<String>,
    pub buffer_size: i64,
    pub replay_size: i64,
    pub status: String,
    pub admin_name: Option<String>,
    pub created_at: i64,
}

/// A retained chat line.
#[derive(Debug, Clone)]
pub struct ChannelLineRecord {
    pub id: i64,
    pub channel_id: i64,
    pub author: String,
    pub body: String,
    pub sent_at: i64,
}

const CHANNEL_COLUMNS: &str = "id, name, owner_id, password_salt, password_hash, \
     buffer_size, replay_size, status, admin_name, created_at";

type ChannelRow = (
    i64,
    String,
    i64,
    Option<String>,
    Option<String>,
    i64,
    i64,
    String,
    Option<String>,
    i64,
);

fn record_from_row(row: ChannelRow) -> ChannelRecord {
    ChannelRecord {
        id: row.0,
        name: row.1,
        owner_id: row.2,
        password_salt: row.3,
        password_hash: row.4,
        buffer_size: row.5,
        replay_size: row.6,
        status: row.7,
        admin_name: row.8,
        created_at: row.9,
    }
}

/// Repository for channel operations.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    /// Create a new channel repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new channel row.
    pub async fn create(
        &self,
        name: &str,
        owner_id: i64,
        password_salt: Option<&str>,
        password_hash: Option<&str>,
        buffer_size: i64,
        replay_size: i64,
    ) -> Result<ChannelRecord, DbError> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO channels
                (name, owner_id, password_salt, password_hash, buffer_size, replay_size, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'open', ?)
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .bind(password_salt)
        .bind(password_hash)
        .bind(buffer_size)
        .bind(replay_size)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::ChannelExists(name.to_string());
            }
            DbError::from(e)
        })?;

        Ok(ChannelRecord {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            owner_id,
            password_salt: password_salt.map(String::from),
            password_hash: password_hash.map(String::from),
            buffer_size,
            replay_size,
            status: "open".to_string(),
            admin_name: None,
            created_at: now,
        })
    }

    /// Look up a channel by name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ChannelRecord>, DbError> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    /// All channels, name order.
    pub async fn all(&self) -> Result<Vec<ChannelRecord>, DbError> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Channels owned by an account.
    pub async fn owned_by(&self, owner_id: i64) -> Result<Vec<ChannelRecord>, DbError> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE owner_id = ? ORDER BY name"
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Delete a channel row; lines, bans, and mutes cascade.
    pub async fn delete(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Replace the channel password (None clears it).
    pub async fn update_password(
        &self,
        id: i64,
        password_salt: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET password_salt = ?, password_hash = ? WHERE id = ?")
            .bind(password_salt)
            .bind(password_hash)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Update ring and replay sizing.
    pub async fn update_sizes(
        &self,
        id: i64,
        buffer_size: i64,
        replay_size: i64,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET buffer_size = ?, replay_size = ? WHERE id = ?")
            .bind(buffer_size)
            .bind(replay_size)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Update lifecycle status.
    pub async fn update_status(&self, id: i64, status: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Update the delegated administrator name (None clears it).
    pub async fn update_admin_name(&self, id: i64, admin_name: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET admin_name = ? WHERE id = ?")
            .bind(admin_name)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Clear a delegation wherever it names the given account.
    pub async fn clear_delegations_of(&self, account: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET admin_name = NULL WHERE admin_name = ?")
            .bind(account)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retained lines
    // ------------------------------------------------------------------

    /// Append a chat line, returning its id.
    pub async fn append_line(
        &self,
        channel_id: i64,
        author: &str,
        body: &str,
    ) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO channel_messages (channel_id, author, body, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(author)
        .bind(body)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The last `limit` retained lines, oldest first.
    pub async fn tail(
        &self,
        channel_id: i64,
        limit: i64,
    ) -> Result<Vec<ChannelLineRecord>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, i64)>(
            r#"
            SELECT id, channel_id, author, body, sent_at FROM (
                SELECT id, channel_id, author, body, sent_at
                FROM channel_messages
                WHERE channel_id = ?
                ORDER BY id DESC
                LIMIT ?
            ) ORDER BY id ASC
            "#,
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, channel_id, author, body, sent_at)| ChannelLineRecord {
                id,
                channel_id,
                author,
                body,
                sent_at,
            })
            .collect())
    }

    /// Drop every retained line for a channel.
    pub async fn purge_lines(&self, channel_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM channel_messages WHERE channel_id = ?")
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
