//! Inbox repository: offline messages with an unread flag.

use super::DbError;
use sqlx::SqlitePool;

/// A stored inbox message.
#[derive(Debug, Clone)]
pub struct InboxRecord {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_name: String,
    pub body: String,
    pub sent_at: i64,
    pub unread: bool,
}

type InboxRow = (i64, i64, String, String, i64, i64);

fn record_from_row(row: InboxRow) -> InboxRecord {
    InboxRecord {
        id: row.0,
        recipient_id: row.1,
        sender_name: row.2,
        body: row.3,
        sent_at: row.4,
        unread: row.5 != 0,
    }
}

/// Repository for inbox operations.
pub struct InboxRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InboxRepository<'a> {
    /// Create a new inbox repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a message for a recipient, marked unread.
    pub async fn insert(
        &self,
        recipient_id: i64,
        sender_name: &str,
        body: &str,
    ) -> Result<InboxRecord, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO inbox_messages (recipient_id, sender_name, body, sent_at, unread) \
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(recipient_id)
        .bind(sender_name)
        .bind(body)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(InboxRecord {
            id: result.last_insert_rowid(),
            recipient_id,
            sender_name: sender_name.to_string(),
            body: body.to_string(),
            sent_at: now,
            unread: true,
        })
    }

    /// A recipient's messages, unread first, newest first within each group.
    pub async fn list_for(&self, recipient_id: i64) -> Result<Vec<InboxRecord>, DbError> {
        let rows = sqlx::query_as::<_, InboxRow>(
            "SELECT id, recipient_id, sender_name, body, sent_at, unread \
             FROM inbox_messages WHERE recipient_id = ? \
             ORDER BY unread DESC, id DESC",
        )
        .bind(recipient_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Fetch one message by id.
    pub async fn get(&self, id: i64) -> Result<Option<InboxRecord>, DbError> {
        let row = sqlx::query_as::<_, InboxRow>(
            "SELECT id, recipient_id, sender_name, body, sent_at, unread \
             FROM inbox_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    /// Clear the unread flag.
    pub async fn mark_read(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE inbox_messages SET unread = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete one message.
    pub async fn delete(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM inbox_messages WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete everything in a recipient's inbox.
    pub async fn delete_all(&self, recipient_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM inbox_messages WHERE recipient_id = ?")
            .bind(recipient_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Unread count for the post-login banner.
    pub async fn unread_count(&self, recipient_id: i64) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inbox_messages WHERE recipient_id = ? AND unread = 1",
        )
        .bind(recipient_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    async fn db_with_account() -> (Database, i64) {
        let db = Database::new(":memory:").await.unwrap();
        let group: i64 = sqlx::query_scalar("SELECT id FROM privilege_groups WHERE name = 'users'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let acct = db.accounts().create("a", "s", "d", group).await.unwrap();
        (db, acct.id)
    }

    #[tokio::test]
    async fn unread_sorts_before_read() {
        let (db, recipient) = db_with_account().await;
        let first = db.inbox().insert(recipient, "x", "one").await.unwrap();
        db.inbox().insert(recipient, "x", "two").await.unwrap();
        db.inbox().mark_read(first.id).await.unwrap();

        let list = db.inbox().list_for(recipient).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].unread);
        assert_eq!(list[0].body, "two");
        assert!(!list[1].unread);

        assert_eq!(db.inbox().unread_count(recipient).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_empties_inbox() {
        let (db, recipient) = db_with_account().await;
        db.inbox().insert(recipient, "x", "one").await.unwrap();
        db.inbox().insert(recipient, "y", "two").await.unwrap();
        db.inbox().delete_all(recipient).await.unwrap();
        assert!(db.inbox().list_for(recipient).await.unwrap().is_empty());
    }
}
