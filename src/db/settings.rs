//! Global settings repository: key/value pairs loaded at startup.

use super::DbError;
use sqlx::SqlitePool;

/// Repository for global settings.
pub struct SettingsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SettingsRepository<'a> {
    /// Create a new settings repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Every setting, key order.
    pub async fn all(&self) -> Result<Vec<(String, String)>, DbError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM global_settings ORDER BY key",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch one setting.
    pub async fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM global_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Insert or overwrite a setting.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO global_settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn set_overwrites() {
        let db = Database::new(":memory:").await.unwrap();
        db.settings().set("motd", "hello").await.unwrap();
        db.settings().set("motd", "world").await.unwrap();
        assert_eq!(
            db.settings().get("motd").await.unwrap().as_deref(),
            Some("world")
        );
        assert!(db.settings().get("absent").await.unwrap().is_none());
    }
}
