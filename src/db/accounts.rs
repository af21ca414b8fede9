//! Account repository: registration rows, credentials, and contacts.

use super::DbError;
use sqlx::SqlitePool;

/// A registered account row.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: i64,
    pub name: String,
    pub password_salt: String,
    pub password_hash: String,
    pub group_id: i64,
    pub forgiven: i64,
    pub registered_at: i64,
}

const ACCOUNT_COLUMNS: &str =
    "id, name, password_salt, password_hash, group_id, forgiven, registered_at";

type AccountRow = (i64, String, String, String, i64, i64, i64);

fn record_from_row(row: AccountRow) -> AccountRecord {
    AccountRecord {
        id: row.0,
        name: row.1,
        password_salt: row.2,
        password_hash: row.3,
        group_id: row.4,
        forgiven: row.5,
        registered_at: row.6,
    }
}

/// Repository for account operations.
pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    /// Create a new account repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new account with pre-derived credentials.
    pub async fn create(
        &self,
        name: &str,
        password_salt: &str,
        password_hash: &str,
        group_id: i64,
    ) -> Result<AccountRecord, DbError> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (name, password_salt, password_hash, group_id, forgiven, registered_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(name)
        .bind(password_salt)
        .bind(password_hash)
        .bind(group_id)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::AccountExists(name.to_string());
            }
            DbError::from(e)
        })?;

        Ok(AccountRecord {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            password_salt: password_salt.to_string(),
            password_hash: password_hash.to_string(),
            group_id,
            forgiven: 0,
            registered_at: now,
        })
    }

    /// Look up an account by exact name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, DbError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    /// Look up an account by id.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<AccountRecord>, DbError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    /// All accounts, name order.
    pub async fn all(&self) -> Result<Vec<AccountRecord>, DbError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY name"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Number of registered accounts.
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Replace an account's credentials.
    pub async fn update_password(
        &self,
        id: i64,
        password_salt: &str,
        password_hash: &str,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE accounts SET password_salt = ?, password_hash = ? WHERE id = ?")
            .bind(password_salt)
            .bind(password_hash)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Reassign an account's privilege group.
    pub async fn update_group(&self, id: i64, group_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE accounts SET group_id = ? WHERE id = ?")
            .bind(group_id)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Bump the abuse counter, returning the new value.
    pub async fn increment_forgiven(&self, id: i64) -> Result<i64, DbError> {
        sqlx::query("UPDATE accounts SET forgiven = forgiven + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        let forgiven: i64 = sqlx::query_scalar("SELECT forgiven FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool)
            .await?;
        Ok(forgiven)
    }

    /// Reset the abuse counter.
    pub async fn reset_forgiven(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE accounts SET forgiven = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete an account row; contacts and inbox rows cascade.
    pub async fn delete(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Add a contact edge; adding one that exists is a no-op.
    pub async fn add_contact(&self, owner_id: i64, friend_id: i64) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO contacts (owner_id, friend_id) VALUES (?, ?)")
            .bind(owner_id)
            .bind(friend_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Remove a contact edge; removing a missing one is a no-op.
    pub async fn remove_contact(&self, owner_id: i64, friend_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM contacts WHERE owner_id = ? AND friend_id = ?")
            .bind(owner_id)
            .bind(friend_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Contact names for an owner, name order.
    pub async fn contacts_of(&self, owner_id: i64) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT a.name FROM contacts c
            JOIN accounts a ON a.id = c.friend_id
            WHERE c.owner_id = ?
            ORDER BY a.name
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Delete every contact edge owned by the account.
    pub async fn clear_contacts(&self, owner_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM contacts WHERE owner_id = ?")
            .bind(owner_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
