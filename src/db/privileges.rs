//! Privilege-graph repository: groups and inheritance edges.
//!
//! Cycle checking happens in the in-memory graph before rows are written;
//! this layer only stores what it is told.

use super::DbError;
use sqlx::SqlitePool;

/// A privilege group row.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub id: i64,
    pub name: String,
}

/// Repository for privilege groups and edges.
pub struct PrivilegeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PrivilegeRepository<'a> {
    /// Create a new privilege repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// All groups, id order.
    pub async fn all_groups(&self) -> Result<Vec<GroupRecord>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM privilege_groups ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| GroupRecord { id, name })
            .collect())
    }

    /// All inheritance edges as (parent_id, child_id).
    pub async fn all_edges(&self) -> Result<Vec<(i64, i64)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT parent_id, child_id FROM privilege_edges ORDER BY parent_id, child_id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert a new group.
    pub async fn create_group(&self, name: &str) -> Result<GroupRecord, DbError> {
        let result = sqlx::query("INSERT INTO privilege_groups (name) VALUES (?)")
            .bind(name)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return DbError::GroupExists(name.to_string());
                }
                DbError::from(e)
            })?;
        Ok(GroupRecord {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Look up a group by name.
    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupRecord>, DbError> {
        let row =
            sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM privilege_groups WHERE name = ?")
                .bind(name)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.map(|(id, name)| GroupRecord { id, name }))
    }

    /// Insert an inheritance edge; duplicates are ignored.
    pub async fn add_edge(&self, parent_id: i64, child_id: i64) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO privilege_edges (parent_id, child_id) VALUES (?, ?)")
            .bind(parent_id)
            .bind(child_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Remove an inheritance edge; removing a missing one is a no-op.
    pub async fn remove_edge(&self, parent_id: i64, child_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM privilege_edges WHERE parent_id = ? AND child_id = ?")
            .bind(parent_id)
            .bind(child_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
