//! Complex task state storage repository.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::model::StateKey;
use crate::task::{AccountId, TaskMarker};
use crate::Result;

/// Repository for persisted complex task state and pending markers.
pub struct TaskStateRepository {
    pool: SqlitePool,
}

impl TaskStateRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        // `keyed` separates the single-object row from keyed-map rows, whose
        // key may legitimately be empty.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS complex_task_state (
                account_id INTEGER NOT NULL,
                task_type TEXT NOT NULL,
                keyed INTEGER NOT NULL DEFAULT 0,
                task_key TEXT NOT NULL DEFAULT '',
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, task_type, keyed, task_key)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS task_markers (
                account_id INTEGER NOT NULL,
                id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                marker TEXT NOT NULL,
                PRIMARY KEY (account_id, id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every state row as parallel key and value lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is not valid JSON.
    pub async fn load_state_rows(&self) -> Result<(Vec<StateKey>, Vec<serde_json::Value>)> {
        let rows = sqlx::query(
            r"
            SELECT account_id, task_type, keyed, task_key, value
            FROM complex_task_state
            ORDER BY account_id, task_type, keyed, task_key
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let keyed: bool = row.get("keyed");
            keys.push(StateKey {
                account_id: AccountId(row.get::<i64, _>("account_id")),
                task_type: row.get("task_type"),
                task_key: keyed.then(|| row.get("task_key")),
            });
            let value: String = row.get("value");
            values.push(serde_json::from_str(&value)?);
        }

        debug!("Loaded {} complex task state rows", keys.len());
        Ok((keys, values))
    }

    /// Commit a task's single-object state and marker changes together.
    ///
    /// `Some` markers are inserted or replaced, `None` markers are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written then.
    pub async fn commit(
        &self,
        account_id: AccountId,
        task_type: &str,
        state: Option<&serde_json::Value>,
        markers: &BTreeMap<String, Option<TaskMarker>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(state) = state {
            sqlx::query(
                r"
                INSERT INTO complex_task_state
                    (account_id, task_type, keyed, task_key, value, updated_at)
                VALUES (?, ?, 0, '', ?, ?)
                ON CONFLICT(account_id, task_type, keyed, task_key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                ",
            )
            .bind(account_id.0)
            .bind(task_type)
            .bind(serde_json::to_string(state)?)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for (id, marker) in markers {
            match marker {
                Some(marker) => {
                    sqlx::query(
                        r"
                        INSERT INTO task_markers (account_id, id, task_type, marker)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(account_id, id) DO UPDATE SET
                            task_type = excluded.task_type,
                            marker = excluded.marker
                        ",
                    )
                    .bind(account_id.0)
                    .bind(id)
                    .bind(&marker.task_type)
                    .bind(serde_json::to_string(marker)?)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM task_markers WHERE account_id = ? AND id = ?")
                        .bind(account_id.0)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load the persisted markers of an account, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a marker cannot be parsed.
    pub async fn load_markers(&self, account_id: AccountId) -> Result<Vec<TaskMarker>> {
        let rows = sqlx::query(
            r"
            SELECT marker FROM task_markers
            WHERE account_id = ?
            ORDER BY id
            ",
        )
        .bind(account_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut markers = Vec::with_capacity(rows.len());
        for row in &rows {
            let marker: String = row.get("marker");
            markers.push(serde_json::from_str(&marker)?);
        }
        Ok(markers)
    }

    /// Delete all state and markers of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove_account(&self, account_id: AccountId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM complex_task_state WHERE account_id = ?")
            .bind(account_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM task_markers WHERE account_id = ?")
            .bind(account_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Removed task state for account {}", account_id.0);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn marker(entity: &str) -> TaskMarker {
        TaskMarker::for_entity("store_flags", AccountId(1), entity)
    }

    #[tokio::test]
    async fn test_commit_and_load_state() {
        let repo = TaskStateRepository::in_memory().await.unwrap();
        let state = serde_json::json!({ "entity_changes": { "u1": { "add": ["\\Seen"], "remove": null } } });
        let mut markers = BTreeMap::new();
        markers.insert("store_flags:u1".to_string(), Some(marker("u1")));

        repo.commit(AccountId(1), "store_flags", Some(&state), &markers)
            .await
            .unwrap();

        let (keys, values) = repo.load_state_rows().await.unwrap();
        assert_eq!(keys, vec![StateKey::single(AccountId(1), "store_flags")]);
        assert_eq!(values, vec![state]);

        let loaded = repo.load_markers(AccountId(1)).await.unwrap();
        assert_eq!(loaded, vec![marker("u1")]);
    }

    #[tokio::test]
    async fn test_commit_replaces_state_and_removes_markers() {
        let repo = TaskStateRepository::in_memory().await.unwrap();
        let mut markers = BTreeMap::new();
        markers.insert("store_flags:u1".to_string(), Some(marker("u1")));
        markers.insert("store_flags:u2".to_string(), Some(marker("u2")));
        repo.commit(AccountId(1), "store_flags", Some(&serde_json::json!(1)), &markers)
            .await
            .unwrap();

        let mut removal = BTreeMap::new();
        removal.insert("store_flags:u1".to_string(), None);
        repo.commit(AccountId(1), "store_flags", Some(&serde_json::json!(2)), &removal)
            .await
            .unwrap();

        let (_, values) = repo.load_state_rows().await.unwrap();
        assert_eq!(values, vec![serde_json::json!(2)]);
        let loaded = repo.load_markers(AccountId(1)).await.unwrap();
        assert_eq!(loaded, vec![marker("u2")]);
    }

    #[tokio::test]
    async fn test_remove_account() {
        let repo = TaskStateRepository::in_memory().await.unwrap();
        let mut markers = BTreeMap::new();
        markers.insert("store_flags:u1".to_string(), Some(marker("u1")));
        repo.commit(AccountId(1), "store_flags", Some(&serde_json::json!({})), &markers)
            .await
            .unwrap();

        repo.remove_account(AccountId(1)).await.unwrap();

        let (keys, _) = repo.load_state_rows().await.unwrap();
        assert!(keys.is_empty());
        assert!(repo.load_markers(AccountId(1)).await.unwrap().is_empty());
    }
}
