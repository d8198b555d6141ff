//! SQLite key/value storage (feature-gated).

use std::{collections::HashMap, path::Path, str::FromStr, sync::RwLock};

use async_trait::async_trait;
use scratchpad_core::traits::{KeyValueStore, StorageError};
use serde_json::Value;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)";

/// SQLite storage implementation.
pub struct SqliteStore {
    pool: SqlitePool,
    mirror: RwLock<HashMap<String, Value>>,
}

fn db_err(e: &sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        Self::connect(&format!("sqlite://{}", path.display())).await
    }

    /// Connect using a `sqlite:` URL.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| db_err(&e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| db_err(&e))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| db_err(&e))?;

        let rows = sqlx::query("SELECT key, value FROM kv")
            .fetch_all(&pool)
            .await
            .map_err(|e| db_err(&e))?;

        let mut mirror = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(|e| db_err(&e))?;
            let raw: String = row.try_get("value").map_err(|e| db_err(&e))?;
            mirror.insert(key, serde_json::from_str(&raw)?);
        }

        Ok(Self {
            pool,
            mirror: RwLock::new(mirror),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.mirror.read().ok()?.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        match &value {
            Some(v) => {
                sqlx::query(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(serde_json::to_string(v)?)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err(&e))?;
            }
            None => {
                sqlx::query("DELETE FROM kv WHERE key = ?1")
                    .bind(key)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| db_err(&e))?;
            }
        }

        let mut mirror = self
            .mirror
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        match value {
            Some(v) => {
                mirror.insert(key.to_string(), v);
            }
            None => {
                mirror.remove(key);
            }
        }
        Ok(())
    }
}
