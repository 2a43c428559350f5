//! JSON documents keyed by name.
//!
//! Writes of several keys go through one transaction so a cascading change
//! lands all-or-nothing.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;

/// Key holding the JSON array of log entries.
pub const LOGS_KEY: &str = "monster_tracker_logs";
/// Key holding the JSON array of flavors.
pub const FLAVORS_KEY: &str = "monster_tracker_flavors";

/// Durable key-value store backed by SQLite.
#[derive(Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read and decode the document under `key`, if present.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("value");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::Storage(format!("Corrupt value under {}: {}", key, e)))
    }

    /// Encode and write every entry in a single transaction.
    pub async fn put_json(&self, entries: &[(&str, Value)]) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((*key, serde_json::to_string(value)?));
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in &encoded {
            sqlx::query(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
