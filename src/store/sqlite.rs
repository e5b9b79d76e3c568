//! SQLite-backed [`ObjectStore`].
//!
//! Entries live in a single `entries` table with an absolute `expires_at`
//! (unix milliseconds). Each trait primitive is exactly one SQL statement, so
//! SQLite's statement-level atomicity is what makes `set_if_absent` and
//! `compare_and_swap` race-free across connections.

use super::{KeyTtl, ObjectStore, StoreResult, Swap};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url`.
    pub async fn connect(url: &str, acquire_timeout: Duration) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(acquire_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Single-connection in-memory database with the schema applied.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(statements.len())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool> {
        // An expired row still holds the primary key, so the upsert only
        // overwrites when the existing row is dead.
        let result = sqlx::query(
            "INSERT INTO entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
             WHERE entries.expires_at IS NOT NULL AND entries.expires_at <= ?",
        )
        .bind(key)
        .bind(&value[..])
        .bind(expiry_millis(ttl))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM entries
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(Bytes::from))
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let now = now_millis();
        let expires_at = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT expires_at FROM entries
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match expires_at {
            None => KeyTtl::Missing,
            Some(None) => KeyTtl::Persistent,
            Some(Some(at)) => KeyTtl::Expires(Duration::from_millis((at - now).max(0) as u64)),
        })
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], swap: Swap) -> StoreResult<bool> {
        let now = now_millis();
        let result = match swap {
            Swap::Delete => {
                sqlx::query(
                    "DELETE FROM entries
                     WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)",
                )
                .bind(key)
                .bind(expected)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            Swap::Replace { value, ttl } => {
                sqlx::query(
                    "UPDATE entries SET value = ?, expires_at = ?
                     WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)",
                )
                .bind(&value[..])
                .bind(expiry_millis(ttl))
                .bind(key)
                .bind(expected)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM entries
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn satisfies_store_contract() {
        contract::set_if_absent_refuses_live_keys(&store().await).await;
        contract::compare_and_swap_requires_matching_value(&store().await).await;
        contract::ttl_reports_remaining_lifetime(&store().await).await;
        contract::delete_is_idempotent(&store().await).await;
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = store().await;
        assert_eq!(store.migrate().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_and_reclaimable() {
        let store = store().await;
        sqlx::query("INSERT INTO entries (key, value, expires_at) VALUES (?, ?, ?)")
            .bind("old")
            .bind(b"stale".as_slice())
            .bind(now_millis() - 1_000)
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.get("old").await.unwrap(), None);
        assert_eq!(store.ttl("old").await.unwrap(), KeyTtl::Missing);
        assert!(!store.delete("old").await.unwrap());

        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("old", Bytes::from_static(b"fresh"), ttl).await.unwrap());
        assert_eq!(store.get("old").await.unwrap(), Some(Bytes::from_static(b"fresh")));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let store = store().await;
        sqlx::query("INSERT INTO entries (key, value, expires_at) VALUES (?, ?, ?)")
            .bind("old")
            .bind(b"stale".as_slice())
            .bind(now_millis() - 1_000)
            .execute(&store.pool)
            .await
            .unwrap();
        store
            .set_if_absent("live", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rows_without_expiry_report_persistent() {
        let store = store().await;
        sqlx::query("INSERT INTO entries (key, value, expires_at) VALUES (?, ?, NULL)")
            .bind("forever")
            .bind(b"v".as_slice())
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.ttl("forever").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn closed_pool_rejects_calls() {
        let store = store().await;
        store.close().await;
        assert!(store.ping().await.is_err());
    }
}
