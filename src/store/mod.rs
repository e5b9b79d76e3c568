//! Key/value persistence with native per-key expiry.
//!
//! The lifecycle engine only talks to storage through [`ObjectStore`]. Every
//! mutation it performs after creation goes through [`ObjectStore::compare_and_swap`],
//! so the decision about which concurrent request consumed a download is made
//! by the store in a single step, never by the caller after a separate read.
//!
//! Two backends ship with the service:
//! - [`sqlite::SqliteStore`]: durable, one SQL statement per primitive.
//! - [`memory::MemoryStore`]: process-local, used by tests and `--backend memory`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remaining lifetime of a key as reported by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is absent or already expired.
    Missing,
    /// Key exists without an expiry.
    Persistent,
    /// Key expires after the given duration.
    Expires(Duration),
}

/// Mutation applied by [`ObjectStore::compare_and_swap`].
#[derive(Clone, Debug)]
pub enum Swap {
    /// Remove the key.
    Delete,
    /// Overwrite the value and set its expiry to `ttl` from now.
    Replace { value: Bytes, ttl: Duration },
}

/// Atomic primitives required by the lifecycle engine.
///
/// Expired keys must be indistinguishable from absent ones in every method.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;

    /// Store `value` under `key` only if the key is absent or expired.
    ///
    /// Returns `false` when a live value already occupies the key.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Apply `swap` only while the live value of `key` still equals `expected`.
    ///
    /// Returns `false` if the key vanished or was rewritten in the meantime.
    async fn compare_and_swap(&self, key: &str, expected: &[u8], swap: Swap) -> StoreResult<bool>;

    /// Unconditional delete. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> StoreResult<u64>;

    /// Release connections. Calls made after `close` fail.
    async fn close(&self);

    fn backend_name(&self) -> &'static str;
}

/// Contract tests shared by every backend.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub async fn set_if_absent_refuses_live_keys(store: &dyn ObjectStore) {
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("k", Bytes::from_static(b"one"), ttl).await.unwrap());
        assert!(!store.set_if_absent("k", Bytes::from_static(b"two"), ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"one")));
    }

    pub async fn compare_and_swap_requires_matching_value(store: &dyn ObjectStore) {
        let ttl = Duration::from_secs(60);
        store.set_if_absent("k", Bytes::from_static(b"v1"), ttl).await.unwrap();

        let stale = Swap::Replace {
            value: Bytes::from_static(b"v3"),
            ttl,
        };
        assert!(!store.compare_and_swap("k", b"v0", stale).await.unwrap());

        let fresh = Swap::Replace {
            value: Bytes::from_static(b"v2"),
            ttl,
        };
        assert!(store.compare_and_swap("k", b"v1", fresh).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v2")));

        assert!(!store.compare_and_swap("k", b"v1", Swap::Delete).await.unwrap());
        assert!(store.compare_and_swap("k", b"v2", Swap::Delete).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    pub async fn ttl_reports_remaining_lifetime(store: &dyn ObjectStore) {
        store
            .set_if_absent("k", Bytes::from_static(b"v"), Duration::from_secs(300))
            .await
            .unwrap();
        match store.ttl("k").await.unwrap() {
            KeyTtl::Expires(left) => {
                assert!(left <= Duration::from_secs(300));
                assert!(left > Duration::from_secs(295));
            }
            other => panic!("unexpected ttl {other:?}"),
        }
        assert_eq!(store.ttl("absent").await.unwrap(), KeyTtl::Missing);
    }

    pub async fn delete_is_idempotent(store: &dyn ObjectStore) {
        store
            .set_if_absent("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.delete("never-there").await.unwrap());
    }
}
