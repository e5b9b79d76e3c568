//! src/services/lifecycle_service.rs
//!
//! LifecycleService: owns the rules by which a stored object goes from
//! "available" to "gone". Objects die in one of two ways:
//! - passively, when the store's per-key expiry elapses;
//! - actively, when the last permitted download deletes the record.
//!
//! Every post-creation mutation is a `compare_and_swap` against the exact
//! bytes that were read, so two requests racing for the last download can
//! never both succeed: the store picks the winner and the loser re-reads.
//! The payload is only handed back once the store has accepted the
//! decrement or the delete.

use crate::{
    models::record::{Download, ObjectRecord},
    store::{KeyTtl, ObjectStore, StoreError, Swap},
};
use bytes::Bytes;
use rand::RngCore;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime given to a rewritten record when the store reports none.
pub const FALLBACK_TTL: Duration = Duration::from_secs(5 * 60);

const GENERATED_ID_BYTES: usize = 6;
const MAX_ID_ATTEMPTS: usize = 10;
const MAX_SWAP_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` has no downloads remaining")]
    Exhausted(String),
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("wrong or missing password for object `{0}`")]
    AccessDenied(String),
    #[error("failed to destroy object `{id}` after its last download: {source}")]
    DestructFailed {
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to update object `{id}`: {source}")]
    UpdateFailed {
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("object store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("object `{0}` is under heavy contention, try again")]
    Contention(String),
    #[error("no free id found after {0} attempts")]
    IdsExhausted(usize),
    #[error("object `{id}` has an unreadable record: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: bincode::Error,
    },
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Lifecycle engine over an injected [`ObjectStore`].
///
/// Cheap to clone; clones share the same store handle.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn ObjectStore>,

    /// Upper bound on every individual store round trip.
    timeout: Duration,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Run one store call under the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
    }

    pub async fn check_connectivity(&self) -> LifecycleResult<()> {
        self.bounded(self.store.ping())
            .await
            .map_err(LifecycleError::StoreUnavailable)
    }

    /// Round-trip a throwaway key through the store.
    pub async fn probe_store(&self) -> LifecycleResult<()> {
        let key = format!("__readyz-{}", Uuid::new_v4());
        let marker = Bytes::from_static(b"readyz");
        let unavailable = LifecycleError::StoreUnavailable;

        self.bounded(self.store.set_if_absent(&key, marker.clone(), Duration::from_secs(30)))
            .await
            .map_err(unavailable)?;
        let read = self.bounded(self.store.get(&key)).await.map_err(unavailable)?;
        self.bounded(self.store.delete(&key)).await.map_err(unavailable)?;

        if read.as_ref() == Some(&marker) {
            Ok(())
        } else {
            Err(LifecycleError::StoreUnavailable(StoreError::Unavailable(
                "probe value mismatch".into(),
            )))
        }
    }

    /// Close the underlying store.
    pub async fn shutdown(&self) {
        self.store.close().await;
        info!(backend = self.backend_name(), "object store closed");
    }

    /// Store `record` under a caller-chosen `id`.
    ///
    /// Fails with `AlreadyExists` if a live object holds the id. The check and
    /// the write are one store operation.
    pub async fn create(&self, id: &str, record: &ObjectRecord, ttl: Duration) -> LifecycleResult<()> {
        let encoded = Bytes::from(encode(id, record)?);
        let stored = self
            .bounded(self.store.set_if_absent(id, encoded, ttl))
            .await
            .map_err(LifecycleError::StoreUnavailable)?;

        if !stored {
            return Err(LifecycleError::AlreadyExists(id.to_string()));
        }

        info!(
            id,
            file_name = %record.file_name,
            size = record.size(),
            downloads = record.downloads_remaining,
            ttl_secs = ttl.as_secs(),
            protected = record.is_protected(),
            "object created"
        );
        Ok(())
    }

    /// Store `record` under a fresh random id and return it.
    pub async fn create_with_generated_id(
        &self,
        record: &ObjectRecord,
        ttl: Duration,
    ) -> LifecycleResult<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_id();
            match self.create(&id, record, ttl).await {
                Ok(()) => return Ok(id),
                Err(LifecycleError::AlreadyExists(_)) => {
                    debug!(id, "generated id collided, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        warn!(attempts = MAX_ID_ATTEMPTS, "every generated id collided");
        Err(LifecycleError::IdsExhausted(MAX_ID_ATTEMPTS))
    }

    pub async fn fetch(&self, id: &str) -> LifecycleResult<ObjectRecord> {
        let (_, record) = self.read(id).await?;
        Ok(record)
    }

    /// Remaining lifetime of `id`; `None` if the store holds it without expiry.
    pub async fn remaining_ttl(&self, id: &str) -> LifecycleResult<Option<Duration>> {
        match self
            .bounded(self.store.ttl(id))
            .await
            .map_err(LifecycleError::StoreUnavailable)?
        {
            KeyTtl::Missing => Err(LifecycleError::NotFound(id.to_string())),
            KeyTtl::Persistent => Ok(None),
            KeyTtl::Expires(left) => Ok(Some(left)),
        }
    }

    /// Spend one download of `id`.
    ///
    /// The last download deletes the object; earlier ones rewrite it with one
    /// fewer download and its remaining lifetime unchanged. If the store
    /// rejects the write the payload is withheld.
    #[allow(dead_code)]
    pub async fn consume_download(&self, id: &str) -> LifecycleResult<Download> {
        self.consume(id, None).await
    }

    /// Like [`consume_download`](Self::consume_download), but only while the
    /// live record still carries `verified_hash`.
    ///
    /// Callers verify the password against a fetched record first; this
    /// guards against the id being destroyed and re-created in between.
    pub async fn consume_download_as(
        &self,
        id: &str,
        verified_hash: &str,
    ) -> LifecycleResult<Download> {
        self.consume(id, Some(verified_hash)).await
    }

    async fn consume(&self, id: &str, verified_hash: Option<&str>) -> LifecycleResult<Download> {
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let (raw, mut record) = self.read(id).await?;

            if verified_hash.is_some_and(|hash| hash != record.password_hash) {
                return Err(LifecycleError::AccessDenied(id.to_string()));
            }
            if record.downloads_remaining == 0 {
                warn!(id, "live record with zero downloads remaining");
                return Err(LifecycleError::Exhausted(id.to_string()));
            }
            record.downloads_remaining -= 1;
            let remaining = record.downloads_remaining;

            let won = if remaining == 0 {
                self.bounded(self.store.compare_and_swap(id, &raw, Swap::Delete))
                    .await
                    .map_err(|source| {
                        warn!(id, error = %source, "self-destruct failed, withholding payload");
                        LifecycleError::DestructFailed {
                            id: id.to_string(),
                            source,
                        }
                    })?
            } else {
                // `record.payload` is a view into `raw`; the encoded copy is
                // released as soon as the swap returns.
                let value = Bytes::from(encode(id, &record)?);
                self.rewrite(id, &raw, value).await.map_err(|source| {
                    warn!(id, error = %source, "decrement failed, withholding payload");
                    LifecycleError::UpdateFailed {
                        id: id.to_string(),
                        source,
                    }
                })?
            };

            if won {
                if remaining == 0 {
                    info!(id, "last download served, object destroyed");
                } else {
                    info!(id, remaining, "download served");
                }
                return Ok(Download {
                    id: id.to_string(),
                    payload: record.payload,
                    mime_type: record.mime_type,
                    file_name: record.file_name,
                    downloads_remaining: remaining,
                });
            }

            debug!(id, attempt, "lost consume race, re-reading");
        }

        Err(LifecycleError::Contention(id.to_string()))
    }

    /// Replace `expected` with `value`, carrying over the remaining lifetime.
    async fn rewrite(&self, id: &str, expected: &[u8], value: Bytes) -> Result<bool, StoreError> {
        let ttl = match self.bounded(self.store.ttl(id)).await? {
            KeyTtl::Expires(left) if !left.is_zero() => left,
            KeyTtl::Missing => return Ok(false),
            other => {
                warn!(id, ttl = ?other, "object has no usable expiry, applying fallback");
                FALLBACK_TTL
            }
        };
        self.bounded(self.store.compare_and_swap(id, expected, Swap::Replace { value, ttl }))
            .await
    }

    /// Unconditionally remove `id`. Absent ids are not an error.
    #[allow(dead_code)]
    pub async fn destroy(&self, id: &str) -> LifecycleResult<()> {
        let removed = self
            .bounded(self.store.delete(id))
            .await
            .map_err(LifecycleError::StoreUnavailable)?;
        if removed {
            info!(id, "object destroyed");
        }
        Ok(())
    }

    /// Physically drop expired entries. Expired objects are already invisible.
    pub async fn purge_expired(&self) -> LifecycleResult<u64> {
        self.bounded(self.store.purge_expired())
            .await
            .map_err(LifecycleError::StoreUnavailable)
    }

    async fn read(&self, id: &str) -> LifecycleResult<(Bytes, ObjectRecord)> {
        let raw = self
            .bounded(self.store.get(id))
            .await
            .map_err(LifecycleError::StoreUnavailable)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let record = ObjectRecord::decode(&raw).map_err(|source| LifecycleError::Corrupt {
            id: id.to_string(),
            source,
        })?;
        Ok((raw, record))
    }
}

fn encode(id: &str, record: &ObjectRecord) -> LifecycleResult<Vec<u8>> {
    record.encode().map_err(|source| LifecycleError::Corrupt {
        id: id.to_string(),
        source,
    })
}

/// Random lowercase hex id, 12 characters.
fn generate_id() -> String {
    let mut bytes = [0u8; GENERATED_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
