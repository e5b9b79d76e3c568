//! Process-local [`ObjectStore`] backed by a mutex-guarded map.
//!
//! Expiry is lazy: expired entries are treated as absent on access and
//! physically removed by [`ObjectStore::purge_expired`]. Time comes from
//! `tokio::time::Instant` so tests can drive expiry with a paused clock.

use super::{KeyTtl, ObjectStore, StoreError, StoreResult, Swap};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store is closed".into()));
        }
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Fetch the live entry for `key`, evicting it if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).map(|e| e.value.clone()))
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(match Self::live(&mut entries, key, now) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], swap: Swap) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let matches = Self::live(&mut entries, key, now)
            .is_some_and(|entry| entry.value.as_ref() == expected);
        if !matches {
            return Ok(false);
        }
        match swap {
            Swap::Delete => {
                entries.remove(key);
            }
            Swap::Replace { value, ttl } => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        expires_at: Some(now + ttl),
                    },
                );
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
