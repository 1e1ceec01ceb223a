use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::models;
use crate::store::LeaseStore;

/// In-process [`LeaseStore`].
///
/// All operations run under one mutex, so `create_if_absent` is atomic with
/// respect to every other call on the same store (and its clones). Store-level
/// TTLs are evaluated lazily against the injected clock: an entry past its TTL
/// behaves exactly as if it had been removed.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, MemoryEntry>>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` to judge store-level TTLs.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of keys physically held, including ones whose TTL has passed
    /// but that have not been touched since.
    pub fn raw_len(&self) -> usize {
        self.inner.lock().expect("memory store lock poisoned").len()
    }

    /// Write `value` under `key` unconditionally. Intended for seeding.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        guard.insert(
            key.to_owned(),
            MemoryEntry {
                value,
                expires_at: None,
            },
        );
    }
}

/// Drop `key` if its TTL has passed, then return whatever is left.
fn live_entry<'a>(
    map: &'a mut HashMap<String, MemoryEntry>,
    key: &str,
    now: DateTime<Utc>,
) -> Option<&'a mut MemoryEntry> {
    if map.get(key).is_some_and(|entry| !entry.is_live(now)) {
        trace!(key, "memory store TTL elapsed, dropping key");
        map.remove(key);
    }
    map.get_mut(key)
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        if live_entry(&mut guard, key, now).is_some() {
            return Ok(false);
        }
        guard.insert(
            key.to_owned(),
            MemoryEntry {
                value,
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        if let Some(entry) = live_entry(&mut guard, key, now) {
            entry.expires_at = Some(models::expiry_after(now, ttl));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        Ok(live_entry(&mut guard, key, now).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        if live_entry(&mut guard, key, now).is_none() {
            return Ok(0);
        }
        guard.remove(key);
        Ok(1)
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        guard.retain(|_, entry| entry.is_live(now));
        let mut keys = guard
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        Ok(live_entry(&mut guard, key, now)
            .and_then(|entry| entry.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }
}
