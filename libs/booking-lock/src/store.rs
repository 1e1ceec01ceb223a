//! The store contract the lease manager relies on.
//!
//! Implementations must make [`LeaseStore::create_if_absent`] a single
//! indivisible operation. Every other guarantee in this crate is built on it.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::error::StoreResult;

/// Atomic key-value primitives needed by [`LeaseManager`].
///
/// [`LeaseManager`]: crate::manager::LeaseManager
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug + 'static {
    /// Create `key` with `value` only if it does not already exist. Returns
    /// whether this call created it.
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool>;

    /// Ask the store to drop `key` after `ttl`. Best-effort safety net; the
    /// lease's own `expires_at` stays authoritative.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete `key`, returning how many keys were removed (0 or 1).
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Time until the store itself reclaims `key`. `None` when the key is
    /// absent or has no store-level expiry.
    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}

#[async_trait]
impl<T: LeaseStore + ?Sized> LeaseStore for Arc<T> {
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        (**self).create_if_absent(key, value).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        (**self).set_expiry(key, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        (**self).delete(key).await
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).list_keys_by_prefix(prefix).await
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        (**self).remaining_ttl(key).await
    }
}
