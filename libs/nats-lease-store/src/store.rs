//! [`LeaseStore`] over a JetStream key-value bucket.
//!
//! - `create_if_absent` is KV `create`, which the server rejects with
//!   `AlreadyExists` while a live revision is present.
//! - The store TTL is the bucket `max_age`. JetStream has no per-key expiry,
//!   so the bucket is created with `max_age` equal to the lease duration and
//!   `set_expiry` only verifies the request fits inside it.
//! - Lease keys contain `:`, which KV keys reject. Keys are escaped on the way
//!   in and unescaped when listed.

use std::time::Duration;

use async_nats::jetstream::kv::{self, CreateErrorKind, Operation};
use async_trait::async_trait;
use booking_lock::{LeaseStore, StoreResult};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::{debug, trace, warn};

use crate::client::NatsClient;
use crate::error::{NatsStoreError, NatsStoreResult};

/// Lease store backed by the configured leases bucket.
#[derive(Clone)]
pub struct NatsLeaseStore {
    client: NatsClient,
    kv: kv::Store,
    bucket: String,
    max_age: Duration,
}

impl NatsLeaseStore {
    /// Open (or create) the leases bucket on a connected client.
    pub async fn open(client: NatsClient) -> NatsStoreResult<Self> {
        let kv = client.leases_store().await?;
        let bucket = client.leases_bucket().await;
        let configured = client.lease_max_age().await;

        // an existing bucket keeps whatever max_age it was created with
        let max_age = match kv.status().await {
            Ok(status) => status.max_age(),
            Err(err) => {
                warn!(bucket, error = %err, "failed to read bucket status, assuming configured max_age");
                configured
            }
        };
        if max_age != configured {
            warn!(
                bucket,
                bucket_max_age = ?max_age,
                configured_max_age = ?configured,
                "leases bucket max_age differs from lease duration"
            );
        }
        debug!(bucket, ?max_age, "opened leases bucket");
        Ok(Self {
            client,
            kv,
            bucket,
            max_age,
        })
    }

    pub fn client(&self) -> &NatsClient {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The TTL the bucket applies to every key.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    async fn live_entry(&self, key: &str) -> NatsStoreResult<Option<kv::Entry>> {
        let entry = self
            .kv
            .entry(escape_key(key))
            .await
            .map_err(|e| NatsStoreError::Transport(format!("KV read failed for key '{key}': {e}")))?;
        Ok(entry.filter(|entry| entry.operation == Operation::Put))
    }
}

#[async_trait]
impl LeaseStore for NatsLeaseStore {
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        match self.kv.create(escape_key(key), value.into()).await {
            Ok(revision) => {
                trace!(key, revision, "KV create succeeded");
                Ok(true)
            }
            Err(err) if err.kind() == CreateErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(NatsStoreError::Transport(format!(
                "KV create failed for key '{key}': {err}"
            ))
            .into()),
        }
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if ttl > self.max_age {
            return Err(NatsStoreError::UnsupportedTtl(format!(
                "requested {ttl:?} for '{key}' but bucket '{}' expires keys after {:?}",
                self.bucket, self.max_age
            ))
            .into());
        }
        // shorter is fine: the lease's own expires_at is authoritative
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .live_entry(key)
            .await?
            .map(|entry| entry.value.to_vec()))
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        if self.live_entry(key).await?.is_none() {
            return Ok(0);
        }
        self.kv.delete(escape_key(key)).await.map_err(|e| {
            NatsStoreError::Transport(format!("KV delete failed for key '{key}': {e}"))
        })?;
        Ok(1)
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let escaped_prefix = escape_key(prefix);
        let mut keys = self.kv.keys().await.map_err(|e| {
            NatsStoreError::Transport(format!("failed to list lease KV keys: {e}"))
        })?;

        let mut out = Vec::new();
        while let Some(key) = keys.try_next().await.map_err(|e| {
            NatsStoreError::Transport(format!("failed reading lease KV keys: {e}"))
        })? {
            if !key.starts_with(&escaped_prefix) {
                continue;
            }
            match unescape_key(&key) {
                Ok(key) => out.push(key),
                Err(err) => warn!(key, %err, "skipping KV key that is not a lease key"),
            }
        }
        out.sort();
        Ok(out)
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let Some(entry) = self.live_entry(key).await? else {
            return Ok(None);
        };
        let created = DateTime::<Utc>::from_timestamp(
            entry.created.unix_timestamp(),
            entry.created.nanosecond(),
        )
        .unwrap_or_else(Utc::now);
        Ok(Some(remaining(created, self.max_age, Utc::now())))
    }
}

impl std::fmt::Debug for NatsLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsLeaseStore")
            .field("bucket", &self.bucket)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// time left before the bucket drops an entry created at `created`
fn remaining(created: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - created).to_std().unwrap_or_default();
    max_age.saturating_sub(elapsed)
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'/')
}

/// Escape a lease key into the KV key alphabet.
///
/// Bytes outside `[A-Za-z0-9_-/]` become `=XX` (uppercase hex); `=` itself is
/// escaped, so the mapping is reversible and keeps prefixes intact.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("={b:02X}"));
        }
    }
    out
}

/// Inverse of [`escape_key`].
pub fn unescape_key(key: &str) -> NatsStoreResult<String> {
    let invalid = || NatsStoreError::InvalidKey(key.to_string());
    let bytes = key.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'=' => {
                let hex = key.get(i + 1..i + 3).ok_or_else(invalid)?;
                out.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return Err(invalid()),
        }
    }
    String::from_utf8(out).map_err(|_| invalid())
}
