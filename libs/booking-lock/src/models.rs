//! Lease data contracts and operation outcomes.
//!
//! The stored payload is the JSON encoding of [`Lease`]. Decoding fails
//! closed: callers treat an undecodable payload as absent.

use std::{fmt, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Namespace shared by every lease key.
pub const LEASE_KEY_PREFIX: &str = "booking_lock:";

/// How long a lease lives unless configured otherwise.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(600);

/// Deterministic mutual-exclusion key for a resource and date range.
///
/// Rendered as `booking_lock:<resourceId>:<YYYY-MM-DD>:<YYYY-MM-DD>`. Two
/// leases with the same key contend for the same hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Build the key for `resource_id` over `[range_start, range_end)`.
    pub fn new(resource_id: &str, range_start: NaiveDate, range_end: NaiveDate) -> Self {
        Self(format!(
            "{LEASE_KEY_PREFIX}{resource_id}:{}:{}",
            range_start.format("%Y-%m-%d"),
            range_end.format("%Y-%m-%d")
        ))
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover `(resource_id, range_start, range_end)` from the key string.
    ///
    /// Only needed for interop with keys produced elsewhere; inside the
    /// manager the structured [`Lease`] travels with the key. Dates are
    /// split off from the right, so resource ids may themselves contain `:`.
    pub fn parse(&self) -> Option<(String, NaiveDate, NaiveDate)> {
        let rest = self.0.strip_prefix(LEASE_KEY_PREFIX)?;
        let mut parts = rest.rsplitn(3, ':');
        let end = parts.next()?.parse::<NaiveDate>().ok()?;
        let start = parts.next()?.parse::<NaiveDate>().ok()?;
        let resource_id = parts.next().filter(|id| !id.is_empty())?;
        Some((resource_id.to_owned(), start, end))
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LeaseKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for LeaseKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl AsRef<str> for LeaseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An exclusive, short-lived hold on a resource and date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub key: LeaseKey,
    pub owner_id: String,
    pub resource_id: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Authoritative expiry. Never changes after creation.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Build a lease acquired at `now` for `duration`.
    pub fn new(
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
        owner_id: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            key: LeaseKey::new(resource_id, range_start, range_end),
            owner_id: owner_id.to_owned(),
            resource_id: resource_id.to_owned(),
            range_start,
            range_end,
            created_at: now,
            expires_at: expiry_after(now, duration),
        }
    }

    /// A lease is expired from `expires_at` onward.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before `expires_at`, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// `now + ttl`, saturating at the latest representable instant instead of
/// wrapping or panicking.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Encode a lease for storage.
pub fn encode(lease: &Lease) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(lease)
}

/// Decode a stored lease payload.
pub fn decode(data: &[u8]) -> Result<Lease, serde_json::Error> {
    serde_json::from_slice(data)
}

/// A listed lease together with the store's own remaining TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseView {
    #[serde(flatten)]
    pub lease: Lease,
    /// Seconds until the store reclaims the key, if the store knows.
    pub ttl_seconds: Option<u64>,
}

/// Result of checking a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// No lease exists for the key.
    Absent,
    /// A lease is held and has not reached `expires_at`.
    Live(Lease),
    /// A lease was found past `expires_at` and has been deleted.
    Expired,
}

impl LeaseStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LeaseStatus::Live(_))
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            LeaseStatus::Live(lease) => Some(lease),
            _ => None,
        }
    }
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The hold was granted.
    Created {
        key: LeaseKey,
        expires_in: Duration,
        lease: Lease,
    },
    /// Another lease already occupies the key. `holder` is `None` when the
    /// existing payload vanished or could not be decoded by the time it was
    /// read back.
    Conflict { holder: Option<Lease> },
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CreateOutcome::Conflict { .. })
    }

    /// The granted lease, if any.
    pub fn lease(&self) -> Option<&Lease> {
        match self {
            CreateOutcome::Created { lease, .. } => Some(lease),
            CreateOutcome::Conflict { .. } => None,
        }
    }

    /// Seconds until the granted lease expires.
    pub fn expires_in_seconds(&self) -> Option<u64> {
        match self {
            CreateOutcome::Created { expires_in, .. } => Some(expires_in.as_secs()),
            CreateOutcome::Conflict { .. } => None,
        }
    }
}

/// Result of acquiring a hold after consulting the durable availability source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    /// Durable bookings already cover the range; no lease was attempted.
    Unavailable,
    /// Availability passed; this is what the acquisition returned.
    Attempted(CreateOutcome),
}

/// Result of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub released: bool,
}

/// Counters from one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub total_seen: u64,
    pub cleaned_count: u64,
}
