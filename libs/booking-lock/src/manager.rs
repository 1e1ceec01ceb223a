//! Lease lifecycle: create, check, promote, release, list, cleanup.
//!
//! The manager holds no in-process locks and caches nothing. Every decision
//! re-reads the store, and mutual exclusion comes solely from the store's
//! atomic `create_if_absent`.
//!
//! ## Two expiry mechanisms
//!
//! Each lease is guarded twice:
//! - the store TTL set right after creation reclaims the key even if this
//!   process dies mid-flow;
//! - the `expires_at` field is what every decision here is based on, so
//!   expiry stays correct (and testable) when the TTL call failed, the store
//!   clock drifts, or the store has no TTL at all.
//!
//! The field check is not redundant. Do not remove it.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::NaiveDate;
use tracing::{debug, error, info, trace, warn};

use crate::booking::{AvailabilityChecker, Booking, BookingDraft, BookingRepository, NewBooking};
use crate::clock::{Clock, SystemClock};
use crate::error::{LockError, LockResult, StoreError, StoreResult};
use crate::metrics;
use crate::models::{
    self, CleanupStats, CreateOutcome, DEFAULT_LEASE_DURATION, HoldOutcome, LEASE_KEY_PREFIX,
    Lease, LeaseKey, LeaseStatus, LeaseView, ReleaseOutcome,
};
use crate::store::LeaseStore;

/// Default deadline applied to each individual store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Process-wide lease settings, read-only after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    /// Lifetime of every lease.
    pub lease_duration: Duration,
    /// Deadline for each store round-trip. Elapsed deadlines surface as
    /// `StoreUnavailable`, never as a silent retry.
    pub store_timeout: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// A payload read back from the store.
#[derive(Debug)]
enum Stored {
    Valid(Lease),
    /// Failed to decode. Cannot be trusted, so it must not block acquisition.
    Corrupt,
}

impl Stored {
    fn into_lease(self) -> Option<Lease> {
        match self {
            Stored::Valid(lease) => Some(lease),
            Stored::Corrupt => None,
        }
    }
}

/// Grants and tracks exclusive reservation holds.
#[derive(Debug)]
pub struct LeaseManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
    settings: LeaseSettings,
}

impl<S: LeaseStore> LeaseManager<S> {
    /// Create a manager with default settings and the system clock.
    pub fn new(store: S) -> Self {
        Self::with_settings(store, LeaseSettings::default(), Arc::new(SystemClock))
    }

    /// Create a manager with explicit settings and clock.
    pub fn with_settings(store: S, settings: LeaseSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> LeaseSettings {
        self.settings
    }

    /// Run one store call under the configured deadline.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout(format!(
                "{op} exceeded {:?}",
                self.settings.store_timeout
            ))),
        }
    }

    /// Like [`timed`](Self::timed), but failures become `StoreUnavailable`
    /// after being logged with their context.
    async fn guarded<T, F>(&self, op: &'static str, key: &str, fut: F) -> LockResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        self.timed(op, fut).await.map_err(|source| {
            metrics::STORE_ERRORS.inc();
            error!(op, key, error = %source, "lease store call failed");
            LockError::StoreUnavailable { op, source }
        })
    }

    /// Read and decode `key`. Undecodable payloads are logged and reported
    /// as [`Stored::Corrupt`] so callers can decide whether to reclaim them.
    async fn read_lease(&self, key: &str) -> LockResult<Option<Stored>> {
        let Some(bytes) = self.guarded("get", key, self.store.get(key)).await? else {
            return Ok(None);
        };
        match models::decode(&bytes) {
            Ok(lease) => Ok(Some(Stored::Valid(lease))),
            Err(err) => {
                metrics::LEASES_CORRUPT.inc();
                warn!(key, ?err, "undecodable lease payload, treating as absent");
                Ok(Some(Stored::Corrupt))
            }
        }
    }

    fn validate_range(&self, range_start: NaiveDate, range_end: NaiveDate) -> LockResult<()> {
        let today = self.clock.today();
        if range_end <= range_start {
            return Err(LockError::InvalidRange(format!(
                "range end {range_end} must be after range start {range_start}"
            )));
        }
        if range_start < today {
            return Err(LockError::InvalidRange(format!(
                "range start {range_start} is in the past (today is {today})"
            )));
        }
        Ok(())
    }

    /// Try to acquire the hold for `resource_id` over the given dates.
    ///
    /// Exactly one concurrent caller per key gets `Created`; everyone else
    /// gets `Conflict` on their first attempt. A conflicting lease that looks
    /// expired is still reported as `Conflict`: reclaiming it here would open
    /// a second race between "detect expired" and "delete then create".
    pub async fn create_lease(
        &self,
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
        owner_id: &str,
    ) -> LockResult<CreateOutcome> {
        if let Err(err) = self.validate_range(range_start, range_end) {
            metrics::LEASE_CREATE.invalid_range.inc();
            debug!(resource_id, %range_start, %range_end, error = %err, "rejecting lease request");
            return Err(err);
        }

        let now = self.clock.now();
        let lease = Lease::new(
            resource_id,
            range_start,
            range_end,
            owner_id,
            now,
            self.settings.lease_duration,
        );
        let key = lease.key.clone();
        let payload = models::encode(&lease).map_err(|err| {
            // a freshly built lease always serializes; treat as a store rejection if not
            LockError::StoreUnavailable {
                op: "encode",
                source: StoreError::Rejected(err.to_string()),
            }
        })?;

        let created = self
            .guarded(
                "create_if_absent",
                key.as_str(),
                self.store.create_if_absent(key.as_str(), payload),
            )
            .await?;

        if !created {
            metrics::LEASE_CREATE.conflict.inc();
            let holder = self.read_lease(key.as_str()).await?.and_then(Stored::into_lease);
            debug!(
                %key,
                requester = owner_id,
                holder = holder.as_ref().map(|lease| lease.owner_id.as_str()),
                "lease currently held"
            );
            return Ok(CreateOutcome::Conflict { holder });
        }

        // best-effort: if this fails the lease still lapses through expires_at
        if let Err(err) = self
            .timed(
                "set_expiry",
                self.store
                    .set_expiry(key.as_str(), self.settings.lease_duration),
            )
            .await
        {
            metrics::LEASE_EXPIRY_SET_FAILURES.inc();
            warn!(%key, error = %err, "failed to set store TTL on new lease");
        }

        metrics::LEASE_CREATE.created.inc();
        info!(%key, owner = owner_id, expires_at = %lease.expires_at, "lease created");
        Ok(CreateOutcome::Created {
            key,
            expires_in: self.settings.lease_duration,
            lease,
        })
    }

    /// Inspect the hold for `resource_id` over the given dates.
    ///
    /// May delete: a lease found past `expires_at`, or one whose payload
    /// cannot be decoded, is removed so it stops blocking acquisition.
    pub async fn check_lease(
        &self,
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> LockResult<LeaseStatus> {
        self.check_key(&LeaseKey::new(resource_id, range_start, range_end))
            .await
    }

    /// [`check_lease`](Self::check_lease) for an already-built key.
    pub async fn check_key(&self, key: &LeaseKey) -> LockResult<LeaseStatus> {
        let key = key.as_str();
        match self.read_lease(key).await? {
            None => Ok(LeaseStatus::Absent),
            Some(Stored::Corrupt) => {
                self.guarded("delete", key, self.store.delete(key)).await?;
                Ok(LeaseStatus::Absent)
            }
            Some(Stored::Valid(lease)) if lease.is_expired_at(self.clock.now()) => {
                self.guarded("delete", key, self.store.delete(key)).await?;
                metrics::LEASES_EXPIRED_ON_CHECK.inc();
                debug!(key, owner = %lease.owner_id, "deleted stale lease on check");
                Ok(LeaseStatus::Expired)
            }
            Some(Stored::Valid(lease)) => Ok(LeaseStatus::Live(lease)),
        }
    }

    /// Turn a live lease into a durable booking, exactly once.
    ///
    /// The lease key is deleted only after the repository succeeded. If the
    /// repository fails the lease is left alone so the rightful owner can
    /// retry before it expires. Once the booking exists the call succeeds even
    /// if the delete fails.
    pub async fn promote_lease<R>(
        &self,
        key: &LeaseKey,
        draft: BookingDraft,
        bookings: &R,
    ) -> LockResult<Booking>
    where
        R: BookingRepository + ?Sized,
    {
        let missing = || {
            metrics::LEASE_PROMOTE.missing.inc();
            LockError::LeaseExpiredOrMissing {
                key: key.to_string(),
            }
        };

        let lease = match self.read_lease(key.as_str()).await? {
            Some(Stored::Valid(lease)) => lease,
            None | Some(Stored::Corrupt) => {
                debug!(%key, "promotion against missing lease");
                return Err(missing());
            }
        };

        if lease.is_expired_at(self.clock.now()) {
            debug!(%key, expires_at = %lease.expires_at, "promotion against expired lease");
            return Err(missing());
        }

        if draft.owner_id.is_empty() || !lease.is_owned_by(&draft.owner_id) {
            metrics::LEASE_PROMOTE.ownership_mismatch.inc();
            warn!(%key, requester = %draft.owner_id, "promotion rejected, requester does not own lease");
            return Err(LockError::OwnershipMismatch {
                key: key.to_string(),
            });
        }

        let booking = bookings
            .create(NewBooking {
                resource_id: lease.resource_id.clone(),
                owner_id: lease.owner_id.clone(),
                range_start: lease.range_start,
                range_end: lease.range_end,
                guests: draft.guests,
                total_price: draft.total_price,
                status: draft.status,
            })
            .await
            .map_err(|err| {
                metrics::LEASE_PROMOTE.downstream_failed.inc();
                error!(%key, ?err, "booking creation failed, keeping lease for retry");
                LockError::Downstream(err)
            })?;

        // the booking exists now, so the outcome is success whatever the
        // delete does; the leftover key lapses through expires_at or cleanup
        if let Err(err) = self
            .guarded("delete", key.as_str(), self.store.delete(key.as_str()))
            .await
        {
            metrics::LEASE_PROMOTE_DELETE_FAILURES.inc();
            warn!(%key, booking_id = %booking.id, error = %err, "booking created but lease delete failed");
        }

        metrics::LEASE_PROMOTE.promoted.inc();
        info!(%key, booking_id = %booking.id, owner = %lease.owner_id, "lease promoted");
        Ok(booking)
    }

    /// Drop the hold at `key`.
    ///
    /// Idempotent: releasing an absent key reports `released: false`. The
    /// calling layer verifies `requester_id` against the lease owner before
    /// calling; privileged cleanup paths have no single requester.
    pub async fn release_lease(
        &self,
        key: &LeaseKey,
        requester_id: &str,
    ) -> LockResult<ReleaseOutcome> {
        let key = key.as_str();
        if self.read_lease(key).await?.is_none() {
            trace!(key, requester = requester_id, "release of absent lease");
            return Ok(ReleaseOutcome { released: false });
        }
        let removed = self.guarded("delete", key, self.store.delete(key)).await?;
        if removed > 0 {
            metrics::LEASES_RELEASED.inc();
            info!(key, requester = requester_id, "lease released");
        }
        Ok(ReleaseOutcome {
            released: removed > 0,
        })
    }

    /// Enumerate lease keys and read each one. Keys that disappear while
    /// reading are skipped.
    async fn read_all(&self) -> LockResult<Vec<(String, Stored)>> {
        let keys = self
            .guarded(
                "list_keys_by_prefix",
                LEASE_KEY_PREFIX,
                self.store.list_keys_by_prefix(LEASE_KEY_PREFIX),
            )
            .await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(lease) = self.read_lease(&key).await? {
                out.push((key, lease));
            }
        }
        Ok(out)
    }

    /// Every readable lease with the store's remaining TTL attached.
    ///
    /// For observability only. Leases may come and go while the listing runs,
    /// so the result is not a consistent snapshot.
    pub async fn list_active_leases(&self) -> LockResult<Vec<LeaseView>> {
        let mut views = Vec::new();
        for (key, stored) in self.read_all().await? {
            let Stored::Valid(lease) = stored else {
                continue;
            };
            let ttl = self
                .guarded("remaining_ttl", &key, self.store.remaining_ttl(&key))
                .await?;
            views.push(LeaseView {
                lease,
                ttl_seconds: ttl.map(|ttl| ttl.as_secs()),
            });
        }
        Ok(views)
    }

    /// Delete every lease past `expires_at`, plus payloads that cannot be
    /// decoded.
    ///
    /// Safe to run concurrently with itself and with normal traffic: deleting
    /// an already-absent key is a no-op and is not counted.
    ///
    /// A failed delete does not stop the sweep. The remaining keys are still
    /// visited, removals are counted, and the first failure is returned.
    pub async fn cleanup_expired_leases(&self) -> LockResult<CleanupStats> {
        let now = self.clock.now();
        let mut stats = CleanupStats::default();
        let mut first_err = None;
        for (key, stored) in self.read_all().await? {
            stats.total_seen += 1;
            let stale = match &stored {
                Stored::Valid(lease) => lease.is_expired_at(now),
                Stored::Corrupt => true,
            };
            if !stale {
                continue;
            }
            match self.guarded("delete", &key, self.store.delete(&key)).await {
                Ok(removed) => stats.cleaned_count += removed,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        metrics::CLEANUP_SWEEPS.inc();
        metrics::CLEANUP_REMOVED.inc_by(stats.cleaned_count);
        if let Some(err) = first_err {
            warn!(
                total_seen = stats.total_seen,
                cleaned = stats.cleaned_count,
                "lease cleanup sweep finished with delete failures"
            );
            return Err(err);
        }
        debug!(
            total_seen = stats.total_seen,
            cleaned = stats.cleaned_count,
            "lease cleanup sweep completed"
        );
        Ok(stats)
    }

    /// The documented acquisition flow: consult durable bookings first, then
    /// try to acquire the hold.
    ///
    /// The two steps are not atomic together. A booking committed between
    /// them is not seen by the acquisition; promotion still goes through the
    /// repository, which owns durable consistency.
    pub async fn hold_if_available<A>(
        &self,
        availability: &A,
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
        owner_id: &str,
    ) -> LockResult<HoldOutcome>
    where
        A: AvailabilityChecker + ?Sized,
    {
        self.validate_range(range_start, range_end)?;
        let available = availability
            .is_available(resource_id, range_start, range_end)
            .await
            .map_err(|err| {
                error!(resource_id, ?err, "availability check failed");
                LockError::Availability(err)
            })?;
        if !available {
            debug!(resource_id, %range_start, %range_end, "range already booked");
            return Ok(HoldOutcome::Unavailable);
        }
        self.create_lease(resource_id, range_start, range_end, owner_id)
            .await
            .map(HoldOutcome::Attempted)
    }
}
