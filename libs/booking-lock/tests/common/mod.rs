#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use booking_lock::{
    AvailabilityChecker, Booking, BookingDraft, BookingRepository, BookingStatus,
    CollaboratorError, LeaseManager, LeaseSettings, LeaseStore, ManualClock, MemoryStore,
    NewBooking, StoreError, StoreResult,
};
use chrono::{DateTime, NaiveDate, Utc};

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid ISO date")
}

pub fn start_time() -> DateTime<Utc> {
    "2024-02-01T12:00:00Z".parse().expect("valid timestamp")
}

pub fn draft(owner: &str) -> BookingDraft {
    BookingDraft {
        owner_id: owner.into(),
        guests: 2,
        total_price: 45_000,
        status: BookingStatus::Confirmed,
    }
}

/// Wraps a [`MemoryStore`], counting calls and injecting faults.
#[derive(Debug, Default)]
pub struct TestStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    creates: AtomicUsize,
    unavailable: AtomicBool,
    fail_expiry: AtomicBool,
    failing_deletes: AtomicUsize,
    stall: Mutex<Option<Duration>>,
}

impl TestStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn set_fail_expiry(&self, fail: bool) {
        self.fail_expiry.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` deletes time out.
    pub fn fail_next_deletes(&self, n: usize) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }

    pub fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.lock().unwrap() = stall;
    }

    async fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = *self.stall.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for TestStore {
    async fn create_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        self.enter().await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_if_absent(key, value).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.enter().await?;
        if self.fail_expiry.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("expire failed".into()));
        }
        self.inner.set_expiry(key, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter().await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.enter().await?;
        let failing = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Timeout("delete timed out".into()));
        }
        self.inner.delete(key).await
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.enter().await?;
        self.inner.list_keys_by_prefix(prefix).await
    }

    async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.enter().await?;
        self.inner.remaining_ttl(key).await
    }
}

/// Durable bookings kept in memory; answers availability from them.
#[derive(Debug, Default)]
pub struct MemoryBookings {
    bookings: Mutex<Vec<Booking>>,
    fail_create: AtomicBool,
}

impl MemoryBookings {
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.bookings.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Booking> {
        self.bookings.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookings {
    async fn create(&self, booking: NewBooking) -> Result<Booking, CollaboratorError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("database is down".into()));
        }
        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            details: booking,
            created_at: Utc::now(),
        };
        self.bookings.lock().unwrap().push(booking.clone());
        Ok(booking)
    }
}

#[async_trait]
impl AvailabilityChecker for MemoryBookings {
    async fn is_available(
        &self,
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<bool, CollaboratorError> {
        let guard = self.bookings.lock().unwrap();
        Ok(!guard.iter().any(|b| {
            b.details.resource_id == resource_id
                && b.details.status != BookingStatus::Cancelled
                && b.details.range_start < range_end
                && range_start < b.details.range_end
        }))
    }
}

pub struct Harness {
    pub mgr: LeaseManager<Arc<TestStore>>,
    pub store: Arc<TestStore>,
    pub clock: ManualClock,
    pub bookings: MemoryBookings,
}

pub fn harness() -> Harness {
    harness_with(LeaseSettings::default())
}

pub fn harness_with(settings: LeaseSettings) -> Harness {
    let clock = ManualClock::new(start_time());
    let store = Arc::new(TestStore::new(MemoryStore::with_clock(Arc::new(
        clock.clone(),
    ))));
    let mgr = LeaseManager::with_settings(Arc::clone(&store), settings, Arc::new(clock.clone()));
    Harness {
        mgr,
        store,
        clock,
        bookings: MemoryBookings::default(),
    }
}
