//! # booking-lock
//!
//! Short-lived, exclusive reservation holds ("leases") over a shared atomic
//! key-value store.
//!
//! Many request handlers, possibly on many server instances, may try to
//! reserve the same resource for overlapping dates. Only one of them may go on
//! to payment/confirmation at a time. This crate provides:
//! - **Typed data contracts** for leases, lease keys and operation outcomes.
//! - **`LeaseStore`**, the small set of atomic primitives the manager needs
//!   from a backing store, plus an in-process [`MemoryStore`].
//! - **`LeaseManager`**, which creates, checks, promotes, releases, lists and
//!   garbage-collects leases.
//! - **Collaborator traits** for durable availability checks and booking
//!   persistence.
//!
//! ## Design Principles
//!
//! - Mutual exclusion lives in the store's conditional-create, never in
//!   process-local locks. A local mutex cannot see other instances.
//! - Nothing about lease state is cached between calls.
//! - Two expiry mechanisms are kept on purpose: the store's own TTL reclaims
//!   keys if the process dies, the `expires_at` field is what business logic
//!   judges. Removing either is a bug.
//!
//! [`MemoryStore`]: crate::memory::MemoryStore
#![warn(missing_debug_implementations, rust_2018_idioms, non_snake_case)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod booking;
pub mod clock;
pub mod error;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod store;

// Re-export key types for convenient access
pub use booking::{AvailabilityChecker, Booking, BookingDraft, BookingRepository, BookingStatus, NewBooking};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CollaboratorError, ErrorKind, LockError, LockResult, StoreError, StoreResult};
pub use manager::{LeaseManager, LeaseSettings};
pub use memory::MemoryStore;
pub use models::{
    CleanupStats, CreateOutcome, DEFAULT_LEASE_DURATION, HoldOutcome, LEASE_KEY_PREFIX, Lease,
    LeaseKey, LeaseStatus, LeaseView, ReleaseOutcome,
};
pub use store::LeaseStore;
