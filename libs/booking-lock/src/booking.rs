//! Collaborators consumed, but not implemented, by the lease manager.
//!
//! Durable bookings belong to the application's own storage. The manager only
//! needs to ask whether a range is free of them and to create one when a lease
//! is promoted.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the caller supplies when promoting a lease.
///
/// `owner_id` should come from the caller's authenticated identity; it must
/// match the lease owner. Resource and dates are taken from the lease itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub owner_id: String,
    pub guests: u32,
    /// Total price in minor currency units.
    pub total_price: u64,
    pub status: BookingStatus,
}

/// The full record handed to [`BookingRepository::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub resource_id: String,
    pub owner_id: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub guests: u32,
    pub total_price: u64,
    pub status: BookingStatus,
}

/// A persisted booking as returned by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    #[serde(flatten)]
    pub details: NewBooking,
    pub created_at: DateTime<Utc>,
}

/// Answers whether a resource is free of durable, non-cancelled bookings.
///
/// Leases must not be part of this data source; they are checked separately.
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    async fn is_available(
        &self,
        resource_id: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<bool, CollaboratorError>;
}

/// Durably persists bookings.
///
/// `create` must be atomic from the caller's point of view: either the
/// booking exists afterward or an error is returned.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: NewBooking) -> Result<Booking, CollaboratorError>;
}
