//! Error types for lease operations.
//!
//! Lease-semantic failures (`InvalidRange`, `LeaseExpiredOrMissing`,
//! `OwnershipMismatch`) are routine control flow for callers; store failures
//! are kept in their own variant so the boundary can answer 5xx instead of 4xx.
//! A conflicting acquisition is not an error at all, see
//! [`CreateOutcome::Conflict`].
//!
//! [`CreateOutcome::Conflict`]: crate::models::CreateOutcome::Conflict

use thiserror::Error;

/// Failure reported by a [`LeaseStore`] implementation.
///
/// [`LeaseStore`]: crate::store::LeaseStore
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection or transport-level failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete before its deadline.
    #[error("store timeout: {0}")]
    Timeout(String),

    /// The store understood the request but refused it (bad key, unsupported TTL).
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Transport failures and timeouts may succeed if the caller tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Shorthand result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by an external collaborator (availability source or
/// booking repository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

/// Coarse classification of a [`LockError`], plus `Conflict` which is
/// reported as an outcome rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRange,
    Conflict,
    LeaseExpiredOrMissing,
    OwnershipMismatch,
    DownstreamFailure,
    StoreUnavailable,
}

impl ErrorKind {
    /// Stable caller-facing reason string.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::InvalidRange => "invalid-range",
            ErrorKind::Conflict => "currently-held",
            ErrorKind::LeaseExpiredOrMissing => "lease-missing-or-expired",
            ErrorKind::OwnershipMismatch => "ownership-mismatch",
            ErrorKind::DownstreamFailure => "downstream-booking-failed",
            ErrorKind::StoreUnavailable => "store-unavailable",
        }
    }

    /// Whether this kind is the caller's fault (4xx) rather than ours (5xx).
    pub fn is_client_error(self) -> bool {
        !matches!(
            self,
            ErrorKind::DownstreamFailure | ErrorKind::StoreUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Top-level error type for [`LeaseManager`] operations.
///
/// [`LeaseManager`]: crate::manager::LeaseManager
#[derive(Debug, Error)]
pub enum LockError {
    /// Caller-supplied dates failed validation. Never reaches the store.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The lease key is absent: expired, released, promoted, or never created.
    #[error("lease '{key}' is missing or expired")]
    LeaseExpiredOrMissing { key: String },

    /// Someone other than the recorded owner tried to promote the lease.
    #[error("lease '{key}' is not owned by the requester")]
    OwnershipMismatch { key: String },

    /// The booking repository failed; the lease is left in place.
    #[error("booking creation failed: {0}")]
    Downstream(#[source] CollaboratorError),

    /// The availability source failed before any lease was attempted.
    #[error("availability check failed: {0}")]
    Availability(#[source] CollaboratorError),

    /// The lease store could not be reached or timed out.
    #[error("lease store unavailable during {op}: {source}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl LockError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::InvalidRange(_) => ErrorKind::InvalidRange,
            LockError::LeaseExpiredOrMissing { .. } => ErrorKind::LeaseExpiredOrMissing,
            LockError::OwnershipMismatch { .. } => ErrorKind::OwnershipMismatch,
            LockError::Downstream(_) | LockError::Availability(_) => ErrorKind::DownstreamFailure,
            LockError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// Caller-facing reason string, see [`ErrorKind::reason`].
    pub fn reason(&self) -> &'static str {
        self.kind().reason()
    }

    /// Store failures are retryable by the caller's own policy; nothing else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            LockError::StoreUnavailable { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Shorthand result alias for lease operations.
pub type LockResult<T> = Result<T, LockError>;
