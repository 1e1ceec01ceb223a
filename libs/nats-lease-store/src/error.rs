//! Error types for the NATS lease store.
//!
//! NATS failures are classified here and then folded into
//! [`booking_lock::StoreError`], so the lease manager never sees transport
//! internals.

use booking_lock::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NatsStoreError {
    /// NATS connection or transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error (e.g. missing credentials for the security mode).
    #[error("configuration error: {0}")]
    Config(String),

    /// The client is not connected or connection was lost.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// A stored key could not be mapped back to a lease key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The bucket cannot honour the requested TTL.
    #[error("unsupported ttl: {0}")]
    UnsupportedTtl(String),
}

impl NatsStoreError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NatsStoreError::Transport(_) | NatsStoreError::NotConnected(_)
        )
    }
}

impl From<NatsStoreError> for StoreError {
    fn from(err: NatsStoreError) -> Self {
        match err {
            NatsStoreError::Transport(_) | NatsStoreError::NotConnected(_) => {
                StoreError::Unavailable(err.to_string())
            }
            NatsStoreError::Config(_)
            | NatsStoreError::InvalidKey(_)
            | NatsStoreError::UnsupportedTtl(_) => StoreError::Rejected(err.to_string()),
        }
    }
}

pub type NatsStoreResult<T> = Result<T, NatsStoreError>;
