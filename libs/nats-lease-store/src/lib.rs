//! # nats-lease-store
//!
//! [`booking_lock::LeaseStore`] backed by NATS JetStream KV, for running
//! several lease manager instances against one shared bucket.
//!
//! This library provides:
//! - **Connection manager** with optional auth/encryption mode support,
//!   bounded connect retry and connection state observability.
//! - **Lease store** mapping the store contract onto a KV bucket whose
//!   `max_age` is the lease duration.
//! - **Startup write selftest** so the daemon only reports healthy once the
//!   bucket accepts writes.

pub mod client;
pub mod error;
pub mod store;

pub use client::{ConnectionState, NatsClient};
pub use error::{NatsStoreError, NatsStoreResult};
pub use store::{NatsLeaseStore, escape_key, unescape_key};
