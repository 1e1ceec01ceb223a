#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! Lease manager counters. Registered lazily on first access, in the default
//! prometheus registry, so `prometheus::gather()` exposes them.
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum CreateResult {
        created,
        conflict,
        invalid_range,
    }
    pub struct CreateStats: IntCounter {
        "outcome" => CreateResult
    }
    pub label_enum PromoteResult {
        promoted,
        missing,
        ownership_mismatch,
        downstream_failed,
    }
    pub struct PromoteStats: IntCounter {
        "outcome" => PromoteResult
    }
}

lazy_static! {
    /// When the process started
    pub static ref START_TIME: Instant = Instant::now();
    /// process uptime
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "process uptime (seconds)").unwrap();

    pub static ref LEASE_CREATE_VEC: IntCounterVec = register_int_counter_vec!(
        "lease_create_total",
        "lease acquisition attempts by outcome",
        &["outcome"]
    )
    .unwrap();
    /// acquisition attempts by outcome
    pub static ref LEASE_CREATE: CreateStats = CreateStats::from(&LEASE_CREATE_VEC);

    pub static ref LEASE_PROMOTE_VEC: IntCounterVec = register_int_counter_vec!(
        "lease_promote_total",
        "lease promotion attempts by outcome",
        &["outcome"]
    )
    .unwrap();
    /// promotion attempts by outcome
    pub static ref LEASE_PROMOTE: PromoteStats = PromoteStats::from(&LEASE_PROMOTE_VEC);

    /// leases removed by an explicit release
    pub static ref LEASES_RELEASED: IntCounter = register_int_counter!(
        "leases_released",
        "count of leases removed by explicit release"
    ).unwrap();

    /// leases found past expires_at and deleted by a check
    pub static ref LEASES_EXPIRED_ON_CHECK: IntCounter = register_int_counter!(
        "leases_expired_on_check",
        "count of stale leases deleted while being checked"
    ).unwrap();

    /// stored payloads that failed to decode
    pub static ref LEASES_CORRUPT: IntCounter = register_int_counter!(
        "leases_corrupt",
        "count of lease payloads that could not be decoded"
    ).unwrap();

    /// best-effort store TTL calls that failed after a successful create
    pub static ref LEASE_EXPIRY_SET_FAILURES: IntCounter = register_int_counter!(
        "lease_expiry_set_failures",
        "count of store TTL calls that failed after lease creation"
    ).unwrap();

    /// promotions whose booking was created but whose lease delete failed
    pub static ref LEASE_PROMOTE_DELETE_FAILURES: IntCounter = register_int_counter!(
        "lease_promote_delete_failures",
        "count of promoted leases left in the store after a failed delete"
    ).unwrap();

    /// store calls that failed or timed out
    pub static ref STORE_ERRORS: IntCounter = register_int_counter!(
        "lease_store_errors",
        "count of lease store calls that failed or timed out"
    ).unwrap();

    /// cleanup sweep runs
    pub static ref CLEANUP_SWEEPS: IntCounter = register_int_counter!(
        "lease_cleanup_sweeps",
        "count of lease cleanup sweep runs"
    ).unwrap();

    /// leases deleted by cleanup
    pub static ref CLEANUP_REMOVED: IntCounter = register_int_counter!(
        "lease_cleanup_removed",
        "count of expired leases deleted by cleanup"
    ).unwrap();

    /// cleanup sweeps that failed
    pub static ref CLEANUP_ERRORS: IntCounter = register_int_counter!(
        "lease_cleanup_errors",
        "count of lease cleanup sweep errors"
    ).unwrap();
}
