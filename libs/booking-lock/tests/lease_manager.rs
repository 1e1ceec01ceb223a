mod common;

use std::sync::Arc;
use std::time::Duration;

use booking_lock::{
    CreateOutcome, ErrorKind, HoldOutcome, LeaseKey, LeaseManager, LeaseSettings, LeaseStatus,
    LeaseStore, LockError, ManualClock, MemoryStore, ReleaseOutcome,
};
use tracing_test::traced_test;

use common::{date, draft, harness, harness_with};

const P1_KEY: &str = "booking_lock:P1:2024-02-15:2024-02-17";

#[tokio::test]
#[traced_test]
async fn reservation_happy_path() {
    let h = harness();

    let outcome = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();
    let CreateOutcome::Created {
        key,
        expires_in,
        lease,
    } = outcome
    else {
        panic!("expected a granted lease, got {outcome:?}");
    };
    assert_eq!(key.as_str(), P1_KEY);
    assert_eq!(expires_in, Duration::from_secs(600));
    assert_eq!(lease.owner_id, "userA");

    let conflict = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userB")
        .await
        .unwrap();
    match conflict {
        CreateOutcome::Conflict { holder: Some(holder) } => {
            assert_eq!(holder.owner_id, "userA");
            assert_eq!(holder.range_start, date("2024-02-15"));
            assert_eq!(holder.range_end, date("2024-02-17"));
        }
        other => panic!("expected conflict with holder, got {other:?}"),
    }

    let booking = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap();
    assert_eq!(booking.details.resource_id, "P1");
    assert_eq!(booking.details.owner_id, "userA");
    assert_eq!(booking.details.range_start, date("2024-02-15"));
    assert_eq!(booking.details.guests, 2);
    assert_eq!(h.bookings.len(), 1);

    let status = h
        .mgr
        .check_lease("P1", date("2024-02-15"), date("2024-02-17"))
        .await
        .unwrap();
    assert_eq!(status, LeaseStatus::Absent);

    let again = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap_err();
    assert!(matches!(again, LockError::LeaseExpiredOrMissing { .. }));
    assert_eq!(again.reason(), "lease-missing-or-expired");
    assert_eq!(h.bookings.len(), 1);
    assert_eq!(h.bookings.all()[0].id, booking.id);
}

#[tokio::test]
async fn invalid_range_never_touches_store() {
    let h = harness();

    let err = h
        .mgr
        .create_lease("P2", date("2024-02-17"), date("2024-02-15"), "userA")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);

    let err = h
        .mgr
        .create_lease("P2", date("2024-02-15"), date("2024-02-15"), "userA")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);

    // the harness clock sits on 2024-02-01
    let err = h
        .mgr
        .create_lease("P2", date("2024-01-30"), date("2024-02-03"), "userA")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "invalid-range");

    assert_eq!(h.store.calls(), 0);
}

#[tokio::test]
async fn starting_today_is_allowed() {
    let h = harness();
    let outcome = h
        .mgr
        .create_lease("P2", date("2024-02-01"), date("2024-02-02"), "userA")
        .await
        .unwrap();
    assert!(outcome.is_created());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_grant_exactly_one() {
    for n in [2usize, 16, 64] {
        let h = harness();
        let mgr = Arc::new(h.mgr);
        let handles = (0..n)
            .map(|i| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move {
                    mgr.create_lease("P1", date("2024-02-15"), date("2024-02-17"), &format!("user{i}"))
                        .await
                })
            })
            .collect::<Vec<_>>();

        let outcomes = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|res| res.unwrap().unwrap())
            .collect::<Vec<_>>();

        let created = outcomes.iter().filter(|o| o.is_created()).count();
        let conflicts = outcomes.iter().filter(|o| o.is_conflict()).count();
        assert_eq!(created, 1, "n = {n}");
        assert_eq!(conflicts, n - 1, "n = {n}");
        // one round of acquisition, no retries
        assert_eq!(h.store.creates(), n);
    }
}

#[tokio::test]
async fn expiry_is_judged_by_expires_at() {
    let h = harness();
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    h.clock.advance_secs(599);
    let status = h
        .mgr
        .check_lease("P1", date("2024-02-15"), date("2024-02-17"))
        .await
        .unwrap();
    assert!(status.is_live());
    assert_eq!(status.lease().unwrap().owner_id, "userA");

    h.clock.advance_secs(1);
    let status = h
        .mgr
        .check_lease("P1", date("2024-02-15"), date("2024-02-17"))
        .await
        .unwrap();
    assert!(matches!(status, LeaseStatus::Expired | LeaseStatus::Absent));
}

#[tokio::test]
async fn expired_field_without_store_ttl_is_reclaimed_by_check() {
    let h = harness();
    h.store.set_fail_expiry(true);

    let outcome = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();
    assert!(outcome.is_created(), "TTL failure must not fail creation");
    assert_eq!(h.store.inner().remaining_ttl(P1_KEY).await.unwrap(), None);

    h.clock.advance_secs(601);
    // the store never dropped the key, so acquisition still conflicts
    let blocked = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userB")
        .await
        .unwrap();
    assert!(blocked.is_conflict());

    let status = h
        .mgr
        .check_lease("P1", date("2024-02-15"), date("2024-02-17"))
        .await
        .unwrap();
    assert_eq!(status, LeaseStatus::Expired);

    let retry = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userB")
        .await
        .unwrap();
    assert_eq!(retry.lease().unwrap().owner_id, "userB");
}

#[tokio::test]
async fn promotion_requires_ownership() {
    let h = harness();
    let key = LeaseKey::from(P1_KEY);
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    let err = h
        .mgr
        .promote_lease(&key, draft("userB"), &h.bookings)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::OwnershipMismatch { .. }));
    assert_eq!(h.bookings.len(), 0);

    let err = h
        .mgr
        .promote_lease(&key, draft(""), &h.bookings)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OwnershipMismatch);

    let status = h.mgr.check_key(&key).await.unwrap();
    assert_eq!(status.lease().unwrap().owner_id, "userA");
}

#[tokio::test]
async fn downstream_failure_keeps_lease_for_retry() {
    let h = harness();
    let key = LeaseKey::from(P1_KEY);
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    h.bookings.set_fail_create(true);
    let err = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "downstream-booking-failed");
    assert!(h.mgr.check_key(&key).await.unwrap().is_live());

    h.bookings.set_fail_create(false);
    let booking = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap();
    assert_eq!(booking.details.owner_id, "userA");
    assert_eq!(h.mgr.check_key(&key).await.unwrap(), LeaseStatus::Absent);
}

#[tokio::test]
async fn promotion_succeeds_when_lease_delete_fails() {
    let h = harness();
    h.store.set_fail_expiry(true);
    let key = LeaseKey::from(P1_KEY);
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    h.store.fail_next_deletes(1);
    let booking = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap();
    assert_eq!(h.bookings.len(), 1);
    assert_eq!(h.bookings.all()[0].id, booking.id);

    // the leftover lease lapses and cannot be promoted a second time
    h.clock.advance_secs(600);
    let err = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LeaseExpiredOrMissing);
    assert_eq!(h.bookings.len(), 1);

    let stats = h.mgr.cleanup_expired_leases().await.unwrap();
    assert_eq!(stats.cleaned_count, 1);
    assert_eq!(h.store.inner().raw_len(), 0);
}

#[tokio::test]
async fn promotion_after_expiry_fails() {
    let h = harness();
    h.store.set_fail_expiry(true);
    let key = LeaseKey::from(P1_KEY);
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    h.clock.advance_secs(600);
    let err = h
        .mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LeaseExpiredOrMissing);
    assert_eq!(h.bookings.len(), 0);
}

#[tokio::test]
async fn release_is_idempotent() {
    let h = harness();
    let key = LeaseKey::from(P1_KEY);

    let outcome = h.mgr.release_lease(&key, "userA").await.unwrap();
    assert_eq!(outcome, ReleaseOutcome { released: false });

    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();
    let outcome = h.mgr.release_lease(&key, "userA").await.unwrap();
    assert!(outcome.released);
    assert_eq!(h.mgr.check_key(&key).await.unwrap(), LeaseStatus::Absent);

    let outcome = h.mgr.release_lease(&key, "userA").await.unwrap();
    assert!(!outcome.released);
}

#[tokio::test]
async fn cleanup_removes_only_expired() {
    let h = harness();
    h.store.set_fail_expiry(true);

    for resource in ["old1", "old2", "old3"] {
        h.mgr
            .create_lease(resource, date("2024-02-15"), date("2024-02-17"), "userA")
            .await
            .unwrap();
    }
    h.clock.advance_secs(300);
    for resource in ["new1", "new2"] {
        h.mgr
            .create_lease(resource, date("2024-02-15"), date("2024-02-17"), "userB")
            .await
            .unwrap();
    }
    h.clock.advance_secs(400);

    let stats = h.mgr.cleanup_expired_leases().await.unwrap();
    assert_eq!(stats.total_seen, 5);
    assert_eq!(stats.cleaned_count, 3);

    let remaining = h.mgr.list_active_leases().await.unwrap();
    let mut owners = remaining
        .iter()
        .map(|view| view.lease.resource_id.as_str())
        .collect::<Vec<_>>();
    owners.sort();
    assert_eq!(owners, vec!["new1", "new2"]);

    // nothing left to clean on a second pass
    let stats = h.mgr.cleanup_expired_leases().await.unwrap();
    assert_eq!(stats.total_seen, 2);
    assert_eq!(stats.cleaned_count, 0);
}

#[tokio::test]
async fn cleanup_continues_past_failed_delete() {
    let h = harness();
    h.store.set_fail_expiry(true);
    for resource in ["old1", "old2", "old3"] {
        h.mgr
            .create_lease(resource, date("2024-02-15"), date("2024-02-17"), "userA")
            .await
            .unwrap();
    }
    h.clock.advance_secs(601);

    h.store.fail_next_deletes(1);
    let err = h.mgr.cleanup_expired_leases().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert_eq!(h.store.inner().raw_len(), 1);

    let stats = h.mgr.cleanup_expired_leases().await.unwrap();
    assert_eq!(stats.total_seen, 1);
    assert_eq!(stats.cleaned_count, 1);
    assert_eq!(h.store.inner().raw_len(), 0);
}

#[tokio::test]
async fn cleanup_reclaims_corrupt_payloads() {
    let h = harness();
    h.store
        .inner()
        .insert_raw("booking_lock:bad:2024-02-15:2024-02-17", b"\x00\x01".to_vec());
    h.mgr
        .create_lease("good", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();

    let listed = h.mgr.list_active_leases().await.unwrap();
    assert_eq!(listed.len(), 1);

    let stats = h.mgr.cleanup_expired_leases().await.unwrap();
    assert_eq!(stats.total_seen, 2);
    assert_eq!(stats.cleaned_count, 1);
}

#[tokio::test]
async fn list_attaches_store_ttl() {
    let h = harness();
    h.mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();
    h.clock.advance_secs(100);

    let views = h.mgr.list_active_leases().await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].lease.key.as_str(), P1_KEY);
    assert_eq!(views[0].ttl_seconds, Some(500));
}

#[tokio::test]
async fn store_outage_surfaces_as_store_unavailable() {
    let h = harness();
    h.store.set_unavailable(true);

    let err = h
        .mgr
        .create_lease("P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(err.is_retryable());

    let err = h.mgr.cleanup_expired_leases().await.unwrap_err();
    assert!(matches!(
        err,
        LockError::StoreUnavailable {
            op: "list_keys_by_prefix",
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn store_deadline_is_enforced() {
    let h = harness_with(LeaseSettings {
        store_timeout: Duration::from_millis(250),
        ..LeaseSettings::default()
    });
    h.store.set_stall(Some(Duration::from_secs(5)));

    let err = h
        .mgr
        .check_lease("P1", date("2024-02-15"), date("2024-02-17"))
        .await
        .unwrap_err();
    match err {
        LockError::StoreUnavailable { op, source } => {
            assert_eq!(op, "get");
            assert!(source.is_timeout());
        }
        other => panic!("expected store timeout, got {other:?}"),
    }
    // one attempt, no silent retry
    assert_eq!(h.store.calls(), 1);
}

#[tokio::test]
async fn hold_consults_durable_bookings_first() {
    let h = harness();
    let key = LeaseKey::from(P1_KEY);

    let first = h
        .mgr
        .hold_if_available(&h.bookings, "P1", date("2024-02-15"), date("2024-02-17"), "userA")
        .await
        .unwrap();
    assert!(matches!(first, HoldOutcome::Attempted(CreateOutcome::Created { .. })));
    h.mgr
        .promote_lease(&key, draft("userA"), &h.bookings)
        .await
        .unwrap();

    // overlapping range on the same resource is now durably booked
    let second = h
        .mgr
        .hold_if_available(&h.bookings, "P1", date("2024-02-16"), date("2024-02-18"), "userB")
        .await
        .unwrap();
    assert_eq!(second, HoldOutcome::Unavailable);

    let other = h
        .mgr
        .hold_if_available(&h.bookings, "P2", date("2024-02-16"), date("2024-02-18"), "userB")
        .await
        .unwrap();
    assert!(matches!(other, HoldOutcome::Attempted(CreateOutcome::Created { .. })));
}

#[tokio::test]
async fn managers_sharing_a_store_exclude_each_other() {
    let clock = ManualClock::new(common::start_time());
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    // two "instances" backed by clones of the same store
    let a = LeaseManager::with_settings(store.clone(), LeaseSettings::default(), Arc::new(clock.clone()));
    let b = LeaseManager::with_settings(store, LeaseSettings::default(), Arc::new(clock));

    let won = a
        .create_lease("P7", date("2024-03-01"), date("2024-03-05"), "userA")
        .await
        .unwrap();
    let lost = b
        .create_lease("P7", date("2024-03-01"), date("2024-03-05"), "userB")
        .await
        .unwrap();
    assert!(won.is_created());
    assert!(lost.is_conflict());
}
