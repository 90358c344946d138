//! Racing collections and lock timeouts against the in-memory store.

mod common;

use collection_service::error::{CollectionError, ErrorKind};
use collection_service::models::TokenStatus;
use collection_service::services::{
    CollectOutcome, CollectionService, DuplicatePolicy, LedgerStore,
};
use common::{collect_request, seeded_store, service, t0, ManualClock};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_collects_on_one_reference_yield_one_success() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let mut handles = Vec::new();
    for i in 0..16 {
        let svc = svc.clone();
        let vehicle_id = if i % 2 == 0 { 7 } else { 8 };
        handles.push(tokio::spawn(async move {
            svc.collect(collect_request(vehicle_id, 2, "RCPT-001")).await
        }));
    }

    let mut successes = 0;
    let mut used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(CollectOutcome::Collected(_)) => successes += 1,
            Err(CollectionError::ReferenceUsed(_)) => used += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(used, 15);
    assert_eq!(store.payments().await.len(), 1);
    assert_eq!(
        store.token("RCPT-001").await.unwrap().status,
        TokenStatus::Used
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn collects_on_distinct_references_all_succeed() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let handles: Vec<_> = [(7, 2, "RCPT-001"), (8, 2, "RCPT-002"), (7, 3, "RCPT-003")]
        .into_iter()
        .map(|(vehicle, movement, reference)| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.collect(collect_request(vehicle, movement, reference))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Ok(CollectOutcome::Collected(_))
        ));
    }
    assert_eq!(store.payments().await.len(), 3);
}

#[tokio::test]
async fn lock_wait_beyond_timeout_is_transient_and_leaves_no_trace() {
    let store = seeded_store().await;
    let svc = CollectionService::new(
        Arc::new(store.clone()),
        DuplicatePolicy::default(),
        Duration::from_millis(50),
    )
    .with_clock(ManualClock::new(t0()));

    // Another unit of work holds the store.
    let held = store.begin().await.unwrap();

    let err = svc
        .collect(collect_request(7, 2, "RCPT-001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Transient);

    drop(held);

    assert!(store.token("RCPT-001").await.unwrap().is_available());
    assert!(store.payments().await.is_empty());
    assert!(matches!(
        svc.collect(collect_request(7, 2, "RCPT-001")).await,
        Ok(CollectOutcome::Collected(_))
    ));
}
