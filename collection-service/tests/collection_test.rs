//! Collection and reversal scenarios against the in-memory store.

mod common;

use chrono::Duration;
use collection_service::error::{CollectionError, ErrorKind};
use collection_service::models::{NewPayment, TokenStatus, VehicleRef};
use collection_service::services::{CollectOutcome, DuplicatePolicy, GuardMode};
use common::{
    admin, collect_request, collector, expect_collected, seeded_store, service, t0, ManualClock,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn collect_consumes_token_and_records_payment() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let receipt = expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());

    assert_eq!(receipt.payment.amount, dec!(15.00));
    assert_eq!(receipt.payment.vehicle_id, 7);
    assert_eq!(receipt.payment.movement_label, "Transit");
    assert_eq!(receipt.payment.paid_at, t0());
    assert_eq!(receipt.collector_name, "Amina");
    assert_eq!(receipt.reference_number, "RCPT-001");

    let token = store.token("RCPT-001").await.unwrap();
    assert_eq!(token.status, TokenStatus::Used);
    assert_eq!(token.vehicle_id, Some(7));
    assert_eq!(token.used_by.as_deref(), Some("Amina"));
    assert_eq!(token.used_at, Some(t0()));
    assert_eq!(receipt.payment.receipt_token_id, Some(token.id));
}

#[tokio::test]
async fn repeating_the_same_collect_fails_with_reference_used() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    let err = svc
        .collect(collect_request(7, 2, "RCPT-001"))
        .await
        .unwrap_err();

    assert!(matches!(err, CollectionError::ReferenceUsed(ref r) if r == "RCPT-001"));
    assert_eq!(store.payments().await.len(), 1);
}

#[tokio::test]
async fn revert_releases_token_and_unblocks_recollection() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    let receipt = expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());
    clock.advance(Duration::seconds(30));

    let reverted = svc
        .revert(receipt.payment.id, &admin(), "wrong vehicle")
        .await
        .unwrap();
    assert!(reverted.is_reverted);
    assert_eq!(reverted.revert_reason.as_deref(), Some("wrong vehicle"));
    assert_eq!(reverted.reverted_by_id, Some(9));
    // The original record is kept as it was.
    assert_eq!(reverted.amount, dec!(15.00));
    assert_eq!(reverted.vehicle_id, 7);

    let token = store.token("RCPT-001").await.unwrap();
    assert_eq!(token.status, TokenStatus::Available);
    assert_eq!(token.vehicle_id, None);
    assert_eq!(token.used_by, None);
    assert_eq!(token.used_at, None);

    clock.advance(Duration::seconds(30));
    let again = svc.collect(collect_request(7, 2, "RCPT-002")).await.unwrap();
    assert!(matches!(again, CollectOutcome::Collected(_)));
}

#[tokio::test]
async fn duplicate_guard_blocks_inside_window_and_warns_after() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();

    clock.advance(Duration::minutes(5));
    let err = svc
        .collect(collect_request(7, 2, "RCPT-002"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::DuplicateBlocked { last_payment_at } if last_payment_at == t0()));
    assert_eq!(err.kind(), ErrorKind::PolicyBlocked);
    // A block has no side effects.
    assert!(store.token("RCPT-002").await.unwrap().is_available());

    clock.advance(Duration::minutes(10));
    match svc.collect(collect_request(7, 2, "RCPT-002")).await.unwrap() {
        CollectOutcome::NeedsConfirmation(notice) => {
            assert_eq!(notice.last_payment_at, t0());
            assert_eq!(notice.amount, dec!(15.00));
        }
        other => panic!("expected a duplicate warning, got {:?}", other),
    }
    assert!(store.token("RCPT-002").await.unwrap().is_available());
    assert_eq!(store.payments().await.len(), 1);

    let mut forced = collect_request(7, 2, "RCPT-002");
    forced.force = true;
    expect_collected(svc.collect(forced).await.unwrap());
    assert_eq!(store.payments().await.len(), 2);
}

#[tokio::test]
async fn reverted_payment_is_ignored_by_the_guard() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    let receipt = expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());
    svc.revert(receipt.payment.id, &admin(), "typo")
        .await
        .unwrap();

    clock.advance(Duration::minutes(1));
    expect_collected(svc.collect(collect_request(7, 2, "RCPT-002")).await.unwrap());
}

#[tokio::test]
async fn different_amount_is_not_a_duplicate() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    clock.advance(Duration::minutes(1));

    let mut double = collect_request(7, 2, "RCPT-002");
    double.quantity = Some(2);
    let receipt = expect_collected(svc.collect(double).await.unwrap());
    assert_eq!(receipt.payment.amount, dec!(30.00));
    assert_eq!(receipt.quantity, 2);
}

#[tokio::test]
async fn cross_movement_flag_warns_for_other_movements() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let policy = DuplicatePolicy {
        cross_movement: true,
        ..DuplicatePolicy::default()
    };
    let svc = service(&store, clock.clone(), policy);

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    clock.advance(Duration::minutes(2));

    let outcome = svc.collect(collect_request(7, 3, "RCPT-002")).await.unwrap();
    assert!(matches!(outcome, CollectOutcome::NeedsConfirmation(_)));
}

#[tokio::test]
async fn block_only_mode_allows_after_window() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let policy = DuplicatePolicy {
        mode: GuardMode::BlockOnly,
        ..DuplicatePolicy::default()
    };
    let svc = service(&store, clock.clone(), policy);

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    clock.advance(Duration::minutes(15));
    expect_collected(svc.collect(collect_request(7, 2, "RCPT-002")).await.unwrap());
}

#[tokio::test]
async fn old_duplicate_outside_recent_history_still_warns() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    store
        .add_payment(NewPayment {
            vehicle_id: 7,
            movement_id: 2,
            movement_label: "Transit".to_string(),
            amount: dec!(15.00),
            paid_at: t0() - Duration::days(40),
            collector_id: 4,
            receipt_token_id: None,
        })
        .await;

    let outcome = svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    match outcome {
        CollectOutcome::NeedsConfirmation(notice) => {
            assert_eq!(notice.last_payment_at, t0() - Duration::days(40))
        }
        other => panic!("expected a duplicate warning, got {:?}", other),
    }
}

#[tokio::test]
async fn revert_keeps_cancelled_token_cancelled() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    // A legacy payment linked to a token that was later cancelled.
    let token_id = store.add_token("LEGACY-1").await;
    svc.cancel_token(token_id, Some("damaged".to_string()), &admin())
        .await
        .unwrap();
    let payment = store
        .add_payment(NewPayment {
            vehicle_id: 8,
            movement_id: 2,
            movement_label: "Transit".to_string(),
            amount: dec!(20.00),
            paid_at: t0() - Duration::hours(1),
            collector_id: 4,
            receipt_token_id: Some(token_id),
        })
        .await;

    svc.revert(payment.id, &admin(), "duplicate entry")
        .await
        .unwrap();

    let token = store.token("LEGACY-1").await.unwrap();
    assert_eq!(token.status, TokenStatus::Cancelled);
    assert_eq!(token.cancelled_reason.as_deref(), Some("damaged"));
}

#[tokio::test]
async fn failed_payment_insert_leaves_token_available() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    store.fail_payment_inserts(true);
    let err = svc
        .collect(collect_request(7, 2, "RCPT-001"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(err.code(), "STORAGE_UNAVAILABLE");

    let token = store.token("RCPT-001").await.unwrap();
    assert_eq!(token.status, TokenStatus::Available);
    assert!(store.payments().await.is_empty());

    store.fail_payment_inserts(false);
    expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());
}

#[tokio::test]
async fn collect_failures_leave_no_trace() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let err = svc
        .collect(collect_request(99, 2, "RCPT-001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::VehicleNotFound(_)));

    let err = svc
        .collect(collect_request(7, 42, "RCPT-001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::MovementNotFound(42)));

    let err = svc
        .collect(collect_request(8, 3, "RCPT-001"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CollectionError::TaxNotConfigured {
            car_type_id: 2,
            movement_id: 3
        }
    ));

    let err = svc
        .collect(collect_request(7, 2, "NOPE-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::ReferenceInvalid(_)));

    let err = svc.collect(collect_request(7, 2, "   ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    assert!(store.payments().await.is_empty());
    assert!(store.token("RCPT-001").await.unwrap().is_available());
}

#[tokio::test]
async fn cancelled_reference_cannot_be_collected() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let token = store.token("RCPT-003").await.unwrap();
    svc.cancel_token(token.id, None, &admin()).await.unwrap();

    let err = svc
        .collect(collect_request(7, 2, "RCPT-003"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::ReferenceCancelled(_)));
}

#[tokio::test]
async fn used_token_cannot_be_cancelled() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap();
    let token = store.token("RCPT-001").await.unwrap();

    let err = svc
        .cancel_token(token.id, Some("lost".to_string()), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::TokenAlreadyUsed(_)));

    let token = store.token("RCPT-002").await.unwrap();
    svc.cancel_token(token.id, Some("  ".to_string()), &admin())
        .await
        .unwrap();
    let err = svc
        .cancel_token(token.id, None, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::TokenAlreadyCancelled(_)));

    let cancelled = store.token("RCPT-002").await.unwrap();
    assert_eq!(cancelled.cancelled_reason, None);
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("Supervisor"));
}

#[tokio::test]
async fn revert_requires_reason_and_rejects_second_attempt() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let receipt = expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());

    let err = svc
        .revert(receipt.payment.id, &admin(), "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::ReasonRequired));
    assert!(!store.payments().await[0].is_reverted);

    svc.revert(receipt.payment.id, &admin(), "wrong plate")
        .await
        .unwrap();
    let err = svc
        .revert(receipt.payment.id, &admin(), "again")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::AlreadyReverted(_)));

    let err = svc.revert(9999, &admin(), "missing").await.unwrap_err();
    assert!(matches!(err, CollectionError::PaymentNotFound(9999)));
}

#[tokio::test]
async fn collect_by_plate_and_quantity_coercion() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let mut request = collect_request(0, 3, "  RCPT-004 ");
    request.vehicle = VehicleRef::Plate("  abc-123 ".to_string());
    request.quantity = Some(0);

    let receipt = expect_collected(svc.collect(request).await.unwrap());
    assert_eq!(receipt.payment.vehicle_id, 7);
    assert_eq!(receipt.quantity, 1);
    assert_eq!(receipt.payment.amount, dec!(30.00));
    assert_eq!(receipt.reference_number, "RCPT-004");
}

#[tokio::test]
async fn oversized_amount_is_invalid_input_and_keeps_token() {
    let store = seeded_store().await;
    store.add_tax_rate(2, 3, dec!(1000.00)).await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let mut request = collect_request(8, 3, "RCPT-001");
    request.quantity = Some(i32::MAX);

    let err = svc.collect(request).await.unwrap_err();
    assert!(matches!(err, CollectionError::InvalidInput(_)));
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(store.token("RCPT-001").await.unwrap().is_available());
    assert!(store.payments().await.is_empty());

    let err = svc
        .quote(VehicleRef::Id(8), 3, Some(i32::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn quote_prices_without_side_effects() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let quote = svc.quote(VehicleRef::Id(7), 3, Some(3)).await.unwrap();
    assert_eq!(quote.charge.unit_amount, dec!(30.00));
    assert_eq!(quote.charge.amount, dec!(90.00));
    assert_eq!(quote.movement_label, "Stationed");
    assert!(store.payments().await.is_empty());

    let err = svc.quote(VehicleRef::Id(8), 3, None).await.unwrap_err();
    assert!(matches!(err, CollectionError::TaxNotConfigured { .. }));
}

#[tokio::test]
async fn totals_and_listings_exclude_reverted_payments() {
    let store = seeded_store().await;
    let clock = ManualClock::new(t0());
    let svc = service(&store, clock.clone(), DuplicatePolicy::default());

    let first = expect_collected(svc.collect(collect_request(7, 2, "RCPT-001")).await.unwrap());
    clock.advance(Duration::minutes(1));
    expect_collected(svc.collect(collect_request(8, 2, "RCPT-002")).await.unwrap());
    clock.advance(Duration::minutes(1));
    expect_collected(svc.collect(collect_request(7, 3, "RCPT-003")).await.unwrap());

    svc.revert(first.payment.id, &admin(), "wrong vehicle")
        .await
        .unwrap();

    let totals = svc
        .totals(t0(), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(totals.count, 2);
    assert_eq!(totals.total, dec!(50.00));

    // The upper bound is exclusive.
    let totals = svc
        .totals(t0(), t0() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(totals.count, 0);

    let err = svc.totals(t0(), t0()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let history = svc.vehicle_payments(VehicleRef::Id(7)).await.unwrap();
    assert_eq!(history.payments.len(), 2);
    assert_eq!(history.payments[0].movement_id, 3);
    assert!(history.payments[1].is_reverted);

    let mine = svc.collector_payments(collector().id).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|p| !p.payment.is_reverted));
    assert!(mine.iter().all(|p| p.collector_name.as_deref() == Some("Amina")));
    assert!(mine.iter().all(|p| p.reference_number.is_some()));
}

#[tokio::test]
async fn register_and_lookup_references() {
    let store = seeded_store().await;
    let svc = service(&store, ManualClock::new(t0()), DuplicatePolicy::default());

    let token = svc.register_reference("  NEW-100 ").await.unwrap();
    assert_eq!(token.reference_number, "NEW-100");
    assert_eq!(token.status, TokenStatus::Available);

    let err = svc.register_reference("NEW-100").await.unwrap_err();
    assert!(matches!(err, CollectionError::ReferenceExists(_)));
    // References are case-sensitive.
    svc.register_reference("new-100").await.unwrap();

    let unknown = svc.lookup_reference("MISSING").await.unwrap();
    assert!(!unknown.exists);

    svc.collect(collect_request(7, 2, "NEW-100")).await.unwrap();
    let used = svc.lookup_reference("NEW-100").await.unwrap();
    assert!(used.exists);
    assert!(used.is_used);
    assert_eq!(used.vehicle_id, Some(7));
    assert_eq!(used.used_by.as_deref(), Some("Amina"));
}
