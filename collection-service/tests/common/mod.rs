//! Common test utilities for collection-service integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use collection_service::models::VehicleRef;
use collection_service::services::{
    Clock, CollectOutcome, CollectReceipt, CollectRequest, CollectionService, Collector,
    DuplicatePolicy, MemoryStore,
};
use collection_service::startup::{build_router, AppState};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,collection_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Vehicle 7 (`ABC-123`, car type 1) and vehicle 8 (`XYZ-900`, car type 2);
/// movement 2 "Transit" and 3 "Stationed"; rates 15.00 / 30.00 for car
/// type 1 and 20.00 transit for car type 2; tokens RCPT-001 to RCPT-005.
pub async fn seeded_store() -> MemoryStore {
    init_tracing();

    let store = MemoryStore::new();
    store.add_vehicle(7, "ABC-123", "Lina Haddad", 1).await;
    store.add_vehicle(8, "XYZ-900", "Omar Said", 2).await;
    store.add_movement(2, "Transit").await;
    store.add_movement(3, "Stationed").await;
    store.add_tax_rate(1, 2, dec!(15.00)).await;
    store.add_tax_rate(1, 3, dec!(30.00)).await;
    store.add_tax_rate(2, 2, dec!(20.00)).await;
    for n in 1..=5 {
        store.add_token(&format!("RCPT-{:03}", n)).await;
    }
    store
}

pub fn service(
    store: &MemoryStore,
    clock: Arc<ManualClock>,
    policy: DuplicatePolicy,
) -> CollectionService<MemoryStore> {
    CollectionService::new(
        Arc::new(store.clone()),
        policy,
        std::time::Duration::from_secs(5),
    )
    .with_clock(clock)
}

pub fn app(service: CollectionService<MemoryStore>) -> axum::Router {
    build_router(AppState::new(service))
}

pub fn collector() -> Collector {
    Collector {
        id: 4,
        name: "Amina".to_string(),
    }
}

pub fn admin() -> Collector {
    Collector {
        id: 9,
        name: "Supervisor".to_string(),
    }
}

pub fn collect_request(vehicle_id: i64, movement_id: i64, reference: &str) -> CollectRequest {
    CollectRequest {
        vehicle: VehicleRef::Id(vehicle_id),
        movement_id,
        quantity: Some(1),
        reference_number: reference.to_string(),
        collector: collector(),
        force: false,
    }
}

pub fn expect_collected(outcome: CollectOutcome) -> CollectReceipt {
    match outcome {
        CollectOutcome::Collected(receipt) => receipt,
        other => panic!("expected a collected payment, got {:?}", other),
    }
}
