//! Collection service: the entry point for every collection-side operation.
//!
//! Each operation validates its input, runs inside one unit of work bounded
//! by the request timeout, and records its outcome in the service metrics.
//! A timed-out unit of work is dropped, which rolls it back.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::error::CollectionError;
use crate::models::{CollectorPayment, Payment, ReceiptToken, Vehicle, VehicleRef};
use crate::services::duplicate_guard::DuplicatePolicy;
use crate::services::ledger::{self, CollectOutcome, CollectRequest, Collector, Quote};
use crate::services::metrics::{AMOUNT_TOTAL, COLLECTIONS_TOTAL, REVERSALS_TOTAL};
use crate::services::store::{unit_of_work, LedgerStore, UnitOfWork};
use crate::services::token_store::{self, ReferenceStatus};

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Payment history of one vehicle.
#[derive(Debug, Clone, Serialize)]
pub struct VehiclePayments {
    pub vehicle: Vehicle,
    pub payments: Vec<Payment>,
}

/// Non-reverted money taken in `[from, to)`.
#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: i64,
    pub total: Decimal,
}

pub struct CollectionService<S: LedgerStore> {
    store: Arc<S>,
    policy: DuplicatePolicy,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> Clone for CollectionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
            request_timeout: self.request_timeout,
            clock: self.clock.clone(),
        }
    }
}

impl<S: LedgerStore> CollectionService<S> {
    pub fn new(store: Arc<S>, policy: DuplicatePolicy, request_timeout: Duration) -> Self {
        Self {
            store,
            policy,
            request_timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &DuplicatePolicy {
        &self.policy
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T, CollectionError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, CollectionError>> + Send,
    {
        match tokio::time::timeout(self.request_timeout, unit_of_work(self.store.as_ref(), work))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Unit of work timed out"
                );
                Err(CollectionError::Timeout)
            }
        }
    }

    /// Collect a tax payment against a receipt reference.
    #[instrument(skip(self, request), fields(reference = %request.reference_number))]
    pub async fn collect(
        &self,
        mut request: CollectRequest,
    ) -> Result<CollectOutcome, CollectionError> {
        request.reference_number = request.reference_number.trim().to_string();
        if request.reference_number.is_empty() {
            COLLECTIONS_TOTAL.with_label_values(&["INVALID_INPUT"]).inc();
            return Err(CollectionError::InvalidInput(
                "Reference number is required".to_string(),
            ));
        }
        if let VehicleRef::Plate(plate) = &request.vehicle {
            request.vehicle = VehicleRef::plate(plate);
        }

        let policy = self.policy;
        let now = self.clock.now();
        let result = self
            .run("collect", move |tx| {
                Box::pin(async move { ledger::collect(tx, &request, &policy, now).await })
            })
            .await;

        match &result {
            Ok(CollectOutcome::Collected(receipt)) => {
                COLLECTIONS_TOTAL.with_label_values(&["collected"]).inc();
                AMOUNT_TOTAL
                    .with_label_values(&["collected"])
                    .inc_by(receipt.payment.amount.to_f64().unwrap_or(0.0));
            }
            Ok(CollectOutcome::NeedsConfirmation(_)) => {
                COLLECTIONS_TOTAL
                    .with_label_values(&["needs_confirmation"])
                    .inc();
            }
            Err(e) => {
                COLLECTIONS_TOTAL.with_label_values(&[e.code()]).inc();
            }
        }

        result
    }

    /// Revert a payment. `reason` must not be blank.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.id))]
    pub async fn revert(
        &self,
        payment_id: i64,
        actor: &Collector,
        reason: &str,
    ) -> Result<Payment, CollectionError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            REVERSALS_TOTAL.with_label_values(&["REASON_REQUIRED"]).inc();
            return Err(CollectionError::ReasonRequired);
        }

        let actor_id = actor.id;
        let now = self.clock.now();
        let result = self
            .run("revert", move |tx| {
                Box::pin(
                    async move { ledger::revert(tx, payment_id, actor_id, &reason, now).await },
                )
            })
            .await;

        match &result {
            Ok(payment) => {
                REVERSALS_TOTAL.with_label_values(&["reverted"]).inc();
                AMOUNT_TOTAL
                    .with_label_values(&["reverted"])
                    .inc_by(payment.amount.to_f64().unwrap_or(0.0));
            }
            Err(e) => {
                REVERSALS_TOTAL.with_label_values(&[e.code()]).inc();
            }
        }

        result
    }

    /// Cancel an available receipt token.
    #[instrument(skip(self, reason, actor), fields(actor = %actor.name))]
    pub async fn cancel_token(
        &self,
        token_id: i64,
        reason: Option<String>,
        actor: &Collector,
    ) -> Result<ReceiptToken, CollectionError> {
        let actor_name = actor.name.clone();
        let now = self.clock.now();
        self.run("cancel_token", move |tx| {
            Box::pin(async move {
                token_store::cancel(tx, token_id, reason.as_deref(), &actor_name, now).await
            })
        })
        .await
    }

    /// Register a single receipt reference as available.
    pub async fn register_reference(
        &self,
        reference_number: &str,
    ) -> Result<ReceiptToken, CollectionError> {
        let reference = reference_number.to_string();
        self.run("register_reference", move |tx| {
            Box::pin(async move { token_store::register(tx, &reference).await })
        })
        .await
    }

    pub async fn lookup_reference(
        &self,
        reference_number: &str,
    ) -> Result<ReferenceStatus, CollectionError> {
        let reference = reference_number.to_string();
        self.run("lookup_reference", move |tx| {
            Box::pin(async move { token_store::lookup(tx, &reference).await })
        })
        .await
    }

    /// Price a movement for a vehicle without recording anything.
    pub async fn quote(
        &self,
        vehicle: VehicleRef,
        movement_id: i64,
        quantity: Option<i32>,
    ) -> Result<Quote, CollectionError> {
        self.run("quote", move |tx| {
            Box::pin(async move { ledger::quote(tx, &vehicle, movement_id, quantity).await })
        })
        .await
    }

    pub async fn get_payment(&self, payment_id: i64) -> Result<Payment, CollectionError> {
        self.run("get_payment", move |tx| {
            Box::pin(async move {
                tx.find_payment(payment_id)
                    .await?
                    .ok_or(CollectionError::PaymentNotFound(payment_id))
            })
        })
        .await
    }

    /// Every payment of a vehicle, reverted ones included, newest first.
    pub async fn vehicle_payments(
        &self,
        vehicle: VehicleRef,
    ) -> Result<VehiclePayments, CollectionError> {
        self.run("vehicle_payments", move |tx| {
            Box::pin(async move {
                let found = tx
                    .find_vehicle(&vehicle)
                    .await?
                    .ok_or_else(|| CollectionError::VehicleNotFound(vehicle.to_string()))?;
                let payments = tx.payments_for_vehicle(found.id).await?;
                Ok(VehiclePayments {
                    vehicle: found,
                    payments,
                })
            })
        })
        .await
    }

    /// Non-reverted payments taken by one collector, newest first.
    pub async fn collector_payments(
        &self,
        collector_id: i64,
    ) -> Result<Vec<CollectorPayment>, CollectionError> {
        self.run("collector_payments", move |tx| {
            Box::pin(async move { Ok(tx.payments_by_collector(collector_id).await?) })
        })
        .await
    }

    /// Count and sum of non-reverted payments in `[from, to)`.
    pub async fn totals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Totals, CollectionError> {
        if from >= to {
            return Err(CollectionError::InvalidInput(
                "'from' must be earlier than 'to'".to_string(),
            ));
        }

        let totals = self
            .run("totals", move |tx| {
                Box::pin(async move {
                    let (count, total) = tx.totals(from, to).await?;
                    Ok(Totals {
                        from,
                        to,
                        count,
                        total,
                    })
                })
            })
            .await?;

        info!(count = totals.count, total = %totals.total, "Totals computed");
        Ok(totals)
    }
}
