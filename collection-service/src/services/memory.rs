//! In-process ledger store.
//!
//! One async mutex guards the whole state, so units of work run one at a
//! time. Each unit of work snapshots the state when it starts and puts the
//! snapshot back unless it commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    CollectorPayment, Movement, NewPayment, Payment, PriorPayment, ReceiptToken, TaxRate, Vehicle, VehicleRef,
};
use crate::services::store::{LedgerStore, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    vehicles: BTreeMap<i64, Vehicle>,
    movements: HashMap<i64, Movement>,
    tax_rates: HashMap<(i64, i64), Decimal>,
    tokens: BTreeMap<i64, ReceiptToken>,
    payments: BTreeMap<i64, Payment>,
    next_token_id: i64,
    next_payment_id: i64,
}

impl MemoryState {
    fn vehicle(&self, vehicle: &VehicleRef) -> Option<Vehicle> {
        self.vehicles.values().find(|v| vehicle.matches(v)).cloned()
    }

    fn token_by_reference(&self, reference_number: &str) -> Option<ReceiptToken> {
        self.tokens
            .values()
            .find(|t| t.reference_number == reference_number)
            .cloned()
    }

    fn push_token(&mut self, reference_number: &str) -> ReceiptToken {
        self.next_token_id += 1;
        let token = ReceiptToken::available(self.next_token_id, reference_number);
        self.tokens.insert(token.id, token.clone());
        token
    }

    fn push_payment(&mut self, new: &NewPayment) -> Payment {
        self.next_payment_id += 1;
        let payment = Payment {
            id: self.next_payment_id,
            vehicle_id: new.vehicle_id,
            movement_id: new.movement_id,
            movement_label: new.movement_label.clone(),
            amount: new.amount,
            paid_at: new.paid_at,
            collector_id: new.collector_id,
            receipt_token_id: new.receipt_token_id,
            is_reverted: false,
            revert_reason: None,
            reverted_at: None,
            reverted_by_id: None,
        };
        self.payments.insert(payment.id, payment.clone());
        payment
    }
}

/// Ledger store kept in process memory. Cloning shares the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_payment_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_vehicle(&self, id: i64, plate_number: &str, owner_name: &str, car_type_id: i64) {
        self.state.lock().await.vehicles.insert(
            id,
            Vehicle {
                id,
                plate_number: plate_number.to_string(),
                owner_name: owner_name.to_string(),
                car_type_id,
            },
        );
    }

    pub async fn add_movement(&self, id: i64, name: &str) {
        self.state.lock().await.movements.insert(
            id,
            Movement {
                id,
                name: name.to_string(),
            },
        );
    }

    pub async fn add_tax_rate(&self, car_type_id: i64, movement_id: i64, amount: Decimal) {
        self.state
            .lock()
            .await
            .tax_rates
            .insert((car_type_id, movement_id), amount);
    }

    /// Register an available token and return its id.
    pub async fn add_token(&self, reference_number: &str) -> i64 {
        self.state.lock().await.push_token(reference_number).id
    }

    /// Record a payment directly, bypassing every check.
    pub async fn add_payment(&self, payment: NewPayment) -> Payment {
        self.state.lock().await.push_payment(&payment)
    }

    pub async fn token(&self, reference_number: &str) -> Option<ReceiptToken> {
        self.state.lock().await.token_by_reference(reference_number)
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    /// Make every following `insert_payment` fail with a storage error.
    pub fn fail_payment_inserts(&self, fail: bool) {
        self.fail_payment_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemoryTx {
            guard,
            snapshot: Some(snapshot),
            fail_payment_inserts: self.fail_payment_inserts.load(Ordering::SeqCst),
        })
    }
}

/// Exclusive access to the store state for the life of one unit of work.
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
    fail_payment_inserts: bool,
}

impl MemoryTx {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.restore();
    }
}

fn newest_first(mut payments: Vec<Payment>) -> Vec<Payment> {
    payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at).then(b.id.cmp(&a.id)));
    payments
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn find_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError> {
        Ok(self.guard.vehicle(vehicle))
    }

    async fn lock_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError> {
        Ok(self.guard.vehicle(vehicle))
    }

    async fn find_movement(&mut self, movement_id: i64) -> Result<Option<Movement>, AppError> {
        Ok(self.guard.movements.get(&movement_id).cloned())
    }

    async fn find_tax_rate(
        &mut self,
        car_type_id: i64,
        movement_id: i64,
    ) -> Result<Option<TaxRate>, AppError> {
        Ok(self
            .guard
            .tax_rates
            .get(&(car_type_id, movement_id))
            .map(|amount| TaxRate {
                car_type_id,
                movement_id,
                amount: *amount,
            }))
    }

    async fn lock_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        Ok(self.guard.token_by_reference(reference_number))
    }

    async fn lock_token(&mut self, token_id: i64) -> Result<Option<ReceiptToken>, AppError> {
        Ok(self.guard.tokens.get(&token_id).cloned())
    }

    async fn find_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        Ok(self.guard.token_by_reference(reference_number))
    }

    async fn insert_token(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        if self.guard.token_by_reference(reference_number).is_some() {
            return Ok(None);
        }
        Ok(Some(self.guard.push_token(reference_number)))
    }

    async fn save_token(&mut self, token: &ReceiptToken) -> Result<(), AppError> {
        match self.guard.tokens.get_mut(&token.id) {
            Some(row) => {
                *row = token.clone();
                Ok(())
            }
            None => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Receipt token {} vanished",
                token.id
            ))),
        }
    }

    async fn prior_payments(
        &mut self,
        vehicle_id: i64,
        movement_id: i64,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriorPayment>, AppError> {
        let live = || {
            self.guard
                .payments
                .values()
                .filter(move |p| p.vehicle_id == vehicle_id && !p.is_reverted)
        };

        let mut history: Vec<PriorPayment> = live()
            .filter(|p| p.paid_at >= since)
            .map(Payment::as_prior)
            .collect();

        let last_exact = live()
            .filter(|p| p.movement_id == movement_id && p.amount == amount)
            .max_by_key(|p| p.paid_at);
        if let Some(last) = last_exact {
            if !history.iter().any(|p| p.payment_id == last.id) {
                history.push(last.as_prior());
            }
        }

        Ok(history)
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError> {
        if self.fail_payment_inserts {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert_payment: injected failure"
            )));
        }
        Ok(self.guard.push_payment(payment))
    }

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError> {
        Ok(self.guard.payments.get(&payment_id).cloned())
    }

    async fn lock_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError> {
        Ok(self.guard.payments.get(&payment_id).cloned())
    }

    async fn save_payment_revert(&mut self, payment: &Payment) -> Result<(), AppError> {
        match self.guard.payments.get_mut(&payment.id) {
            Some(row) => {
                row.is_reverted = payment.is_reverted;
                row.revert_reason = payment.revert_reason.clone();
                row.reverted_at = payment.reverted_at;
                row.reverted_by_id = payment.reverted_by_id;
                Ok(())
            }
            None => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Payment {} vanished",
                payment.id
            ))),
        }
    }

    async fn payments_for_vehicle(&mut self, vehicle_id: i64) -> Result<Vec<Payment>, AppError> {
        Ok(newest_first(
            self.guard
                .payments
                .values()
                .filter(|p| p.vehicle_id == vehicle_id)
                .cloned()
                .collect(),
        ))
    }

    async fn payments_by_collector(
        &mut self,
        collector_id: i64,
    ) -> Result<Vec<CollectorPayment>, AppError> {
        let state = &*self.guard;
        let payments = newest_first(
            state
                .payments
                .values()
                .filter(|p| p.collector_id == collector_id && !p.is_reverted)
                .cloned()
                .collect(),
        );

        Ok(payments
            .into_iter()
            .filter_map(|payment| {
                let vehicle = state.vehicles.get(&payment.vehicle_id)?;
                let token = payment
                    .receipt_token_id
                    .and_then(|id| state.tokens.get(&id));
                Some(CollectorPayment {
                    plate_number: vehicle.plate_number.clone(),
                    owner_name: vehicle.owner_name.clone(),
                    reference_number: token.map(|t| t.reference_number.clone()),
                    collector_name: token.and_then(|t| t.used_by.clone()),
                    payment,
                })
            })
            .collect())
    }

    async fn totals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal), AppError> {
        Ok(self
            .guard
            .payments
            .values()
            .filter(|p| !p.is_reverted && p.paid_at >= from && p.paid_at < to)
            .fold((0, Decimal::ZERO), |(count, total), p| {
                (count + 1, total + p.amount)
            }))
    }

    async fn commit(mut self) -> Result<(), AppError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), AppError> {
        self.restore();
        Ok(())
    }
}
