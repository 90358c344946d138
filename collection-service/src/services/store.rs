//! Storage seam for the collection core.
//!
//! Every read and write the core performs goes through a [`UnitOfWork`]
//! obtained from a [`LedgerStore`]. A unit of work is one transaction: the
//! `lock_*` methods take row-level exclusive locks that are held until
//! `commit` or `rollback`. Dropping an unfinished unit of work rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::models::{
    CollectorPayment, Movement, NewPayment, Payment, PriorPayment, ReceiptToken, TaxRate,
    Vehicle, VehicleRef,
};

/// Source of transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: UnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, AppError>;
}

/// One open transaction against the shared store.
#[async_trait]
pub trait UnitOfWork: Send {
    // -- master data ---------------------------------------------------------

    async fn find_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError>;

    /// Like `find_vehicle`, but holds the vehicle row until the transaction
    /// ends so concurrent collections for the same vehicle see each other.
    async fn lock_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError>;

    async fn find_movement(&mut self, movement_id: i64) -> Result<Option<Movement>, AppError>;

    async fn find_tax_rate(
        &mut self,
        car_type_id: i64,
        movement_id: i64,
    ) -> Result<Option<TaxRate>, AppError>;

    // -- receipt tokens ------------------------------------------------------

    async fn lock_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError>;

    async fn lock_token(&mut self, token_id: i64) -> Result<Option<ReceiptToken>, AppError>;

    async fn find_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError>;

    /// Insert an available token. Returns `None` if the reference exists.
    async fn insert_token(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError>;

    /// Write back status, usage and cancellation columns of a locked token.
    async fn save_token(&mut self, token: &ReceiptToken) -> Result<(), AppError>;

    // -- payments ------------------------------------------------------------

    /// Non-reverted payments the duplicate guard needs: the latest one for
    /// (vehicle, movement, amount) whatever its age, plus every payment for
    /// the vehicle at or after `since`.
    async fn prior_payments(
        &mut self,
        vehicle_id: i64,
        movement_id: i64,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriorPayment>, AppError>;

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError>;

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError>;

    async fn lock_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError>;

    /// Write back the revert columns of a locked payment.
    async fn save_payment_revert(&mut self, payment: &Payment) -> Result<(), AppError>;

    /// Every payment for a vehicle, newest first.
    async fn payments_for_vehicle(&mut self, vehicle_id: i64) -> Result<Vec<Payment>, AppError>;

    /// Non-reverted payments taken by a collector, newest first, with the
    /// vehicle and receipt reference of each.
    async fn payments_by_collector(
        &mut self,
        collector_id: i64,
    ) -> Result<Vec<CollectorPayment>, AppError>;

    /// Count and sum of non-reverted payments with `from <= paid_at < to`.
    async fn totals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal), AppError>;

    // -- lifecycle -----------------------------------------------------------

    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}

/// Run `work` inside one transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. The
/// closure must own what it captures; the returned future borrows only the
/// transaction.
pub async fn unit_of_work<S, T, E, F>(store: &S, work: F) -> Result<T, E>
where
    S: LedgerStore,
    E: From<AppError>,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, E>>,
{
    let mut tx = store.begin().await?;

    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
