//! Payment ledger.
//!
//! Owns creation and reversal of payment rows and the used/available
//! transitions of the tokens they consume. Both operations run inside a
//! unit of work supplied by the caller; nothing here commits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::CollectionError;
use crate::models::{NewPayment, Payment, PaymentRevert, VehicleRef};
use crate::services::duplicate_guard::{Candidate, Decision, DuplicatePolicy};
use crate::services::store::UnitOfWork;
use crate::services::tax_rate::{self, Charge};
use crate::services::token_store;

/// Identity of the staff member taking the payment, already resolved by
/// the authentication layer.
#[derive(Debug, Clone, Serialize)]
pub struct Collector {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub vehicle: VehicleRef,
    pub movement_id: i64,
    pub quantity: Option<i32>,
    pub reference_number: String,
    pub collector: Collector,
    /// Proceed past a duplicate warning.
    pub force: bool,
}

/// A persisted collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectReceipt {
    pub payment: Payment,
    pub reference_number: String,
    pub collector_name: String,
    pub unit_amount: Decimal,
    pub quantity: i32,
}

/// Soft stop: an earlier identical payment exists and the caller has to
/// confirm with `force`.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateNotice {
    pub vehicle_id: i64,
    pub movement_id: i64,
    pub amount: Decimal,
    pub last_payment_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectOutcome {
    Collected(CollectReceipt),
    NeedsConfirmation(DuplicateNotice),
}

/// Collect a payment.
///
/// Vehicle, movement and rate are resolved first, then the token is locked
/// and checked, then the duplicate guard runs, and only then are the token
/// and payment written. Any error leaves the unit of work to be rolled back.
#[instrument(
    skip(tx, request, policy),
    fields(
        vehicle = %request.vehicle,
        movement_id = request.movement_id,
        reference = %request.reference_number,
        collector_id = request.collector.id,
        force = request.force
    )
)]
pub async fn collect<U: UnitOfWork>(
    tx: &mut U,
    request: &CollectRequest,
    policy: &DuplicatePolicy,
    now: DateTime<Utc>,
) -> Result<CollectOutcome, CollectionError> {
    let vehicle = tx
        .lock_vehicle(&request.vehicle)
        .await?
        .ok_or_else(|| CollectionError::VehicleNotFound(request.vehicle.to_string()))?;

    let movement = tx
        .find_movement(request.movement_id)
        .await?
        .ok_or(CollectionError::MovementNotFound(request.movement_id))?;

    let unit_amount = tax_rate::resolve(tx, vehicle.car_type_id, movement.id).await?;
    let charge = Charge::new(unit_amount, request.quantity)?;

    let claimed = token_store::claim(tx, &request.reference_number).await?;

    let candidate = Candidate {
        vehicle_id: vehicle.id,
        movement_id: movement.id,
        amount: charge.amount,
    };
    let history = tx
        .prior_payments(vehicle.id, movement.id, charge.amount, policy.horizon(now))
        .await?;

    match policy.evaluate(&candidate, &history, now) {
        Decision::Allow => {}
        Decision::Block { last_payment_at } => {
            info!(%last_payment_at, "Duplicate collection blocked");
            return Err(CollectionError::DuplicateBlocked { last_payment_at });
        }
        Decision::Warn { last_payment_at } if !request.force => {
            info!(%last_payment_at, "Duplicate collection needs confirmation");
            return Ok(CollectOutcome::NeedsConfirmation(DuplicateNotice {
                vehicle_id: vehicle.id,
                movement_id: movement.id,
                amount: charge.amount,
                last_payment_at,
            }));
        }
        Decision::Warn { last_payment_at } => {
            warn!(%last_payment_at, "Duplicate warning overridden by collector");
        }
    }

    let token_id =
        token_store::consume(tx, claimed, vehicle.id, &request.collector.name, now).await?;

    let payment = tx
        .insert_payment(&NewPayment {
            vehicle_id: vehicle.id,
            movement_id: movement.id,
            movement_label: movement.name.clone(),
            amount: charge.amount,
            paid_at: now,
            collector_id: request.collector.id,
            receipt_token_id: Some(token_id),
        })
        .await?;

    info!(
        payment_id = payment.id,
        token_id,
        amount = %payment.amount,
        "Payment collected"
    );

    Ok(CollectOutcome::Collected(CollectReceipt {
        payment,
        reference_number: request.reference_number.clone(),
        collector_name: request.collector.name.clone(),
        unit_amount: charge.unit_amount,
        quantity: charge.quantity,
    }))
}

/// Revert a payment and hand its token back.
///
/// `reason` must already be validated as non-blank.
#[instrument(skip(tx, reason))]
pub async fn revert<U: UnitOfWork>(
    tx: &mut U,
    payment_id: i64,
    actor_id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Payment, CollectionError> {
    let mut payment = tx
        .lock_payment(payment_id)
        .await?
        .ok_or(CollectionError::PaymentNotFound(payment_id))?;

    let stamp = PaymentRevert {
        reason: reason.to_string(),
        reverted_at: now,
        reverted_by_id: actor_id,
    };
    if !payment.revert(&stamp) {
        return Err(CollectionError::AlreadyReverted(payment_id));
    }
    tx.save_payment_revert(&payment).await?;

    if let Some(token_id) = payment.receipt_token_id {
        token_store::release(tx, token_id).await?;
    }

    info!(
        payment_id,
        reverted_by_id = actor_id,
        amount = %payment.amount,
        "Payment reverted"
    );

    Ok(payment)
}

/// Price a movement for a vehicle without recording anything.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub vehicle_id: i64,
    pub plate_number: String,
    pub movement_id: i64,
    pub movement_label: String,
    #[serde(flatten)]
    pub charge: Charge,
}

pub async fn quote<U: UnitOfWork>(
    tx: &mut U,
    vehicle: &VehicleRef,
    movement_id: i64,
    quantity: Option<i32>,
) -> Result<Quote, CollectionError> {
    let vehicle = tx
        .find_vehicle(vehicle)
        .await?
        .ok_or_else(|| CollectionError::VehicleNotFound(vehicle.to_string()))?;
    let movement = tx
        .find_movement(movement_id)
        .await?
        .ok_or(CollectionError::MovementNotFound(movement_id))?;
    let unit_amount = tax_rate::resolve(tx, vehicle.car_type_id, movement.id).await?;
    let charge = Charge::new(unit_amount, quantity)?;

    Ok(Quote {
        vehicle_id: vehicle.id,
        plate_number: vehicle.plate_number,
        movement_id: movement.id,
        movement_label: movement.name,
        charge,
    })
}
