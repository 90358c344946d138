//! Payment handlers: collect, revert and payment listings.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use validator::Validate;

use crate::{
    dtos::{
        CollectPaymentRequest, CollectPaymentResponse, DuplicateWarningResponse,
        PaymentListResponse, RevertPaymentRequest, RevertPaymentResponse,
    },
    error::CollectionError,
    middleware::CollectorContext,
    models::{Payment, VehicleRef},
    services::{CollectOutcome, CollectRequest, LedgerStore, VehiclePayments},
    startup::AppState,
};

/// Collect a tax payment.
///
/// 201 with the receipt on success, 409 with `needs_force` when the
/// duplicate guard asks for confirmation.
pub async fn collect_payment<S: LedgerStore>(
    State(state): State<AppState<S>>,
    CollectorContext(collector): CollectorContext,
    Json(payload): Json<CollectPaymentRequest>,
) -> Result<Response, CollectionError> {
    payload.validate()?;
    let vehicle = payload.vehicle().ok_or_else(|| {
        CollectionError::InvalidInput("vehicle_id or plate_number is required".to_string())
    })?;

    tracing::info!(
        vehicle = %vehicle,
        movement_id = payload.movement_id,
        reference = %payload.reference_number,
        collector_id = collector.id,
        force = payload.force,
        "Collecting payment"
    );

    let request = CollectRequest {
        vehicle,
        movement_id: payload.movement_id,
        quantity: payload.quantity,
        reference_number: payload.reference_number,
        collector,
        force: payload.force,
    };

    match state.collection.collect(request).await? {
        CollectOutcome::Collected(receipt) => Ok((
            StatusCode::CREATED,
            Json(CollectPaymentResponse::from(receipt)),
        )
            .into_response()),
        CollectOutcome::NeedsConfirmation(notice) => Ok((
            StatusCode::CONFLICT,
            Json(DuplicateWarningResponse::from(notice)),
        )
            .into_response()),
    }
}

/// Revert a payment and release its receipt token.
pub async fn revert_payment<S: LedgerStore>(
    State(state): State<AppState<S>>,
    CollectorContext(actor): CollectorContext,
    Path(payment_id): Path<i64>,
    Json(payload): Json<RevertPaymentRequest>,
) -> Result<Json<RevertPaymentResponse>, CollectionError> {
    payload.validate()?;

    tracing::info!(payment_id, actor_id = actor.id, "Reverting payment");

    let payment = state
        .collection
        .revert(payment_id, &actor, &payload.reason)
        .await?;

    Ok(Json(RevertPaymentResponse::from(payment)))
}

pub async fn get_payment<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(payment_id): Path<i64>,
) -> Result<Json<Payment>, CollectionError> {
    Ok(Json(state.collection.get_payment(payment_id).await?))
}

/// Payment history of a vehicle, addressed by numeric id or plate number.
pub async fn vehicle_payments<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(vehicle): Path<String>,
) -> Result<Json<VehiclePayments>, CollectionError> {
    let vehicle = match vehicle.trim().parse::<i64>() {
        Ok(id) => VehicleRef::Id(id),
        Err(_) => VehicleRef::plate(&vehicle),
    };
    Ok(Json(state.collection.vehicle_payments(vehicle).await?))
}

pub async fn collector_payments<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(collector_id): Path<i64>,
) -> Result<Json<PaymentListResponse>, CollectionError> {
    let payments = state.collection.collector_payments(collector_id).await?;
    Ok(Json(PaymentListResponse::from(payments)))
}
