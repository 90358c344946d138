//! Receipt reference handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    dtos::{CancelTokenRequest, RegisterReferenceRequest},
    error::CollectionError,
    middleware::CollectorContext,
    models::ReceiptToken,
    services::{LedgerStore, ReferenceStatus},
    startup::AppState,
};

pub async fn register_reference<S: LedgerStore>(
    State(state): State<AppState<S>>,
    CollectorContext(actor): CollectorContext,
    Json(payload): Json<RegisterReferenceRequest>,
) -> Result<(StatusCode, Json<ReceiptToken>), CollectionError> {
    payload.validate()?;

    tracing::info!(
        reference = %payload.reference_number,
        actor_id = actor.id,
        "Registering receipt reference"
    );

    let token = state
        .collection
        .register_reference(&payload.reference_number)
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// Availability of a reference. Unknown references answer `exists: false`.
pub async fn lookup_reference<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(reference): Path<String>,
) -> Result<Json<ReferenceStatus>, CollectionError> {
    Ok(Json(state.collection.lookup_reference(&reference).await?))
}

/// Cancel an unused token.
///
/// The body is optional. An empty body cancels without a reason; a body that
/// is present must be a valid `CancelTokenRequest`.
pub async fn cancel_token<S: LedgerStore>(
    State(state): State<AppState<S>>,
    CollectorContext(actor): CollectorContext,
    Path(token_id): Path<i64>,
    body: Bytes,
) -> Result<Json<ReceiptToken>, CollectionError> {
    let payload = parse_cancel_body(&body)?;
    payload.validate()?;

    let token = state
        .collection
        .cancel_token(token_id, payload.reason, &actor)
        .await?;
    Ok(Json(token))
}

fn parse_cancel_body(body: &[u8]) -> Result<CancelTokenRequest, CollectionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CancelTokenRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| CollectionError::InvalidInput(format!("Malformed cancel request: {}", e)))
}
