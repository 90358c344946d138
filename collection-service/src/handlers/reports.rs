//! Read-only pricing and reporting handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use validator::Validate;

use crate::{
    dtos::{QuoteQuery, TotalsQuery},
    error::CollectionError,
    services::{LedgerStore, Quote, Totals},
    startup::AppState,
};

/// Price a movement before collecting it.
pub async fn quote<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<Quote>, CollectionError> {
    query.validate()?;
    let vehicle = query.vehicle().ok_or_else(|| {
        CollectionError::InvalidInput("vehicle_id or plate_number is required".to_string())
    })?;

    Ok(Json(
        state
            .collection
            .quote(vehicle, query.movement_id, query.quantity)
            .await?,
    ))
}

pub async fn totals<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<TotalsQuery>,
) -> Result<Json<Totals>, CollectionError> {
    Ok(Json(state.collection.totals(query.from, query.to).await?))
}
