//! Reference token store.
//!
//! All transitions run against a token row locked inside the caller's unit
//! of work, so the read of the current status and the write of the new one
//! cannot interleave with another request on the same reference.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::CollectionError;
use crate::models::{ReceiptToken, TokenStatus};
use crate::services::metrics::TOKEN_TRANSITIONS_TOTAL;
use crate::services::store::UnitOfWork;

/// An available token whose row is locked by the current unit of work.
#[derive(Debug)]
pub struct ClaimedToken(ReceiptToken);

impl ClaimedToken {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

/// First half of the check-and-set: lock the token row behind
/// `reference_number` and verify it can be consumed.
///
/// The lock is held until the unit of work ends, so nothing can change the
/// token between this check and [`consume`].
#[instrument(skip(tx))]
pub async fn claim<U: UnitOfWork>(
    tx: &mut U,
    reference_number: &str,
) -> Result<ClaimedToken, CollectionError> {
    let token = tx
        .lock_token_by_reference(reference_number)
        .await?
        .ok_or_else(|| CollectionError::ReferenceInvalid(reference_number.to_string()))?;

    match token.status {
        TokenStatus::Available => Ok(ClaimedToken(token)),
        TokenStatus::Used => Err(CollectionError::ReferenceUsed(reference_number.to_string())),
        TokenStatus::Cancelled => Err(CollectionError::ReferenceCancelled(
            reference_number.to_string(),
        )),
    }
}

/// Second half of the check-and-set: mark the claimed token used and bind
/// it to `vehicle_id`.
#[instrument(skip(tx, claimed, collector, at), fields(token_id = claimed.id()))]
pub async fn consume<U: UnitOfWork>(
    tx: &mut U,
    claimed: ClaimedToken,
    vehicle_id: i64,
    collector: &str,
    at: DateTime<Utc>,
) -> Result<i64, CollectionError> {
    let ClaimedToken(mut token) = claimed;
    token
        .consume(vehicle_id, collector, at)
        .map_err(|e| CollectionError::from_consume(&token.reference_number, e))?;

    tx.save_token(&token).await?;
    TOKEN_TRANSITIONS_TOTAL.with_label_values(&["consume"]).inc();

    Ok(token.id)
}

/// Return a used token to the pool after its payment was reverted.
///
/// A cancelled token stays cancelled. A token that is somehow already
/// available is left as is.
#[instrument(skip(tx))]
pub async fn release<U: UnitOfWork>(tx: &mut U, token_id: i64) -> Result<(), CollectionError> {
    let Some(mut token) = tx.lock_token(token_id).await? else {
        warn!(token_id, "Token linked to reverted payment no longer exists");
        return Ok(());
    };

    match token.release() {
        Ok(true) => {
            tx.save_token(&token).await?;
            TOKEN_TRANSITIONS_TOTAL.with_label_values(&["release"]).inc();
            info!(token_id, reference = %token.reference_number, "Receipt token released");
        }
        Ok(false) => {
            info!(
                token_id,
                reference = %token.reference_number,
                "Receipt token was cancelled, not released"
            );
        }
        Err(e) => {
            warn!(token_id, error = %e, "Receipt token not released");
        }
    }

    Ok(())
}

/// Cancel an available token. Used tokens cannot be cancelled.
#[instrument(skip(tx, reason))]
pub async fn cancel<U: UnitOfWork>(
    tx: &mut U,
    token_id: i64,
    reason: Option<&str>,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<ReceiptToken, CollectionError> {
    let mut token = tx
        .lock_token(token_id)
        .await?
        .ok_or(CollectionError::TokenNotFound(token_id))?;

    token
        .cancel(reason, actor, at)
        .map_err(|e| CollectionError::from_cancel(token_id, e))?;

    tx.save_token(&token).await?;
    TOKEN_TRANSITIONS_TOTAL.with_label_values(&["cancel"]).inc();
    info!(token_id, reference = %token.reference_number, actor, "Receipt token cancelled");

    Ok(token)
}

/// Register one token by hand.
#[instrument(skip(tx))]
pub async fn register<U: UnitOfWork>(
    tx: &mut U,
    reference_number: &str,
) -> Result<ReceiptToken, CollectionError> {
    let reference = reference_number.trim();
    if reference.is_empty() {
        return Err(CollectionError::InvalidInput(
            "Reference number is required".to_string(),
        ));
    }

    let token = tx
        .insert_token(reference)
        .await?
        .ok_or_else(|| CollectionError::ReferenceExists(reference.to_string()))?;

    info!(token_id = token.id, reference = %token.reference_number, "Receipt token registered");
    Ok(token)
}

/// Availability view of a reference number.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceStatus {
    pub reference_number: String,
    pub exists: bool,
    pub token_id: Option<i64>,
    pub status: Option<TokenStatus>,
    pub is_used: bool,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
}

impl ReferenceStatus {
    fn unknown(reference_number: &str) -> Self {
        Self {
            reference_number: reference_number.to_string(),
            exists: false,
            token_id: None,
            status: None,
            is_used: false,
            used_by: None,
            used_at: None,
            vehicle_id: None,
        }
    }
}

impl From<ReceiptToken> for ReferenceStatus {
    fn from(token: ReceiptToken) -> Self {
        Self {
            is_used: token.status == TokenStatus::Used,
            exists: true,
            token_id: Some(token.id),
            status: Some(token.status),
            reference_number: token.reference_number,
            used_by: token.used_by,
            used_at: token.used_at,
            vehicle_id: token.vehicle_id,
        }
    }
}

/// Look a reference up without locking it. Unknown references are reported,
/// not failed.
pub async fn lookup<U: UnitOfWork>(
    tx: &mut U,
    reference_number: &str,
) -> Result<ReferenceStatus, CollectionError> {
    let reference = reference_number.trim();
    Ok(tx
        .find_token_by_reference(reference)
        .await?
        .map(ReferenceStatus::from)
        .unwrap_or_else(|| ReferenceStatus::unknown(reference)))
}
