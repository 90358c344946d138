//! Receipt token model and its lifecycle.
//!
//! A token is a pre-printed receipt number. It starts `available`, becomes
//! `used` when a payment consumes it, can go back to `available` when that
//! payment is reverted, and can be `cancelled` only while available.
//! `cancelled` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Available,
    Used,
    Cancelled,
}

impl TokenStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown token status '{0}'")]
pub struct UnknownTokenStatus(pub String);

impl TryFrom<String> for TokenStatus {
    type Error = UnknownTokenStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "available" => Ok(Self::Available),
            "used" => Ok(Self::Used),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownTokenStatus(value)),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TokenStateError {
    #[error("Receipt token has already been used")]
    AlreadyUsed,
    #[error("Receipt token has been cancelled")]
    Cancelled,
    #[error("Receipt token has already been cancelled")]
    AlreadyCancelled,
    #[error("Receipt token is not in use")]
    NotInUse,
}

/// Receipt token row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReceiptToken {
    pub id: i64,
    pub reference_number: String,
    #[sqlx(try_from = "String")]
    pub status: TokenStatus,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub cancelled_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ReceiptToken {
    /// A freshly registered token.
    pub fn available(id: i64, reference_number: impl Into<String>) -> Self {
        Self {
            id,
            reference_number: reference_number.into(),
            status: TokenStatus::Available,
            used_by: None,
            used_at: None,
            vehicle_id: None,
            cancelled_reason: None,
            cancelled_by: None,
            cancelled_at: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == TokenStatus::Available
    }

    /// Bind the token to a vehicle. Only an available token can be consumed.
    pub fn consume(
        &mut self,
        vehicle_id: i64,
        used_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TokenStateError> {
        match self.status {
            TokenStatus::Available => {
                self.status = TokenStatus::Used;
                self.vehicle_id = Some(vehicle_id);
                self.used_by = Some(used_by.to_string());
                self.used_at = Some(at);
                Ok(())
            }
            TokenStatus::Used => Err(TokenStateError::AlreadyUsed),
            TokenStatus::Cancelled => Err(TokenStateError::Cancelled),
        }
    }

    /// Return a used token to the pool.
    ///
    /// Returns `Ok(false)` without touching the row when the token was
    /// cancelled in the meantime: cancellation outranks release.
    pub fn release(&mut self) -> Result<bool, TokenStateError> {
        match self.status {
            TokenStatus::Used => {
                self.status = TokenStatus::Available;
                self.vehicle_id = None;
                self.used_by = None;
                self.used_at = None;
                Ok(true)
            }
            TokenStatus::Cancelled => Ok(false),
            TokenStatus::Available => Err(TokenStateError::NotInUse),
        }
    }

    pub fn cancel(
        &mut self,
        reason: Option<&str>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TokenStateError> {
        match self.status {
            TokenStatus::Available => {
                self.status = TokenStatus::Cancelled;
                self.cancelled_reason = reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string);
                self.cancelled_by = Some(actor.to_string());
                self.cancelled_at = Some(at);
                Ok(())
            }
            TokenStatus::Used => Err(TokenStateError::AlreadyUsed),
            TokenStatus::Cancelled => Err(TokenStateError::AlreadyCancelled),
        }
    }
}
