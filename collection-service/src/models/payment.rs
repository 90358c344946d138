//! Payment model.
//!
//! Payments are append-only. A reversal flips `is_reverted` and stamps the
//! audit columns; amount, movement and vehicle are never edited.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Payment row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub vehicle_id: i64,
    pub movement_id: i64,
    /// Movement name as it read at collection time.
    pub movement_label: String,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub collector_id: i64,
    pub receipt_token_id: Option<i64>,
    pub is_reverted: bool,
    pub revert_reason: Option<String>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub reverted_by_id: Option<i64>,
}

impl Payment {
    /// Mark the payment reverted. Returns `false` if it already was.
    pub fn revert(&mut self, revert: &PaymentRevert) -> bool {
        if self.is_reverted {
            return false;
        }
        self.is_reverted = true;
        self.revert_reason = Some(revert.reason.clone());
        self.reverted_at = Some(revert.reverted_at);
        self.reverted_by_id = Some(revert.reverted_by_id);
        true
    }

    pub fn as_prior(&self) -> PriorPayment {
        PriorPayment {
            payment_id: self.id,
            movement_id: self.movement_id,
            amount: self.amount,
            paid_at: self.paid_at,
            is_reverted: self.is_reverted,
        }
    }
}

/// A payment as listed for its collector: the vehicle and receipt it was
/// taken against, joined in.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CollectorPayment {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub payment: Payment,
    pub plate_number: String,
    pub owner_name: String,
    pub reference_number: Option<String>,
    /// Display name the receipt token was consumed under.
    pub collector_name: Option<String>,
}

/// Input for persisting a new payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub vehicle_id: i64,
    pub movement_id: i64,
    pub movement_label: String,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub collector_id: i64,
    pub receipt_token_id: Option<i64>,
}

/// Audit stamp applied by a reversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRevert {
    pub reason: String,
    pub reverted_at: DateTime<Utc>,
    pub reverted_by_id: i64,
}

/// Slice of payment history the duplicate guard looks at.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PriorPayment {
    pub payment_id: i64,
    pub movement_id: i64,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub is_reverted: bool,
}
