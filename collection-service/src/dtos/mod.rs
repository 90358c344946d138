//! Request and response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{CollectorPayment, Payment, VehicleRef};
use crate::services::{CollectReceipt, DuplicateNotice};

#[derive(Debug, Deserialize, Validate)]
pub struct CollectPaymentRequest {
    pub vehicle_id: Option<i64>,
    pub plate_number: Option<String>,

    #[validate(range(min = 1, message = "Movement id must be positive"))]
    pub movement_id: i64,

    /// Values below one are charged as one.
    #[validate(range(max = 10000, message = "Quantity must be at most 10000"))]
    pub quantity: Option<i32>,

    #[validate(length(min = 1, max = 64, message = "Reference number is required"))]
    pub reference_number: String,

    /// Confirm a collection the duplicate guard warned about.
    #[serde(default)]
    pub force: bool,
}

impl CollectPaymentRequest {
    pub fn vehicle(&self) -> Option<VehicleRef> {
        VehicleRef::from_parts(self.vehicle_id, self.plate_number.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct CollectPaymentResponse {
    pub status: &'static str,
    pub payment_id: i64,
    pub vehicle_id: i64,
    pub movement: String,
    pub unit_amount: Decimal,
    pub quantity: i32,
    pub amount: Decimal,
    pub reference_number: String,
    pub collector: String,
    pub paid_at: DateTime<Utc>,
}

impl From<CollectReceipt> for CollectPaymentResponse {
    fn from(receipt: CollectReceipt) -> Self {
        Self {
            status: "success",
            payment_id: receipt.payment.id,
            vehicle_id: receipt.payment.vehicle_id,
            movement: receipt.payment.movement_label,
            unit_amount: receipt.unit_amount,
            quantity: receipt.quantity,
            amount: receipt.payment.amount,
            reference_number: receipt.reference_number,
            collector: receipt.collector_name,
            paid_at: receipt.payment.paid_at,
        }
    }
}

/// Body of the 409 returned when a collection needs `force` to proceed.
#[derive(Debug, Serialize)]
pub struct DuplicateWarningResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
    pub needs_force: bool,
    pub vehicle_id: i64,
    pub movement_id: i64,
    pub amount: Decimal,
    pub last_payment_at: DateTime<Utc>,
}

impl From<DuplicateNotice> for DuplicateWarningResponse {
    fn from(notice: DuplicateNotice) -> Self {
        Self {
            status: "warning",
            code: "DUPLICATE_WARNING",
            message: format!(
                "The same tax was already collected for this vehicle at {}. Resend with force to collect again.",
                notice.last_payment_at
            ),
            needs_force: true,
            vehicle_id: notice.vehicle_id,
            movement_id: notice.movement_id,
            amount: notice.amount,
            last_payment_at: notice.last_payment_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevertPaymentRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RevertPaymentResponse {
    pub status: &'static str,
    pub payment_id: i64,
    pub reverted_at: Option<DateTime<Utc>>,
    pub reverted_by_id: Option<i64>,
    pub reason: Option<String>,
}

impl From<Payment> for RevertPaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            status: "success",
            payment_id: payment.id,
            reverted_at: payment.reverted_at,
            reverted_by_id: payment.reverted_by_id,
            reason: payment.revert_reason,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelTokenRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterReferenceRequest {
    #[validate(length(min = 1, max = 64, message = "Reference number is required"))]
    pub reference_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuoteQuery {
    pub vehicle_id: Option<i64>,
    pub plate_number: Option<String>,
    #[validate(range(min = 1, message = "Movement id must be positive"))]
    pub movement_id: i64,
    #[validate(range(max = 10000, message = "Quantity must be at most 10000"))]
    pub quantity: Option<i32>,
}

impl QuoteQuery {
    pub fn vehicle(&self) -> Option<VehicleRef> {
        VehicleRef::from_parts(self.vehicle_id, self.plate_number.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct TotalsQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub count: usize,
    pub payments: Vec<CollectorPayment>,
}

impl From<Vec<CollectorPayment>> for PaymentListResponse {
    fn from(payments: Vec<CollectorPayment>) -> Self {
        Self {
            count: payments.len(),
            payments,
        }
    }
}
