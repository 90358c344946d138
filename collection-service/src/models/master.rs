//! Read-only master data owned by the administration layer.
//!
//! The collection core never writes these rows; it only resolves them while
//! pricing and recording a payment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Registered vehicle.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub plate_number: String,
    pub owner_name: String,
    pub car_type_id: i64,
}

/// Taxable movement (transit, stationed, ...).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Movement {
    pub id: i64,
    pub name: String,
}

/// Unit amount charged for one movement of one car type.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaxRate {
    pub car_type_id: i64,
    pub movement_id: i64,
    pub amount: Decimal,
}

/// How a caller identifies the vehicle being charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleRef {
    Id(i64),
    Plate(String),
}

impl VehicleRef {
    /// Plate lookups are case-insensitive and ignore surrounding whitespace.
    pub fn plate(raw: &str) -> Self {
        Self::Plate(raw.trim().to_uppercase())
    }

    /// Build a reference from the optional id/plate pair of a request.
    /// The id wins when both are present.
    pub fn from_parts(id: Option<i64>, plate: Option<&str>) -> Option<Self> {
        match (id, plate) {
            (Some(id), _) => Some(Self::Id(id)),
            (None, Some(p)) if !p.trim().is_empty() => Some(Self::plate(p)),
            _ => None,
        }
    }

    pub fn matches(&self, vehicle: &Vehicle) -> bool {
        match self {
            Self::Id(id) => vehicle.id == *id,
            Self::Plate(plate) => vehicle.plate_number.trim().to_uppercase() == *plate,
        }
    }
}

impl std::fmt::Display for VehicleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{}", id),
            Self::Plate(plate) => write!(f, "{}", plate),
        }
    }
}
