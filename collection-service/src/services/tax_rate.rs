//! Tax rate resolution: (car type, movement) -> unit amount.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::CollectionError;
use crate::services::store::UnitOfWork;

/// Quantities at or below zero are charged as one unit.
pub fn normalize_quantity(quantity: Option<i32>) -> i32 {
    match quantity {
        Some(q) if q >= 1 => q,
        _ => 1,
    }
}

/// Largest amount a payment row can hold (`NUMERIC(14, 2)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// A priced movement.
#[derive(Debug, Clone, Serialize)]
pub struct Charge {
    pub unit_amount: Decimal,
    pub quantity: i32,
    pub amount: Decimal,
}

impl Charge {
    /// Price `quantity` units. Fails when the total cannot be recorded.
    pub fn new(unit_amount: Decimal, quantity: Option<i32>) -> Result<Self, CollectionError> {
        let quantity = normalize_quantity(quantity);
        let amount = unit_amount
            .checked_mul(Decimal::from(quantity))
            .filter(|amount| *amount <= MAX_AMOUNT)
            .ok_or_else(|| {
                CollectionError::InvalidInput(format!(
                    "Amount for {} x {} exceeds the largest recordable payment",
                    quantity, unit_amount
                ))
            })?;

        Ok(Self {
            unit_amount,
            quantity,
            amount,
        })
    }
}

/// Look up the configured unit amount for a car type and movement.
pub async fn resolve<U: UnitOfWork>(
    tx: &mut U,
    car_type_id: i64,
    movement_id: i64,
) -> Result<Decimal, CollectionError> {
    let rate = tx
        .find_tax_rate(car_type_id, movement_id)
        .await?
        .ok_or(CollectionError::TaxNotConfigured {
            car_type_id,
            movement_id,
        })?;

    if rate.amount < Decimal::ZERO {
        tracing::warn!(
            car_type_id,
            movement_id,
            amount = %rate.amount,
            "Negative tax rate configured"
        );
        return Err(CollectionError::TaxNotConfigured {
            car_type_id,
            movement_id,
        });
    }

    Ok(rate.amount)
}
