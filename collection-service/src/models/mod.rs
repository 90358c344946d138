//! Domain models for collection-service.

mod master;
mod payment;
mod token;

pub use master::{Movement, TaxRate, Vehicle, VehicleRef};
pub use payment::{CollectorPayment, NewPayment, Payment, PaymentRevert, PriorPayment};
pub use token::{ReceiptToken, TokenStateError, TokenStatus, UnknownTokenStatus};
