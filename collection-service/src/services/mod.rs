//! Services module for collection-service.

pub mod collection;
pub mod database;
pub mod duplicate_guard;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod tax_rate;
pub mod token_store;

pub use collection::{Clock, CollectionService, SystemClock, Totals, VehiclePayments};
pub use database::{Database, PgUnitOfWork};
pub use duplicate_guard::{Decision, DuplicatePolicy, GuardMode};
pub use ledger::{CollectOutcome, CollectReceipt, CollectRequest, Collector, DuplicateNotice, Quote};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{unit_of_work, LedgerStore, UnitOfWork};
pub use token_store::ReferenceStatus;
