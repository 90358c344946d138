pub mod collector;

pub use collector::CollectorContext;
