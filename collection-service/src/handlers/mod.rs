//! HTTP handlers for collection-service.

pub mod payments;
pub mod references;
pub mod reports;
