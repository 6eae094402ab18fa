//! `bulkdml-core`: domain building blocks for bulk record writes.
//!
//! This crate contains **pure domain** primitives (no IO, no scheduling):
//! records, operation descriptors, identifiers and the error taxonomy shared by
//! the engine and infrastructure crates.

pub mod descriptor;
pub mod error;
pub mod id;
pub mod record;

pub use descriptor::{OperationDescriptor, OperationKind};
pub use error::{BulkError, BulkResult};
pub use id::{RecordId, RetryJobId};
pub use record::{Record, RecordKey, SObject};
