//! Custodia service shell
//!
//! Ties the pure consent workflows and the access evaluator to a record
//! store. This crate owns everything stateful: configuration, persistence,
//! the multi-step write sequences, and the hash-chained audit trail.
//!
//! The `custodia` binary runs the same operations over a JSON snapshot
//! file holding `{consents, requests, revocations, policies}`.

pub mod audit;
pub mod config;
pub mod error;
pub mod service;
pub mod store;

pub use audit::{verify_entries, verify_entries_from, AuditEntry, AuditEvent, AuditTrail};
pub use config::{AuditConfig, CustodiaConfig, IdConfig, LifecycleConfig, WorkflowConfig};
pub use error::{RootError, RootResult};
pub use service::{AccessService, ApprovedRequest, OrphanedApproval, ReconciliationReport};
pub use store::{InMemoryStore, RecordSet, RecordStore};

use custodia_core::IdGenerator;

/// A service over an in-memory store seeded with `records`, generating ids
/// with the configured strategy.
pub fn service_from_records(
    records: RecordSet,
    config: CustodiaConfig,
) -> AccessService<InMemoryStore> {
    let store = InMemoryStore::from_records(records, IdGenerator::new(config.ids.strategy));
    AccessService::new(store, config)
}
