//! Shared domain types for the Rollcall employee import engine.
//!
//! Everything the control plane (dispatcher), data plane (import worker) and
//! operator surfaces agree on lives here: job identifiers and statuses, the
//! normalized employee record, the row error taxonomy, file fingerprints,
//! queue classes, engine configuration and the HTTP API contracts.

pub mod config;
pub mod defaults;
pub mod http_types;
pub mod types;

pub use config::EngineConfig;
pub use types::{
    CountryCode, Currency, DuplicateKey, EmployeeRecord, ErrorCategory, ErrorType,
    FileFingerprint, JobId, JobIdError, JobStatus, LedgerStatus, QueueClass, RawRow,
    ResumptionEventType,
};
