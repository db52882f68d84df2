//! Import data plane: streaming readers, row validation, in-file duplicate
//! detection, file integrity, and the worker that drives a job attempt
//! through the pipeline.

pub mod cancel;
pub mod dedupe;
pub mod integrity;
pub mod reader;
pub mod validate;
pub mod worker;

pub use cancel::CancellationToken;
pub use dedupe::{DuplicateDetector, PriorDuplicate};
pub use integrity::{compute_fingerprint, verify_fingerprint, IntegrityOutcome};
pub use reader::{open_reader, Header, ReadError, RowItem, RowReader};
pub use validate::{validate_row, FieldError};
pub use worker::{fail_permanently, AttemptOutcome, ImportWorker};
