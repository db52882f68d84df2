//! Control plane for Rollcall imports: file intake, size-class queues,
//! retry policy and the worker pool.

pub mod dispatcher;
pub mod intake;

pub use dispatcher::{Dispatcher, RetryDecision};
pub use intake::{enqueue_file, IntakeError};
