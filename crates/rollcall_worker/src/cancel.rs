//! Cooperative cancellation for import attempts.
//!
//! Cancellation is only observed between chunks; a running chunk always
//! finishes or aborts as a unit. The token also carries the attempt deadline
//! so the timeout is observed at the same points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancel flag plus an optional hard deadline.
///
/// Clone is cheap; clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that additionally trips once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled explicitly or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// True only for the deadline case, for error wording.
    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(!clone.deadline_exceeded());
    }

    #[test]
    fn deadline_trips_the_token() {
        let token = CancellationToken::with_timeout(Duration::from_secs(0));
        assert!(token.is_cancelled());
        assert!(token.deadline_exceeded());

        let generous = CancellationToken::with_timeout(Duration::from_secs(3_600));
        assert!(!generous.is_cancelled());
    }
}
