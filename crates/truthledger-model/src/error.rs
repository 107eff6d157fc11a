//! Error taxonomy for the ledger pipeline.
//!
//! Errors are classified by kind, not by origin module: a fetch timeout is a
//! `TransientFetch` whether it came from a feed poll or a direct URL ingest.
//! `Cancelled` is a distinct sentinel and must never be folded into
//! `Internal` — the orchestrator classifies terminal job state from it.

use thiserror::Error;

/// Pipeline-wide error kinds.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A referenced record (source, entity, claim, ...) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input: bad enum value, invalid regex, NaN in a scope, etc.
    #[error("validation error: {0}")]
    Validation(String),

    /// Uniqueness violation or an already-running job.
    #[error("conflict: {0}")]
    Conflict(String),

    /// HTTP fetch failed (timeout, non-2xx). Recorded per URL, never fatal
    /// to a batch.
    #[error("fetch failed: {0}")]
    TransientFetch(String),

    /// The persistent store failed mid-operation; the enclosing job fails.
    #[error("store error: {0}")]
    Store(String),

    /// Cooperative cancellation sentinel.
    #[error("cancelled")]
    Cancelled,

    /// A `running` sync row outlived the reaper threshold.
    #[error("job timed out after {0} hours of running")]
    JobTimeout(u64),

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// True iff this is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LedgerError::Cancelled)
    }

    /// True for failures that should be collected per-item rather than
    /// aborting the enclosing batch.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::TransientFetch(_))
    }
}

/// Convenience alias used throughout the core crates.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_not_transient() {
        assert!(LedgerError::Cancelled.is_cancelled());
        assert!(!LedgerError::Cancelled.is_transient());
        assert!(LedgerError::TransientFetch("timeout".into()).is_transient());
    }

    #[test]
    fn timeout_message_names_hours() {
        let msg = LedgerError::JobTimeout(2).to_string();
        assert_eq!(msg, "job timed out after 2 hours of running");
    }
}
