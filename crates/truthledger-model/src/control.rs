//! Cancellation tokens and progress sinks.
//!
//! Both are passed into stage runners as plain values. Every loop checks the
//! token at the top of its body and before store I/O; a raised token turns
//! into the `Cancelled` error kind at the next check, never mid-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};

/// Cooperative cancellation signal. Cloning shares the signal; `child` links
/// a new signal to its parent so raising either cancels the child.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flags: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// A token that observes this token's signal plus its own. Used by
    /// pipeline children: the parent's cancel reaches them, theirs does not
    /// reach the parent.
    pub fn child(&self) -> Self {
        let mut flags = vec![Arc::new(AtomicBool::new(false))];
        flags.extend(self.flags.iter().cloned());
        Self { flags }
    }

    /// Raise the signal. Only this token's own flag is set; parents are
    /// unaffected.
    pub fn cancel(&self) {
        if let Some(own) = self.flags.first() {
            own.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// Error out with the cancellation sentinel if raised.
    pub fn check(&self) -> LedgerResult<()> {
        if self.is_cancelled() {
            Err(LedgerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One progress report from a stage runner.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

/// Progress sink shared across stage runners.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// A sink that drops every update. Handy default for CLI one-shots and tests.
pub fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Report progress through a sink.
pub fn report_progress(sink: &ProgressFn, current: u64, total: u64, message: impl Into<String>) {
    sink(ProgressUpdate {
        current,
        total,
        message: message.into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed_by_clones_and_children() {
        let token = CancelToken::new();
        let clone = token.clone();
        let child = token.child();
        assert!(token.check().is_ok());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(LedgerError::Cancelled)));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn progress_sink_receives_updates() {
        use std::sync::Mutex;
        let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressFn = {
            let seen = seen.clone();
            Arc::new(move |u| seen.lock().unwrap().push(u))
        };
        report_progress(&sink, 10, 100, "working");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].current, 10);
        assert_eq!(seen[0].message, "working");
    }
}
