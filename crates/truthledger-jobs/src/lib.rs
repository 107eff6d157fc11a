//! Job orchestration.
//!
//! A fixed set of pipeline jobs runs as background tokio tasks, one per sync
//! type at a time. The store's SyncStatus rows are the source of truth for
//! "is this running"; the in-memory registry only adds live progress and the
//! cancellation handle. A periodic reaper times out rows whose worker died
//! without reaching a terminal state.

pub mod jobs;
pub mod orchestrator;
pub mod reaper;

pub use jobs::*;
pub use orchestrator::*;
pub use reaper::*;

/// Hours a `running` row may age before the reaper calls it dead.
pub const DEFAULT_JOB_TIMEOUT_HOURS: u64 = 2;

/// Reaper period.
pub const REAPER_INTERVAL_MINS: u64 = 30;

/// How long a terminal in-memory handle lingers for status readers.
pub const HANDLE_GRACE_SECS: u64 = 60;
