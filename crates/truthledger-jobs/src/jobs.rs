//! The fixed job set and its sync-type naming.
//!
//! One canonical name per job, used both as the job id and as the SyncStatus
//! `sync_type` key. No legacy aliases.

use serde::{Deserialize, Serialize};

use truthledger_model::{LedgerError, LedgerResult};

/// Every runnable pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobId {
    UrlIngest,
    FeedIngest,
    Extract,
    Conflicts,
    Derive,
    Score,
    FullPipeline,
}

impl JobId {
    pub const ALL: [JobId; 7] = [
        JobId::UrlIngest,
        JobId::FeedIngest,
        JobId::Extract,
        JobId::Conflicts,
        JobId::Derive,
        JobId::Score,
        JobId::FullPipeline,
    ];

    /// Stages `full_pipeline` composes, in order.
    pub const PIPELINE_STAGES: [JobId; 4] =
        [JobId::Extract, JobId::Conflicts, JobId::Derive, JobId::Score];

    /// The stable sync-type string keying SyncStatus rows.
    pub const fn sync_type(self) -> &'static str {
        match self {
            JobId::UrlIngest => "url_ingest",
            JobId::FeedIngest => "feed_ingest",
            JobId::Extract => "extract",
            JobId::Conflicts => "conflicts",
            JobId::Derive => "derive",
            JobId::Score => "score",
            JobId::FullPipeline => "full_pipeline",
        }
    }

    pub fn parse(raw: &str) -> LedgerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|j| j.sync_type() == raw)
            .ok_or_else(|| LedgerError::Validation(format!("unknown job id: {raw}")))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sync_type())
    }
}
