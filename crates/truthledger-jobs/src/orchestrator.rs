//! The job orchestrator.
//!
//! `run` opens a SyncStatus row (the store rejects a second `running` row per
//! sync type), registers an in-memory handle with a cancellation token, and
//! returns immediately; a spawned worker executes the stage and writes the
//! terminal state. `full_pipeline` chains extract → conflicts → derive →
//! score under one row, reporting the active child via `current_stage`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use truthledger_analysis::{
    run_conflict_detection, run_derivation, run_scoring, DerivationRule, DetectOptions,
    DeriveOptions, ScoreOptions,
};
use truthledger_extract::{run_extraction, ExtractOptions, ExtractorRegistry};
use truthledger_ingest::{FeedFetcher, IngestOptions, Ingestor};
use truthledger_model::{
    CancelToken, LedgerError, LedgerResult, ProgressFn, ProgressUpdate, ScoringPolicy, SyncState,
    SyncStatus,
};
use truthledger_store::{DynStore, Store};

use crate::jobs::JobId;
use crate::HANDLE_GRACE_SECS;

/// Everything the stage runners need, shared by all jobs.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: DynStore,
    pub ingestor: Ingestor,
    pub feed_fetcher: FeedFetcher,
    pub registry: ExtractorRegistry,
    pub rules: Vec<DerivationRule>,
    pub scoring: ScoringPolicy,
}

/// Live job states in the in-memory registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// In-memory handle for a job run. Non-authoritative; SyncStatus rows decide
/// whether a job counts as running.
#[derive(Clone)]
pub struct JobHandle {
    pub run_id: Uuid,
    pub job: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub progress: Option<ProgressUpdate>,
    pub current_stage: Option<JobId>,
    pub records: u64,
    pub error: Option<String>,
    cancel: CancelToken,
}

/// What `run` returns to the caller, immediately.
#[derive(Debug, Clone)]
pub struct RunReceipt {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Per-stage status view merged from the store and the live registry.
#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub job: JobId,
    pub last_run: Option<SyncStatus>,
    pub live_progress: Option<ProgressUpdate>,
    pub current_stage: Option<JobId>,
}

/// Full pipeline status.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub stages: Vec<JobStatusView>,
    pub running: Vec<Uuid>,
    pub healthy: bool,
}

type Registry = Arc<RwLock<HashMap<&'static str, JobHandle>>>;

/// Runs jobs as background tasks, one per sync type.
#[derive(Clone)]
pub struct JobOrchestrator {
    context: Arc<PipelineContext>,
    registry: Registry,
}

impl JobOrchestrator {
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context: Arc::new(context),
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.context.store
    }

    /// Start a job. Rejects with `Conflict` if the job is already running in
    /// memory or in the store. Execution proceeds off the caller's path.
    pub async fn run(&self, job: JobId, triggered_by: &str) -> LedgerResult<RunReceipt> {
        if let Some(handle) = self.registry.read().get(job.sync_type()) {
            if handle.status == JobStatus::Running {
                return Err(LedgerError::Conflict(format!("job already running: {job}")));
            }
        }

        let run_id = Uuid::new_v4();
        let status = self
            .context
            .store
            .begin_sync(
                job.sync_type(),
                json!({"run_id": run_id.to_string(), "triggered_by": triggered_by}),
            )
            .await?;

        let cancel = CancelToken::new();
        let handle = JobHandle {
            run_id,
            job,
            status: JobStatus::Running,
            started_at: status.started_at,
            progress: None,
            current_stage: None,
            records: 0,
            error: None,
            cancel: cancel.clone(),
        };
        self.registry.write().insert(job.sync_type(), handle);

        let orchestrator = self.clone();
        let sync_id = status.id;
        tokio::spawn(async move {
            orchestrator.execute(job, run_id, sync_id, cancel).await;
        });

        info!(%job, %run_id, "job started");
        Ok(RunReceipt {
            run_id,
            started_at: status.started_at,
        })
    }

    /// Cancel a running job: flips the handle, raises the token, and writes
    /// the cancelled terminal state to the store.
    pub async fn cancel(&self, job: JobId) -> LedgerResult<()> {
        let cancel = {
            let mut registry = self.registry.write();
            let handle = registry
                .get_mut(job.sync_type())
                .ok_or_else(|| LedgerError::NotFound(format!("no run registered for {job}")))?;
            if handle.status != JobStatus::Running {
                return Err(LedgerError::Conflict(format!("job {job} is not running")));
            }
            handle.status = JobStatus::Cancelled;
            handle.cancel.clone()
        };
        cancel.cancel();

        // Close the running row for this sync type.
        let running = self.context.store.running_sync_statuses().await?;
        for status in running {
            if status.sync_type == job.sync_type() {
                self.context
                    .store
                    .finish_sync(
                        status.id,
                        SyncState::Cancelled,
                        0,
                        Some("Cancelled by user".to_string()),
                    )
                    .await?;
            }
        }
        warn!(%job, "job cancelled by user");
        Ok(())
    }

    /// Per-stage status, store rows merged with live handles. The pipeline is
    /// healthy iff no stage's most recent run failed.
    pub async fn status(&self) -> LedgerResult<PipelineStatus> {
        let latest = self.context.store.latest_sync_statuses().await?;
        let registry = self.registry.read();

        let mut stages = Vec::with_capacity(JobId::ALL.len());
        for job in JobId::ALL {
            let last_run = latest
                .iter()
                .find(|s| s.sync_type == job.sync_type())
                .cloned();
            let live = registry
                .get(job.sync_type())
                .filter(|h| h.status == JobStatus::Running);
            stages.push(JobStatusView {
                job,
                last_run,
                live_progress: live.and_then(|h| h.progress.clone()),
                current_stage: live.and_then(|h| h.current_stage),
            });
        }

        let running = registry
            .values()
            .filter(|h| h.status == JobStatus::Running)
            .map(|h| h.run_id)
            .collect();
        let healthy = stages.iter().all(|s| {
            s.last_run
                .as_ref()
                .map(|r| r.state != SyncState::Failed)
                .unwrap_or(true)
        });

        Ok(PipelineStatus {
            stages,
            running,
            healthy,
        })
    }

    /// Live handles snapshot (running jobs only).
    pub fn running_jobs(&self) -> Vec<JobHandle> {
        self.registry
            .read()
            .values()
            .filter(|h| h.status == JobStatus::Running)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    async fn execute(&self, job: JobId, run_id: Uuid, sync_id: Uuid, cancel: CancelToken) {
        let progress = self.progress_sink(job);
        let result = self.dispatch(job, &cancel, &progress).await;

        let (status, state, records, message) = match &result {
            Ok(records) => (JobStatus::Completed, SyncState::Success, *records, None),
            Err(LedgerError::Cancelled) => (
                JobStatus::Cancelled,
                SyncState::Cancelled,
                0,
                Some("Cancelled by user".to_string()),
            ),
            Err(e) => (
                JobStatus::Failed,
                SyncState::Failed,
                0,
                Some(e.to_string()),
            ),
        };

        {
            let mut registry = self.registry.write();
            if let Some(handle) = registry.get_mut(job.sync_type()) {
                if handle.run_id == run_id {
                    handle.status = status;
                    handle.records = records;
                    handle.error = message.clone();
                    handle.current_stage = None;
                }
            }
        }

        // Terminal transition is one-shot store-side; a cancel() that raced
        // us already wrote `cancelled` and this becomes a no-op.
        if let Err(e) = self
            .context
            .store
            .finish_sync(sync_id, state, records, message)
            .await
        {
            error!(%job, error = %e, "failed to finalize sync status");
        }

        match &result {
            Ok(records) => info!(%job, records, "job finished"),
            Err(LedgerError::Cancelled) => info!(%job, "job cancelled"),
            Err(e) => error!(%job, error = %e, "job failed"),
        }

        // Drop the handle after a grace period so status readers can still
        // see the terminal state briefly.
        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(HANDLE_GRACE_SECS)).await;
            let mut registry = registry.write();
            if let Some(handle) = registry.get(job.sync_type()) {
                if handle.run_id == run_id && handle.status != JobStatus::Running {
                    registry.remove(job.sync_type());
                }
            }
        });
    }

    fn progress_sink(&self, job: JobId) -> ProgressFn {
        let registry = self.registry.clone();
        Arc::new(move |update: ProgressUpdate| {
            let mut registry = registry.write();
            if let Some(handle) = registry.get_mut(job.sync_type()) {
                handle.progress = Some(update);
            }
        })
    }

    fn set_current_stage(&self, parent: JobId, stage: Option<JobId>) {
        let mut registry = self.registry.write();
        if let Some(handle) = registry.get_mut(parent.sync_type()) {
            handle.current_stage = stage;
        }
    }

    async fn dispatch(
        &self,
        job: JobId,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> LedgerResult<u64> {
        let ctx = &self.context;
        match job {
            JobId::UrlIngest => {
                let mut records = 0u64;
                for source in ctx.store.list_sources().await? {
                    if !source.is_active {
                        continue;
                    }
                    cancel.check()?;
                    let urls = ctx.store.list_source_urls(source.id, true).await?;
                    if urls.is_empty() {
                        continue;
                    }
                    let url_strings: Vec<String> = urls.iter().map(|u| u.url.clone()).collect();
                    let report = ctx
                        .ingestor
                        .ingest(
                            source.id,
                            &url_strings,
                            &IngestOptions {
                                timeout: Some(std::time::Duration::from_secs(45)),
                                ..Default::default()
                            },
                            cancel,
                            progress,
                        )
                        .await?;
                    records += report.documents_created + report.documents_updated;
                    for url in &urls {
                        ctx.store.mark_source_url_fetched(url.id, Utc::now()).await?;
                    }
                }
                Ok(records)
            }
            JobId::FeedIngest => {
                let report = ctx
                    .feed_fetcher
                    .refresh_due_feeds(Utc::now(), cancel, progress)
                    .await?;
                Ok(report.documents_created + report.documents_updated)
            }
            JobId::Extract => {
                let report = run_extraction(
                    &ctx.store,
                    &ctx.registry,
                    &ExtractOptions::default(),
                    cancel,
                    progress,
                )
                .await?;
                Ok(report.evidence_created)
            }
            JobId::Conflicts => {
                let report = run_conflict_detection(
                    &ctx.store,
                    &DetectOptions::default(),
                    cancel,
                    progress,
                )
                .await?;
                Ok(report.groups_checked)
            }
            JobId::Derive => {
                let report = run_derivation(
                    &ctx.store,
                    &ctx.rules,
                    &DeriveOptions::default(),
                    cancel,
                    progress,
                )
                .await?;
                Ok(report.claims_derived + report.links_created + report.links_updated)
            }
            JobId::Score => {
                let report = run_scoring(
                    &ctx.store,
                    &ctx.scoring,
                    &ScoreOptions::default(),
                    cancel,
                    progress,
                )
                .await?;
                Ok(report.claims_scored)
            }
            JobId::FullPipeline => {
                // Children share the parent's cancellation signal; any child
                // failure aborts the pipeline.
                let mut records = 0u64;
                for stage in JobId::PIPELINE_STAGES {
                    cancel.check()?;
                    self.set_current_stage(JobId::FullPipeline, Some(stage));
                    let child_cancel = cancel.child();
                    records += Box::pin(self.dispatch(stage, &child_cancel, progress)).await?;
                }
                self.set_current_stage(JobId::FullPipeline, None);
                Ok(records)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthledger_analysis::default_rules;
    use truthledger_ingest::PageFetcher;
    use truthledger_store::MemoryStore;

    fn test_orchestrator() -> JobOrchestrator {
        let store: DynStore = Arc::new(MemoryStore::new());
        let fetcher = PageFetcher::new().unwrap();
        let ingestor = Ingestor::new(store.clone(), fetcher.clone());
        let feed_fetcher = FeedFetcher::new(store.clone(), ingestor.clone(), fetcher);
        JobOrchestrator::new(PipelineContext {
            store,
            ingestor,
            feed_fetcher,
            registry: ExtractorRegistry::canonical(),
            rules: default_rules(),
            scoring: ScoringPolicy::default(),
        })
    }

    async fn wait_terminal(orchestrator: &JobOrchestrator, job: JobId) -> SyncStatus {
        for _ in 0..200 {
            let latest = orchestrator.store().latest_sync_statuses().await.unwrap();
            if let Some(row) = latest
                .iter()
                .find(|s| s.sync_type == job.sync_type() && s.state.is_terminal())
            {
                return row.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {job} did not reach a terminal state");
    }

    #[tokio::test]
    async fn extract_job_runs_to_success_on_empty_store() {
        let orchestrator = test_orchestrator();
        let receipt = orchestrator.run(JobId::Extract, "test").await.unwrap();
        assert!(receipt.started_at <= Utc::now());

        let row = wait_terminal(&orchestrator, JobId::Extract).await;
        assert_eq!(row.state, SyncState::Success);
        assert_eq!(row.metadata["triggered_by"], "test");
        assert_eq!(row.metadata["run_id"], receipt.run_id.to_string());
    }

    #[tokio::test]
    async fn duplicate_run_is_rejected_by_store_row() {
        let orchestrator = test_orchestrator();
        // Open a running row directly, as a crashed worker would leave it.
        orchestrator
            .store()
            .begin_sync(JobId::Score.sync_type(), serde_json::Value::Null)
            .await
            .unwrap();
        let err = orchestrator.run(JobId::Score, "test").await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn full_pipeline_runs_all_stages() {
        let orchestrator = test_orchestrator();
        orchestrator
            .run(JobId::FullPipeline, "test")
            .await
            .unwrap();
        let row = wait_terminal(&orchestrator, JobId::FullPipeline).await;
        assert_eq!(row.state, SyncState::Success);

        // Children run inline: no child rows are opened.
        let latest = orchestrator.store().latest_sync_statuses().await.unwrap();
        assert_eq!(latest.len(), 1);
    }

    #[tokio::test]
    async fn cancel_requires_running_job() {
        let orchestrator = test_orchestrator();
        assert!(matches!(
            orchestrator.cancel(JobId::Extract).await.unwrap_err(),
            LedgerError::NotFound(_)
        ));

        orchestrator.run(JobId::Extract, "test").await.unwrap();
        wait_terminal(&orchestrator, JobId::Extract).await;
        // Terminal handle: cancel now conflicts (if the handle is still in
        // its grace window) or reports not-found after cleanup.
        let err = orchestrator.cancel(JobId::Extract).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Conflict(_) | LedgerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn status_reports_health_and_stages() {
        let orchestrator = test_orchestrator();
        let status = orchestrator.status().await.unwrap();
        assert!(status.healthy);
        assert_eq!(status.stages.len(), JobId::ALL.len());
        assert!(status.running.is_empty());

        orchestrator.run(JobId::Extract, "test").await.unwrap();
        wait_terminal(&orchestrator, JobId::Extract).await;
        let status = orchestrator.status().await.unwrap();
        assert!(status.healthy);
        let extract = status
            .stages
            .iter()
            .find(|s| s.job == JobId::Extract)
            .unwrap();
        assert!(extract.last_run.is_some());
    }
}
