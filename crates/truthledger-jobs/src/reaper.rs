//! Stuck-job reaping.
//!
//! A worker that dies between `begin_sync` and its terminal write leaves a
//! `running` row behind forever. The reaper transitions rows older than the
//! timeout to `timeout`, on startup and every 30 minutes; an admin call can
//! trigger it on demand.

use std::sync::Arc;
use tracing::{info, warn};

use truthledger_model::LedgerResult;
use truthledger_store::{DynStore, Store};

use crate::{DEFAULT_JOB_TIMEOUT_HOURS, REAPER_INTERVAL_MINS};

/// Periodic reaper over SyncStatus rows.
#[derive(Clone)]
pub struct StuckJobReaper {
    store: DynStore,
    timeout_hours: u64,
}

impl StuckJobReaper {
    pub fn new(store: DynStore) -> Self {
        Self::with_timeout(store, DEFAULT_JOB_TIMEOUT_HOURS)
    }

    pub fn with_timeout(store: DynStore, timeout_hours: u64) -> Self {
        Self {
            store,
            timeout_hours,
        }
    }

    /// One sweep; returns the number of rows reaped.
    pub async fn run_once(&self) -> LedgerResult<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(self.timeout_hours as i64);
        let reaped = self
            .store
            .reap_stuck_syncs(cutoff, self.timeout_hours)
            .await?;
        if reaped > 0 {
            warn!(reaped, "reaped stuck jobs");
        }
        Ok(reaped)
    }

    /// Run once now, then every interval, until the task is dropped.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                REAPER_INTERVAL_MINS * 60,
            ));
            loop {
                interval.tick().await;
                match self.run_once().await {
                    Ok(reaped) if reaped > 0 => {
                        info!(reaped, "reaper sweep complete");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reaper sweep failed"),
                }
            }
        })
    }
}
