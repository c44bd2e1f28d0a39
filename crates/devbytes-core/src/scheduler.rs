//! Daily refresh of the offline cache.
//!
//! `ensure_scheduled` registers the unique refresh job; `RefreshDataWorker`
//! is the worker the job runner calls for each occurrence. Transient fetch
//! failures ask the runner for a retry; everything else fails the
//! occurrence and waits for the next period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::jobs::{self, ConflictPolicy, EnqueueOutcome, JobRegistry, JobRunner, WorkResult, Worker};
use crate::repository::{RefreshError, VideosRepository};

/// Unique name of the refresh job.
pub const REFRESH_WORK_NAME: &str = "RefreshDataWorker";

/// The refresh job runs once a day.
pub const REFRESH_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Make sure the refresh job is registered. Safe to call on every start:
/// with `ConflictPolicy::Keep` an existing job keeps its schedule.
pub async fn ensure_scheduled(
    registry: &JobRegistry,
    policy: ConflictPolicy,
) -> jobs::Result<EnqueueOutcome> {
    let outcome = registry
        .enqueue_unique_periodic(REFRESH_WORK_NAME, REFRESH_PERIOD, policy)
        .await?;
    info!(job = REFRESH_WORK_NAME, outcome = ?outcome, "Refresh job ensured");
    Ok(outcome)
}

/// Bind a `RefreshDataWorker` for `repository` to the refresh job.
pub fn register_refresh_worker(runner: &mut JobRunner, repository: VideosRepository) {
    runner.register(
        REFRESH_WORK_NAME,
        Arc::new(RefreshDataWorker::new(repository)),
    );
}

/// Map a refresh result to the occurrence outcome.
pub fn outcome_for(result: &Result<(), RefreshError>) -> WorkResult {
    match result {
        Ok(()) => WorkResult::Success,
        Err(e) if e.is_transient() => WorkResult::Retry,
        Err(_) => WorkResult::Failure,
    }
}

/// Run one refresh outside the schedule and report it the same way an
/// occurrence would be reported.
pub async fn run_refresh_now(repository: &VideosRepository) -> (WorkResult, Option<RefreshError>) {
    let result = repository.refresh().await;
    let outcome = outcome_for(&result);
    (outcome, result.err())
}

/// Worker that refreshes the offline cache.
pub struct RefreshDataWorker {
    repository: VideosRepository,
}

impl RefreshDataWorker {
    pub fn new(repository: VideosRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Worker for RefreshDataWorker {
    async fn do_work(&self) -> WorkResult {
        let result = self.repository.refresh().await;
        let outcome = outcome_for(&result);
        if let Err(e) = result {
            match outcome {
                WorkResult::Retry => warn!(error = %e, "Refresh hit a transient error"),
                _ => warn!(error = %e, "Refresh failed"),
            }
        }
        outcome
    }
}
