//! Runner that drives registered jobs on their schedules.
//!
//! Each bound job gets one task that sleeps until the job is due, calls its
//! worker, and records the outcome. One task per name means occurrences of
//! the same job never overlap.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{JobRecord, JobState, RetryPolicy, WorkResult};
use super::registry::JobRegistry;
use super::worker::Worker;

/// Why a job task woke up.
enum Wake {
    Due,
    RegistryChanged,
    Shutdown,
}

/// Binds workers to job names and runs them.
pub struct JobRunner {
    registry: JobRegistry,
    retry: RetryPolicy,
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl JobRunner {
    pub fn new(registry: JobRegistry, retry: RetryPolicy) -> Self {
        Self {
            registry,
            retry,
            workers: HashMap::new(),
        }
    }

    /// Bind `worker` to the job `name`. The job itself is registered
    /// separately through the registry.
    pub fn register(&mut self, name: impl Into<String>, worker: Arc<dyn Worker>) {
        self.workers.insert(name.into(), worker);
    }

    /// Spawn one task per bound job.
    ///
    /// The returned handle completes once every job task has stopped, which
    /// happens when `shutdown` flips to true or its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let tasks: Vec<_> = self
            .workers
            .into_iter()
            .map(|(name, worker)| {
                let task = JobTask {
                    name,
                    worker,
                    registry: self.registry.clone(),
                    retry: self.retry,
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(task.run())
            })
            .collect();

        tokio::spawn(async move {
            for result in futures::future::join_all(tasks).await {
                if let Err(e) = result {
                    error!(error = %e, "Job task panicked");
                }
            }
            info!("Job runner stopped");
        })
    }
}

struct JobTask {
    name: String,
    worker: Arc<dyn Worker>,
    registry: JobRegistry,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl JobTask {
    async fn run(mut self) {
        info!(job = %self.name, "Job task started");
        let mut changes = self.registry.subscribe();
        let mut first = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let _ = changes.borrow_and_update();

            let delay = match self.registry.get(&self.name).await {
                Some(record) => {
                    if first && record.state == JobState::Running {
                        warn!(job = %self.name, "Resuming occurrence interrupted by shutdown");
                    }
                    let delay = (record.next_run_at - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    debug!(
                        job = %self.name,
                        state = %record.state,
                        next_run_at = %record.next_run_at,
                        delay_secs = delay.as_secs(),
                        "Waiting for next run"
                    );
                    Some(delay)
                }
                None => {
                    debug!(job = %self.name, "Job not registered, waiting");
                    None
                }
            };
            first = false;

            let wake = tokio::select! {
                _ = sleep_or_forever(delay) => Wake::Due,
                res = changes.changed() => match res {
                    Ok(()) => Wake::RegistryChanged,
                    Err(_) => Wake::Shutdown,
                },
                _ = self.shutdown.changed() => Wake::Shutdown,
            };

            match wake {
                Wake::Due => {}
                Wake::RegistryChanged => continue,
                Wake::Shutdown => break,
            }

            // Re-read: the registration may have changed while we slept.
            let Some(record) = self.registry.get(&self.name).await else {
                continue;
            };
            if record.next_run_at > Utc::now() {
                continue;
            }
            if !self.run_occurrence(record).await {
                break;
            }
        }

        info!(job = %self.name, "Job task stopped");
    }

    /// Run one attempt of the current occurrence and record the outcome.
    /// Returns false if shutdown interrupted it.
    async fn run_occurrence(&mut self, record: JobRecord) -> bool {
        let generation = record.enqueued_at;
        let attempt = record.attempt + 1;
        let started = Utc::now();
        let started_instant = Instant::now();

        let marked = self
            .registry
            .update(&self.name, generation, |r| {
                r.state = JobState::Running;
                r.last_run_at = Some(started);
            })
            .await;
        match marked {
            Ok(true) => {}
            Ok(false) => return true,
            Err(e) => {
                error!(job = %self.name, error = %e, "Failed to record job start");
                return self.pause_after_storage_error().await;
            }
        }

        info!(job = %self.name, attempt, "Running occurrence");
        let worker = self.worker.clone();
        let work = AssertUnwindSafe(worker.do_work()).catch_unwind();
        let outcome = tokio::select! {
            result = work => match result {
                Ok(outcome) => outcome,
                Err(panic) => {
                    error!(
                        job = %self.name,
                        attempt,
                        panic = panic_message(panic.as_ref()),
                        "Worker panicked, failing occurrence"
                    );
                    WorkResult::Failure
                }
            },
            _ = self.shutdown.changed() => {
                warn!(job = %self.name, attempt, "Shutdown during occurrence, abandoning it");
                return false;
            }
        };

        let duration_ms = started_instant.elapsed().as_millis() as u64;
        let now = Utc::now();
        let retry_at = self.retry_at(attempt, outcome, now);

        match (outcome, retry_at) {
            (WorkResult::Success, _) => {
                info!(job = %self.name, attempt, duration_ms, "Occurrence succeeded");
            }
            (WorkResult::Retry, Some(at)) => {
                warn!(job = %self.name, attempt, retry_at = %at, "Occurrence will be retried");
            }
            (WorkResult::Retry, None) => {
                warn!(
                    job = %self.name,
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    "Retries exhausted, occurrence failed"
                );
            }
            (WorkResult::Failure, _) => {
                warn!(job = %self.name, attempt, duration_ms, "Occurrence failed");
            }
        }

        let result = self
            .registry
            .update(&self.name, generation, move |r| {
                r.last_duration_ms = Some(duration_ms);
                match (outcome, retry_at) {
                    (WorkResult::Retry, Some(at)) => {
                        r.attempt = attempt;
                        r.schedule_retry(at);
                    }
                    (WorkResult::Retry, None) => r.finish_occurrence(WorkResult::Failure, now),
                    (other, _) => r.finish_occurrence(other, now),
                }
            })
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                error!(job = %self.name, error = %e, "Failed to record job outcome");
                self.pause_after_storage_error().await
            }
        }
    }

    /// When to retry, or None if this outcome closes the occurrence.
    fn retry_at(
        &self,
        attempt: u32,
        outcome: WorkResult,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if outcome != WorkResult::Retry || attempt >= self.retry.max_attempts {
            return None;
        }
        let delay = self.retry.delay_for_retry(attempt - 1);
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Some(now + delay)
    }

    /// Back off before touching the registry again. Returns false on shutdown.
    async fn pause_after_storage_error(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry.initial_delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

async fn sleep_or_forever(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::ConflictPolicy;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Worker that replays scripted outcomes, then succeeds.
    struct ScriptedWorker {
        outcomes: Mutex<VecDeque<WorkResult>>,
        calls: AtomicUsize,
    }

    impl ScriptedWorker {
        fn new(outcomes: Vec<WorkResult>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn do_work(&self) -> WorkResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(WorkResult::Success)
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn stop(shutdown: watch::Sender<bool>, handle: JoinHandle<()>) {
        let _ = shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_reruns_same_occurrence_until_success() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_secs(3600), ConflictPolicy::Keep)
            .await
            .unwrap();
        let original = registry.get("job").await.unwrap();

        let worker = ScriptedWorker::new(vec![WorkResult::Retry, WorkResult::Retry]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(5));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        wait_for(|| worker.calls() >= 3).await;
        let reg = registry.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while reg.get("job").await.unwrap().state != JobState::Succeeded {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let record = registry.get("job").await.unwrap();
        assert_eq!(record.attempt, 0);
        assert_eq!(record.last_outcome, Some(WorkResult::Success));
        assert_eq!(
            record.occurrence_at,
            original.occurrence_at + chrono::Duration::seconds(3600)
        );

        stop(shutdown_tx, handle).await;
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_occurrence_but_keep_job() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_secs(3600), ConflictPolicy::Keep)
            .await
            .unwrap();

        let worker = ScriptedWorker::new(vec![WorkResult::Retry; 10]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(2));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        let reg = registry.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while reg.get("job").await.unwrap().state != JobState::Failed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop(shutdown_tx, handle).await;
        assert_eq!(worker.calls(), 2);
        let record = registry.get("job").await.unwrap();
        assert_eq!(record.last_outcome, Some(WorkResult::Failure));
        assert!(record.next_run_at > Utc::now());
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_later_periods() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_millis(100), ConflictPolicy::Keep)
            .await
            .unwrap();

        let worker = ScriptedWorker::new(vec![WorkResult::Failure]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(3));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        wait_for(|| worker.calls() >= 2).await;
        stop(shutdown_tx, handle).await;
        assert!(registry.get("job").await.is_some());
    }

    /// Worker that panics on its first call and succeeds afterwards.
    struct PanicOnceWorker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Worker for PanicOnceWorker {
        async fn do_work(&self) -> WorkResult {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("feed parser exploded");
            }
            WorkResult::Success
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_only_its_occurrence() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_millis(100), ConflictPolicy::Keep)
            .await
            .unwrap();

        let worker = Arc::new(PanicOnceWorker {
            calls: AtomicUsize::new(0),
        });
        let mut runner = JobRunner::new(registry.clone(), fast_retry(3));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        wait_for(|| worker.calls.load(Ordering::SeqCst) >= 2).await;
        let reg = registry.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while reg.get("job").await.unwrap().state != JobState::Succeeded {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(!handle.is_finished());
        stop(shutdown_tx, handle).await;
    }

    #[tokio::test]
    async fn test_interrupted_occurrence_runs_at_startup() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_secs(3600), ConflictPolicy::Keep)
            .await
            .unwrap();
        let record = registry.get("job").await.unwrap();
        registry
            .update("job", record.enqueued_at, |r| {
                r.state = JobState::Running;
                r.last_run_at = Some(r.next_run_at);
            })
            .await
            .unwrap();

        let worker = ScriptedWorker::new(vec![]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(3));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        wait_for(|| worker.calls() == 1).await;
        let reg = registry.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while reg.get("job").await.unwrap().state != JobState::Succeeded {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop(shutdown_tx, handle).await;
        assert_eq!(worker.calls(), 1);
    }

    #[tokio::test]
    async fn test_worker_waits_for_registration() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();

        let worker = ScriptedWorker::new(vec![]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(3));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(worker.calls(), 0);

        registry
            .enqueue_unique_periodic("job", Duration::from_secs(3600), ConflictPolicy::Keep)
            .await
            .unwrap();
        wait_for(|| worker.calls() == 1).await;

        stop(shutdown_tx, handle).await;
    }

    #[tokio::test]
    async fn test_future_occurrence_is_not_run_early() {
        let dir = TempDir::new().unwrap();
        let registry = JobRegistry::open(dir.path().join("jobs.json")).await.unwrap();
        registry
            .enqueue_unique_periodic("job", Duration::from_secs(3600), ConflictPolicy::Keep)
            .await
            .unwrap();
        let record = registry.get("job").await.unwrap();
        registry
            .update("job", record.enqueued_at, |r| {
                r.next_run_at = Utc::now() + chrono::Duration::hours(1);
            })
            .await
            .unwrap();

        let worker = ScriptedWorker::new(vec![]);
        let mut runner = JobRunner::new(registry.clone(), fast_retry(3));
        runner.register("job", worker.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.start(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        stop(shutdown_tx, handle).await;
        assert_eq!(worker.calls(), 0);
    }
}
