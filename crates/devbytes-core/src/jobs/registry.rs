//! Persisted registry of unique periodic jobs.
//!
//! Stores every registration in one JSON file with an in-memory copy.
//! Registrations survive restarts; the runner picks them up on start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use super::error::{JobError, Result};
use super::job::{ConflictPolicy, EnqueueOutcome, JobRecord, MAX_PERIOD};

/// Registry of named periodic jobs.
///
/// Clone is cheap; clones share state and change notifications.
#[derive(Clone)]
pub struct JobRegistry {
    path: PathBuf,
    jobs: Arc<RwLock<BTreeMap<String, JobRecord>>>,
    /// Bumped when a registration is created, replaced or cancelled.
    changes: Arc<watch::Sender<u64>>,
}

impl JobRegistry {
    /// Open the registry file at `path`, creating an empty registry if the
    /// file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let jobs: BTreeMap<String, JobRecord> = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| JobError::Storage(format!("read {}: {}", path.display(), e)))?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        if !jobs.is_empty() {
            info!(path = %path.display(), jobs = jobs.len(), "Loaded job registry");
        }

        let (changes, _) = watch::channel(0);
        Ok(Self {
            path,
            jobs: Arc::new(RwLock::new(jobs)),
            changes: Arc::new(changes),
        })
    }

    /// Register a unique periodic job.
    ///
    /// With `ConflictPolicy::Keep` an existing registration is left exactly
    /// as it is. With `ConflictPolicy::Replace` it is reset to a fresh
    /// schedule whose first occurrence is due now.
    pub async fn enqueue_unique_periodic(
        &self,
        name: &str,
        period: Duration,
        policy: ConflictPolicy,
    ) -> Result<EnqueueOutcome> {
        if period.is_zero() || period > MAX_PERIOD {
            return Err(JobError::InvalidPeriod(name.to_string()));
        }

        let mut jobs = self.jobs.write().await;
        let outcome = match (jobs.contains_key(name), policy) {
            (true, ConflictPolicy::Keep) => {
                debug!(job = name, "Job already registered, keeping existing");
                return Ok(EnqueueOutcome::Kept);
            }
            (true, ConflictPolicy::Replace) => EnqueueOutcome::Replaced,
            (false, _) => EnqueueOutcome::Created,
        };

        let mut updated = jobs.clone();
        updated.insert(name.to_string(), JobRecord::new(name, period, Utc::now()));
        self.persist(&updated).await?;
        *jobs = updated;
        drop(jobs);

        self.changes.send_modify(|v| *v += 1);
        info!(
            job = name,
            period_secs = period.as_secs(),
            outcome = ?outcome,
            "Enqueued periodic job"
        );
        Ok(outcome)
    }

    /// Get a registration by name.
    pub async fn get(&self, name: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(name).cloned()
    }

    /// All registrations, ordered by name.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Remove a registration. Returns false if it did not exist.
    pub async fn cancel(&self, name: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(name) {
            return Ok(false);
        }

        let mut updated = jobs.clone();
        updated.remove(name);
        self.persist(&updated).await?;
        *jobs = updated;
        drop(jobs);

        self.changes.send_modify(|v| *v += 1);
        info!(job = name, "Cancelled job");
        Ok(true)
    }

    /// Apply `f` to the registration `name` if it still belongs to the
    /// registration made at `enqueued_at`, then persist.
    ///
    /// Returns false when the job was cancelled or replaced in the meantime.
    pub async fn update<F>(&self, name: &str, enqueued_at: DateTime<Utc>, f: F) -> Result<bool>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.write().await;
        let mut updated = jobs.clone();
        match updated.get_mut(name) {
            Some(record) if record.enqueued_at == enqueued_at => f(record),
            _ => return Ok(false),
        }

        self.persist(&updated).await?;
        *jobs = updated;
        Ok(true)
    }

    /// Receiver that is notified whenever registrations are added, replaced
    /// or cancelled.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Write the registry through a temporary file so a crash never leaves
    /// a half-written file behind.
    async fn persist(&self, jobs: &BTreeMap<String, JobRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| JobError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| JobError::Storage(format!("rename {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
