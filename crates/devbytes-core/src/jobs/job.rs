//! Job definitions and runtime state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Longest period a periodic job may have.
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// What to do when a job with the same name is already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave the existing job untouched and drop the new request.
    Keep,
    /// Reset the existing job to a fresh schedule.
    Replace,
}

/// Outcome of one occurrence, as reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkResult {
    Success,
    /// Re-attempt this occurrence after a backoff.
    Retry,
    /// Give up on this occurrence. Later periods still run.
    Failure,
}

/// Lifecycle of a registered job. An unregistered job is "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running,
    Succeeded,
    RetryPending,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Scheduled => write!(f, "scheduled"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::RetryPending => write!(f, "retry pending"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of `JobRegistry::enqueue_unique_periodic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Kept,
    Replaced,
}

/// A registered periodic job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub period_ms: u64,
    /// Identifies this registration; changes when the job is replaced.
    pub enqueued_at: DateTime<Utc>,
    /// Due time of the current occurrence. Retries do not move it.
    pub occurrence_at: DateTime<Utc>,
    /// When the runner should next call the worker.
    pub next_run_at: DateTime<Utc>,
    pub state: JobState,
    /// Attempts already made for the current occurrence.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<WorkResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
}

impl JobRecord {
    /// A new registration whose first occurrence is due immediately.
    pub fn new(name: impl Into<String>, period: Duration, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            period_ms: u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            enqueued_at: now,
            occurrence_at: now,
            next_run_at: now,
            state: JobState::Scheduled,
            attempt: 0,
            last_run_at: None,
            last_outcome: None,
            last_duration_ms: None,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Due time of the occurrence after the current one. If that time has
    /// already passed, the next occurrence is a full period from `now`, so
    /// missed periods are never run back to back.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // Saturate instead of overflowing on a hand-edited registry file.
        let period = TimeDelta::from_std(self.period()).unwrap_or(TimeDelta::MAX);
        let after = |at: DateTime<Utc>| {
            at.checked_add_signed(period)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        };
        let next = after(self.occurrence_at);
        if next <= now {
            after(now)
        } else {
            next
        }
    }

    /// Move to the next period after a finished occurrence.
    pub fn finish_occurrence(&mut self, outcome: WorkResult, now: DateTime<Utc>) {
        let next = self.next_occurrence(now);
        self.state = match outcome {
            WorkResult::Success => JobState::Succeeded,
            WorkResult::Retry | WorkResult::Failure => JobState::Failed,
        };
        self.attempt = 0;
        self.occurrence_at = next;
        self.next_run_at = next;
        self.last_outcome = Some(outcome);
    }

    /// Keep the current occurrence open and re-run it at `retry_at`.
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>) {
        self.state = JobState::RetryPending;
        self.next_run_at = retry_at;
        self.last_outcome = Some(WorkResult::Retry);
    }
}

/// Exponential backoff for occurrences that ask to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts per occurrence, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(5 * 60 * 60),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    ///
    /// Delay = min(initial * 2^retry, max) * (0.8 + random(0, 0.4))
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let base_delay = initial_ms.saturating_mul(1u64 << retry.min(20));
        let capped_delay = base_delay.min(max_ms);

        // Add jitter: ±20% randomization
        let jitter_factor = 0.8 + (rand::random::<f64>() * 0.4);
        let jittered_delay = (capped_delay as f64 * jitter_factor) as u64;

        Duration::from_millis(jittered_delay)
    }
}
