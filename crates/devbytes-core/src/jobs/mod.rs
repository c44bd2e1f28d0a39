//! Job facility for unique, named, periodic background work.
//!
//! Provides what a platform job manager would: registering a periodic job
//! under a unique name with an explicit conflict policy, persisting that
//! registration across restarts, and running the bound worker on schedule
//! with exponential backoff when it asks for a retry.
//!
//! # Usage
//!
//! ```ignore
//! let registry = JobRegistry::open(config.jobs_path()?).await?;
//! registry
//!     .enqueue_unique_periodic("refresh", Duration::from_secs(86_400), ConflictPolicy::Keep)
//!     .await?;
//!
//! let mut runner = JobRunner::new(registry, RetryPolicy::default());
//! runner.register("refresh", Arc::new(my_worker));
//! let handle = runner.start(shutdown_rx);
//! ```

pub mod error;
pub mod job;
pub mod registry;
pub mod runner;
pub mod worker;

pub use error::{JobError, Result};
pub use job::{
    ConflictPolicy, EnqueueOutcome, JobRecord, JobState, RetryPolicy, WorkResult, MAX_PERIOD,
};
pub use registry::JobRegistry;
pub use runner::JobRunner;
pub use worker::Worker;
