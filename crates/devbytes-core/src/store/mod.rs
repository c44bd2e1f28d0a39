//! Offline store for the DevBytes catalog.
//!
//! This module provides `VideoStore`, a SQLite-backed table of the current
//! known videos. Writes replace the whole snapshot atomically; readers
//! observe it through a live stream that re-emits after every committed
//! write.
//!
//! All SQL runs on the `tokio-rusqlite` connection thread, never on the
//! caller's task.

pub mod error;
pub mod schema;
pub mod video_store;

pub use error::StoreError;
pub use video_store::VideoStore;
