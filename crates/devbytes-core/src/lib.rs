//! Core library for devbytes.
//!
//! Keeps an offline copy of the DevBytes video catalog fresh:
//!
//! - `remote`: fetches the playlist (`RemoteSource`, `DevBytesClient`)
//! - `store`: SQLite table of the current snapshot with a live read stream
//! - `repository`: the live domain view plus `refresh`
//! - `jobs`: unique named periodic jobs with persisted registration and backoff
//! - `scheduler`: the daily refresh job built on `jobs`

pub mod config;
pub mod jobs;
pub mod models;
pub mod remote;
pub mod repository;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use config::Config;
pub use models::{CachedVideo, RemoteVideo, Video};
pub use repository::{RefreshError, VideosRepository};
pub use scheduler::{ensure_scheduled, RefreshDataWorker, REFRESH_PERIOD, REFRESH_WORK_NAME};
pub use store::VideoStore;
