//! Repository mediating between the remote playlist and the offline store.
//!
//! The repository exposes two things: a live, read-only view of the cached
//! videos in domain form, and `refresh`, the only operation that changes
//! what that view shows.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{RemoteVideo, Video};
use crate::remote::{FetchError, RemoteSource};
use crate::store::{StoreError, VideoStore};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl RefreshError {
    /// True when retrying the same refresh may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::Fetch(e) => e.is_transient(),
            RefreshError::Persistence(_) => false,
        }
    }
}

/// Offline-first access to the DevBytes catalog.
///
/// Clone is cheap; clones share the store and the remote source.
#[derive(Clone)]
pub struct VideosRepository {
    store: VideoStore,
    remote: Arc<dyn RemoteSource>,
}

impl VideosRepository {
    pub fn new(store: VideoStore, remote: Arc<dyn RemoteSource>) -> Self {
        Self { store, remote }
    }

    /// Live view of the cached videos.
    ///
    /// Each call returns an independent subscription that first yields the
    /// current snapshot and then every later one. Nothing is queried while
    /// no subscription is being polled. Errors never reach subscribers.
    pub fn videos(&self) -> BoxStream<'static, Vec<Video>> {
        self.store
            .read_all()
            .map(|rows| rows.iter().map(|row| row.to_domain()).collect())
            .boxed()
    }

    /// Fetch the latest playlist and replace the cached snapshot with it.
    ///
    /// The fetch completes before the write starts, so a failed fetch
    /// leaves the store untouched. No retry happens here.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let playlist = self.remote.fetch_latest().await?;
        debug!(count = playlist.len(), "Fetched playlist for refresh");

        let rows: Vec<_> = playlist.iter().map(RemoteVideo::to_cached).collect();
        self.store.write(&rows).await?;

        info!(count = rows.len(), "Offline cache refreshed");
        Ok(())
    }
}
