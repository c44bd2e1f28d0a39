//! HTTP client for the DevBytes playlist endpoint.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use crate::config::Config;
use crate::models::{RemoteVideo, RemoteVideoContainer};

use super::FetchError;

/// Path of the playlist endpoint, relative to the base url.
const PLAYLIST_PATH: &str = "devbytes";

/// A source of the latest playlist.
///
/// Implementations make exactly one attempt per call and report whether a
/// failure is worth retrying through `FetchError::is_transient`.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_latest(&self) -> std::result::Result<Vec<RemoteVideo>, FetchError>;
}

/// Playlist client. Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone)]
pub struct DevBytesClient {
    client: Client,
    base_url: String,
}

impl DevBytesClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.base_url(), config.request_timeout())
    }

    fn playlist_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), PLAYLIST_PATH)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, FetchError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }
}

/// Parse a playlist body. Anything that is not a well-formed container is a
/// permanent failure.
pub(crate) fn parse_playlist(body: &str) -> std::result::Result<Vec<RemoteVideo>, FetchError> {
    serde_json::from_str::<RemoteVideoContainer>(body)
        .map(|container| container.videos)
        .map_err(|e| FetchError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RemoteSource for DevBytesClient {
    async fn fetch_latest(&self) -> std::result::Result<Vec<RemoteVideo>, FetchError> {
        let url = self.playlist_url();
        debug!(url = %url, "Fetching playlist");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        let videos = parse_playlist(&text)?;

        debug!(count = videos.len(), "Playlist fetched");
        Ok(videos)
    }
}
