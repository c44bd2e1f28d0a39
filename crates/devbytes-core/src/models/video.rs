use serde::{Deserialize, Serialize};

use crate::utils::smart_truncate;

/// Length of `Video::short_description` before the ellipsis.
const SHORT_DESCRIPTION_LEN: usize = 200;

/// Top-level body of the playlist endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteVideoContainer {
    pub videos: Vec<RemoteVideo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVideo {
    pub title: String,
    pub description: String,
    pub url: String,
    pub updated: String,
    pub thumbnail: String,
    #[serde(rename = "closedCaptions", default)]
    pub closed_captions: Option<String>,
}

impl RemoteVideo {
    /// Convert to the persisted row. Closed captions are not cached.
    pub fn to_cached(&self) -> CachedVideo {
        CachedVideo {
            url: self.url.clone(),
            updated: self.updated.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail: self.thumbnail.clone(),
        }
    }
}

impl RemoteVideoContainer {
    pub fn to_cached(&self) -> Vec<CachedVideo> {
        self.videos.iter().map(RemoteVideo::to_cached).collect()
    }
}

/// A row of the `videos` table. `url` is the row identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedVideo {
    pub url: String,
    pub updated: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
}

impl CachedVideo {
    pub fn to_domain(&self) -> Video {
        Video {
            title: self.title.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            updated: self.updated.clone(),
            thumbnail: self.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub title: String,
    pub description: String,
    pub url: String,
    pub updated: String,
    pub thumbnail: String,
}

impl Video {
    /// Description cut at a word boundary, suitable for list display.
    pub fn short_description(&self) -> String {
        smart_truncate(&self.description, SHORT_DESCRIPTION_LEN)
    }
}
