//! Data models for DevBytes catalog entries.
//!
//! One catalog entry exists in three shapes:
//!
//! - `RemoteVideo`: what the network returns, wrapped in `RemoteVideoContainer`
//! - `CachedVideo`: the row persisted in the offline store
//! - `Video`: the domain form handed to consumers

pub mod video;

pub use video::{CachedVideo, RemoteVideo, RemoteVideoContainer, Video};
