//! Remote source for the DevBytes playlist.
//!
//! `RemoteSource` is the seam the repository fetches through; `DevBytesClient`
//! is the HTTP implementation. Fetching is a single attempt: retry policy
//! belongs to the job runner, not to this module.

pub mod client;
pub mod error;

pub use client::{DevBytesClient, RemoteSource};
pub use error::FetchError;
