use async_trait::async_trait;

use super::job::WorkResult;

/// A unit of work the runner calls once per occurrence (and again for each
/// retry of that occurrence).
#[async_trait]
pub trait Worker: Send + Sync {
    async fn do_work(&self) -> WorkResult;
}
