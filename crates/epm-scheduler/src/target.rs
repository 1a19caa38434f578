//! Receiver of process actions fired by the scheduler.

use async_trait::async_trait;
use epm_common::ProcessResult;

/// Anything that can start, stop and restart processes by name.
///
/// The process manager implements this; tests use a recording mock. The
/// scheduler holds the target behind an `Arc` and never assumes more than
/// this trait.
#[async_trait]
pub trait JobTarget: Send + Sync {
    async fn start(&self, name: &str) -> ProcessResult<()>;

    async fn stop(&self, name: &str) -> ProcessResult<()>;

    async fn restart(&self, name: &str) -> ProcessResult<()>;
}
