//! TaskExecutor port - 実際の作業を行う不透明な処理

use async_trait::async_trait;

use crate::domain::{Task, TaskError};

/// Runs one attempt of a claimed task.
///
/// The returned error decides the retry path: `Transient` is retried with backoff,
/// `Permanent` and `Unexpected` finalize immediately. A panic is treated as `Unexpected`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), TaskError>;
}
