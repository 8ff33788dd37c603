//! TaskStore port - タスクとエージェント状態の正本（source of truth）
//!
//! # 設計原則
//! - 各操作は単独でアトミック（claim と finalize をまたぐトランザクションはない）
//! - `claim` がシステム唯一の排他制御点: 同じタスクを取り合う 2 エージェントの
//!   両方が成功することはない

use async_trait::async_trait;

use crate::domain::{
    AgentIdentity, FailureKind, NewTask, Registration, StoreError, Task, TaskHistoryRecord, TaskId,
};

/// Per-state counts of live tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert the agent as active, or refresh its heartbeat and mark it active.
    async fn register_or_heartbeat(
        &self,
        agent: &AgentIdentity,
    ) -> Result<Registration, StoreError>;

    /// Refresh `last_heartbeat` of an already registered agent.
    async fn heartbeat(&self, agent_name: &str) -> Result<(), StoreError>;

    /// Queued, unowned tasks; at most `limit`. No ordering guarantee.
    async fn list_claimable(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Atomic conditional update: take ownership if unowned (or already ours) and not finalized.
    /// `Ok(None)` means the race was lost or the task is gone.
    async fn claim(&self, task_id: TaskId, agent_name: &str) -> Result<Option<Task>, StoreError>;

    /// Move an in-progress task to completed/failed and append its history record.
    async fn finalize(
        &self,
        task_id: TaskId,
        success: bool,
        failure_kind: Option<FailureKind>,
        failure_message: Option<String>,
    ) -> Result<TaskHistoryRecord, StoreError>;

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn counts(&self) -> Result<TaskCounts, StoreError>;
}
