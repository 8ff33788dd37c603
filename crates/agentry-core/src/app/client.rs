//! TaskStoreClient - TaskStore 呼び出しの境界
//!
//! # 振る舞い
//! - StoreError はここで捕まえてイベントとして記録し、呼び出し側には
//!   `bool` / `Option` / 空の `Vec` で返す（エージェントは止まらない）
//! - correlation_id: 登録・一覧・ハートビートは新規 ID、claim / finalize はタスク ID

use std::sync::Arc;

use crate::domain::{
    AgentIdentity, CorrelationId, FailureKind, Registration, StoreError, Task, TaskHistoryRecord,
    TaskId,
};
use crate::observability::{EventLogger, FailureContext, LogEvent};
use crate::ports::{TaskCounts, TaskStore};

const STORE_ERROR: &str = "StoreError";

#[derive(Clone)]
pub struct TaskStoreClient {
    store: Arc<dyn TaskStore>,
    logger: Arc<EventLogger>,
}

impl TaskStoreClient {
    pub fn new(store: Arc<dyn TaskStore>, logger: Arc<EventLogger>) -> Self {
        Self { store, logger }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    fn failure(err: &StoreError) -> FailureContext {
        FailureContext::from_error(STORE_ERROR, err)
    }

    /// Upsert the agent row. `false` if the store rejected it.
    pub async fn register(&self, identity: &AgentIdentity) -> bool {
        let correlation_id = CorrelationId::generate();
        match self.store.register_or_heartbeat(identity).await {
            Ok(Registration::Registered) => {
                self.logger.emit(
                    LogEvent::info("agent_registered", format!("Agent {} registered", identity.name))
                        .with_meta("agent_type", identity.agent_type.clone())
                        .with_meta("capabilities", identity.capabilities.clone())
                        .with_correlation_id(correlation_id),
                );
                true
            }
            Ok(Registration::HeartbeatRefreshed) => {
                self.logger.emit(
                    LogEvent::info(
                        "agent_heartbeat",
                        format!("Agent {} already registered, heartbeat updated", identity.name),
                    )
                    .with_correlation_id(correlation_id),
                );
                true
            }
            Err(e) => {
                self.logger.emit(
                    LogEvent::error("agent_registration_failed", format!("Failed to register agent: {e}"))
                        .with_meta("error", e.to_string())
                        .with_correlation_id(correlation_id)
                        .with_failure(Self::failure(&e)),
                );
                false
            }
        }
    }

    /// A missed heartbeat is logged but not terminal.
    pub async fn heartbeat(&self, agent_name: &str) -> bool {
        let correlation_id = CorrelationId::generate();
        match self.store.heartbeat(agent_name).await {
            Ok(()) => {
                self.logger.emit(
                    LogEvent::debug("agent_heartbeat", "Heartbeat updated")
                        .with_correlation_id(correlation_id),
                );
                true
            }
            Err(e) => {
                self.logger.emit(
                    LogEvent::error("heartbeat_failed", format!("Failed to update heartbeat: {e}"))
                        .with_meta("error", e.to_string())
                        .with_correlation_id(correlation_id)
                        .with_failure(Self::failure(&e)),
                );
                false
            }
        }
    }

    /// Claimable tasks, or an empty list if the store failed.
    pub async fn claimable(&self, limit: usize) -> Vec<Task> {
        match self.store.list_claimable(limit).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.logger.emit(
                    LogEvent::error("get_tasks_failed", format!("Failed to get pending tasks: {e}"))
                        .with_meta("error", e.to_string())
                        .with_correlation_id(CorrelationId::generate())
                        .with_failure(Self::failure(&e)),
                );
                Vec::new()
            }
        }
    }

    /// `None` when another agent owns the task, it is finalized or gone, or the store failed.
    pub async fn claim(&self, task_id: TaskId, agent_name: &str) -> Option<Task> {
        match self.store.claim(task_id, agent_name).await {
            Ok(Some(task)) => {
                self.logger.emit(
                    LogEvent::info("task_claimed", format!("Claimed task {task_id}"))
                        .with_meta("task_id", task_id.to_string())
                        .with_meta("task_type", task.task_type.as_str())
                        .with_meta("priority", task.priority.as_str())
                        .with_correlation_id(task_id),
                );
                Some(task)
            }
            Ok(None) => {
                self.logger.emit(
                    LogEvent::debug(
                        "claim_task_skipped",
                        format!("Task {task_id} already claimed or does not exist"),
                    )
                    .with_correlation_id(task_id),
                );
                None
            }
            Err(e) => {
                self.logger.emit(
                    LogEvent::error("claim_task_failed", format!("Failed to claim task {task_id}: {e}"))
                        .with_meta("task_id", task_id.to_string())
                        .with_meta("error", e.to_string())
                        .with_correlation_id(task_id)
                        .with_failure(Self::failure(&e)),
                );
                None
            }
        }
    }

    /// Record the terminal state. Not retried on failure.
    pub async fn finalize(
        &self,
        task_id: TaskId,
        success: bool,
        failure_kind: Option<FailureKind>,
        failure_message: Option<String>,
    ) -> Option<TaskHistoryRecord> {
        match self
            .store
            .finalize(task_id, success, failure_kind, failure_message)
            .await
        {
            Ok(record) => {
                self.logger.emit(
                    LogEvent::debug(
                        "task_finalized",
                        format!("Task {task_id} {}", record.state.as_str()),
                    )
                    .with_meta("task_id", task_id.to_string())
                    .with_meta("duration_ms", record.duration_ms)
                    .with_meta("success", record.success)
                    .with_correlation_id(task_id),
                );
                Some(record)
            }
            Err(e) => {
                self.logger.emit(
                    LogEvent::error(
                        "complete_task_failed",
                        format!("Failed to complete task {task_id}: {e}"),
                    )
                    .with_meta("task_id", task_id.to_string())
                    .with_meta("error", e.to_string())
                    .with_correlation_id(task_id)
                    .with_failure(Self::failure(&e)),
                );
                None
            }
        }
    }

    pub async fn counts(&self) -> Option<TaskCounts> {
        match self.store.counts().await {
            Ok(counts) => Some(counts),
            Err(e) => {
                self.logger.emit(
                    LogEvent::error("get_task_counts_failed", format!("Failed to count tasks: {e}"))
                        .with_meta("error", e.to_string())
                        .with_failure(Self::failure(&e)),
                );
                None
            }
        }
    }
}
