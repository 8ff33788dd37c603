//! Task history: one immutable record per finalized task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FailureKind, Priority, TaskId, TaskState, TaskType};

/// Append-only record of a terminal outcome.
///
/// Written once by `finalize`; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub agent_name: Option<String>,
    pub state: TaskState,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub error_type: Option<FailureKind>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
