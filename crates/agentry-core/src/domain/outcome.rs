//! Outcome of processing one claimed task.

use serde::{Deserialize, Serialize};

use super::{FailureKind, TaskId};

/// Terminal result of the processing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "snake_case")]
pub enum ProcessResult {
    Succeeded,
    Failed(FailureKind),
}

/// What the processor reports back to the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub task_id: TaskId,

    /// Times the unit of work was executed (1 = first try succeeded or failed fast).
    pub attempts: u32,

    pub result: ProcessResult,

    /// Whether the store accepted the finalize call.
    pub finalized: bool,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        self.result == ProcessResult::Succeeded
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.result {
            ProcessResult::Succeeded => None,
            ProcessResult::Failed(kind) => Some(kind),
        }
    }
}
