//! Domain model (ids, tasks, agents, history, failure taxonomy, retry policy).

pub mod agent;
pub mod errors;
pub mod history;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod task;

pub use agent::{AgentIdentity, AgentRecord, AgentStatus, Registration};
pub use errors::{AgentError, FailureKind, PanicError, StoreError, TaskError};
pub use history::TaskHistoryRecord;
pub use ids::{CorrelationId, TaskId};
pub use outcome::{ProcessOutcome, ProcessResult};
pub use retry::RetryPolicy;
pub use task::{NewTask, Priority, Task, TaskState, TaskType};
