//! MetricsRecorder port - 数値メトリクスの記録先
//!
//! 計測はビジネスロジックを止めてはいけないので、すべて戻り値なし（infallible）です。

use crate::domain::{FailureKind, TaskType};

pub trait MetricsRecorder: Send + Sync {
    /// `tasks_dispatched_total{task_type}` += 1
    fn record_dispatch(&self, task_type: &TaskType);

    /// `errors_encountered_total{error_type}` += 1
    fn record_error(&self, kind: FailureKind);

    /// One sample into `task_latency_seconds{task_type}`.
    fn observe_latency(&self, task_type: &TaskType, seconds: f64);

    /// `active_tasks{agent_type}` += delta. Use `ActiveTaskGuard` rather than calling this directly.
    fn adjust_active(&self, agent_type: &str, delta: i64);
}
