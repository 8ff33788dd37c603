//! Scoped metric guards.
//!
//! Both guards do their closing step in `Drop`, so early returns, `?` and unwinding
//! all release exactly once.

use std::time::{Duration, Instant};

use crate::domain::TaskType;
use crate::ports::MetricsRecorder;

/// `active_tasks{agent_type}` +1 on acquire, -1 on drop.
#[must_use = "dropping the guard immediately decrements the gauge"]
pub struct ActiveTaskGuard<'a> {
    metrics: &'a dyn MetricsRecorder,
    agent_type: String,
}

impl<'a> ActiveTaskGuard<'a> {
    pub fn acquire(metrics: &'a dyn MetricsRecorder, agent_type: impl Into<String>) -> Self {
        let agent_type = agent_type.into();
        metrics.adjust_active(&agent_type, 1);
        Self {
            metrics,
            agent_type,
        }
    }
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        self.metrics.adjust_active(&self.agent_type, -1);
    }
}

/// Observes elapsed time into `task_latency_seconds{task_type}` exactly once.
#[must_use = "dropping the timer immediately records a near-zero latency"]
pub struct LatencyTimer<'a> {
    metrics: &'a dyn MetricsRecorder,
    task_type: TaskType,
    started: Instant,
    observed: bool,
}

impl<'a> LatencyTimer<'a> {
    pub fn start(metrics: &'a dyn MetricsRecorder, task_type: &TaskType) -> Self {
        Self {
            metrics,
            task_type: task_type.clone(),
            started: Instant::now(),
            observed: false,
        }
    }

    /// Record now and return the elapsed time. The drop that follows is a no-op.
    pub fn stop(mut self) -> Duration {
        self.observe()
    }

    fn observe(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.observed {
            self.observed = true;
            self.metrics
                .observe_latency(&self.task_type, elapsed.as_secs_f64());
        }
        elapsed
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.observe();
    }
}
