//! InMemoryMetrics - 呼び出しをそのまま記録する MetricsRecorder
//!
//! テストで「何回・どのラベルで」呼ばれたかを検証するための実装です。

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{FailureKind, TaskType};
use crate::ports::MetricsRecorder;

#[derive(Debug, Default)]
struct Recorded {
    dispatches: HashMap<String, u64>,
    errors: HashMap<FailureKind, u64>,
    latencies: HashMap<String, Vec<f64>>,
    active: Vec<(String, i64)>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        let guard = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut Recorded)) {
        let mut guard = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn dispatches(&self, task_type: &str) -> u64 {
        self.read(|r| r.dispatches.get(task_type).copied().unwrap_or(0))
    }

    pub fn errors(&self, kind: FailureKind) -> u64 {
        self.read(|r| r.errors.get(&kind).copied().unwrap_or(0))
    }

    pub fn latencies(&self, task_type: &str) -> Vec<f64> {
        self.read(|r| r.latencies.get(task_type).cloned().unwrap_or_default())
    }

    /// Every gauge adjustment, in call order.
    pub fn active_adjustments(&self) -> Vec<(String, i64)> {
        self.read(|r| r.active.clone())
    }

    /// Current gauge value for one agent type.
    pub fn active(&self, agent_type: &str) -> i64 {
        self.read(|r| {
            r.active
                .iter()
                .filter(|(t, _)| t == agent_type)
                .map(|(_, d)| d)
                .sum()
        })
    }

    /// Sum of all gauge adjustments across labels.
    pub fn active_net(&self) -> i64 {
        self.read(|r| r.active.iter().map(|(_, d)| d).sum())
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record_dispatch(&self, task_type: &TaskType) {
        self.write(|r| *r.dispatches.entry(task_type.to_string()).or_default() += 1);
    }

    fn record_error(&self, kind: FailureKind) {
        self.write(|r| *r.errors.entry(kind).or_default() += 1);
    }

    fn observe_latency(&self, task_type: &TaskType, seconds: f64) {
        self.write(|r| r.latencies.entry(task_type.to_string()).or_default().push(seconds));
    }

    fn adjust_active(&self, agent_type: &str, delta: i64) {
        self.write(|r| r.active.push((agent_type.to_string(), delta)));
    }
}
