//! SimulatedExecutor - ランダムに失敗する疑似ワーク
//!
//! デモ用。1 回の試行ごとに:
//! - `transient_rate` の確率で一時的エラー
//! - それ以外で `permanent_rate` の確率で恒久的エラー
//! - 残りは `delay` の範囲で待ってから成功

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::{Task, TaskError};
use crate::ports::TaskExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Roll {
    Transient,
    Permanent,
    Work(Duration),
}

#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    transient_rate: f64,
    permanent_rate: f64,
    delay: RangeInclusive<f64>,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            transient_rate: 0.2,
            permanent_rate: 0.1,
            delay: 0.5..=2.0,
        }
    }
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probabilities are clamped to `[0, 1]`.
    pub fn with_rates(mut self, transient: f64, permanent: f64) -> Self {
        self.transient_rate = clamp_rate(transient);
        self.permanent_rate = clamp_rate(permanent);
        self
    }

    /// Simulated work duration range in seconds. Reversed bounds are swapped.
    pub fn with_delay_secs(mut self, min: f64, max: f64) -> Self {
        let (min, max) = (min.max(0.0), max.max(0.0));
        self.delay = if min <= max { min..=max } else { max..=min };
        self
    }

    fn roll(&self) -> Roll {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.transient_rate) {
            Roll::Transient
        } else if rng.gen_bool(self.permanent_rate) {
            Roll::Permanent
        } else {
            let secs = rng.gen_range(self.delay.clone());
            Roll::Work(Duration::from_secs_f64(secs))
        }
    }
}

fn clamp_rate(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task) -> Result<(), TaskError> {
        // roll before awaiting; ThreadRng is not Send
        match self.roll() {
            Roll::Transient => Err(TaskError::transient(format!(
                "Simulated network timeout while processing {}",
                task.task_type
            ))),
            Roll::Permanent => Err(TaskError::permanent(format!(
                "Invalid input for {} task",
                task.task_type
            ))),
            Roll::Work(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
