//! Ports - 抽象化レイヤー
//!
//! エージェントが外部と接する境界をすべて trait として定義します。
//! - TaskStore: タスク・エージェント状態の正本（source of truth）
//! - MetricsRecorder / LogSink: 計測と構造化ログの出力先
//! - Clock / IdGenerator / Sleeper: 時刻・ID・待機（テストで差し替え可能）
//! - TaskExecutor: 実際の作業（不透明な外部処理）

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod log_sink;
pub mod metrics;
pub mod sleeper;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use self::executor::TaskExecutor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::log_sink::LogSink;
pub use self::metrics::MetricsRecorder;
pub use self::sleeper::{Sleeper, TokioSleeper};
pub use self::task_store::{TaskCounts, TaskStore};
