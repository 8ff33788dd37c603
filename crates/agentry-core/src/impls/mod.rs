//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 単一プロセス内で共有するタスクストア（デモ・テスト用の正本）
//! - **StdoutSink / FileSink / MemorySink**: 構造化ログの出力先
//! - **PrometheusMetrics / MetricsExporter**: Prometheus レジストリと `/metrics` エンドポイント
//! - **InMemoryMetrics**: テスト用の MetricsRecorder
//! - **SimulatedExecutor**: ランダムに失敗する疑似ワーク

pub mod log_sinks;
pub mod memory_metrics;
pub mod memory_store;
pub mod prometheus;
pub mod simulated_executor;

pub use self::log_sinks::{FileSink, MemorySink, StdoutSink};
pub use self::memory_metrics::InMemoryMetrics;
pub use self::memory_store::InMemoryTaskStore;
pub use self::prometheus::{MetricsExporter, PrometheusMetrics};
pub use self::simulated_executor::SimulatedExecutor;
