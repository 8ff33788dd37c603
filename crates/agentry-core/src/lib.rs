//! agentry-core
//!
//! Building blocks for instrumented task-processing agents.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, agent, history, errors, retry, outcome）
//! - **ports**: 抽象化レイヤー（TaskStore, TaskExecutor, MetricsRecorder, LogSink, Clock, ...）
//! - **observability**: 構造化イベントログとメトリクス用ガード
//! - **impls**: 実装（InMemoryTaskStore, PrometheusMetrics, ログ出力先, SimulatedExecutor）
//! - **app**: エージェント本体（TaskProcessor, AgentLoop, AgentBuilder）
//! - **config**: AgentConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{AgentBuilder, AgentGroup, AgentLoop, RunSummary};
pub use config::AgentConfig;
