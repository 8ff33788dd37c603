//! App - アプリケーション層
//!
//! ports を組み合わせてエージェントの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **TaskStoreClient**: ストア呼び出しの境界（失敗はログに残して握りつぶす）
//! - **TaskProcessor**: リトライ付きタスク処理ステートマシン
//! - **AgentLoop / AgentGroup**: 制御ループと複数エージェントの起動・停止
//! - **AgentBuilder**: ワイヤリングと起動時検証
//! - **seed**: デモ用タスクの投入

pub mod agent_loop;
pub mod builder;
pub mod client;
pub mod processor;
pub mod seed;

pub use self::agent_loop::{AgentGroup, AgentLoop, RunSummary};
pub use self::builder::{AgentBuilder, BuildError};
pub use self::client::TaskStoreClient;
pub use self::processor::TaskProcessor;
pub use self::seed::seed_tasks;
