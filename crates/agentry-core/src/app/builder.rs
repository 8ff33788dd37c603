//! AgentBuilder - エージェントの構築とワイヤリング
//!
//! # 方針
//! - 必須の依存（store / executor / metrics / log sink）は明示的に渡す
//! - build() で設定を検証し、足りないものがあれば起動前に BuildError を返す（Fail-fast）
//! - Clock / Sleeper / shutdown は省略可能（本番用のデフォルトが入る）

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AgentConfig;
use crate::observability::{EventLogger, Severity};
use crate::ports::{
    Clock, LogSink, MetricsRecorder, Sleeper, SystemClock, TaskExecutor, TaskStore, TokioSleeper,
};

use super::agent_loop::AgentLoop;
use super::client::TaskStoreClient;
use super::processor::TaskProcessor;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing component: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// # 使用例
/// ```ignore
/// let agent = AgentBuilder::new(AgentConfig::default())
///     .store(store)
///     .executor(Arc::new(SimulatedExecutor::new()))
///     .metrics(metrics)
///     .log_sink(Arc::new(StdoutSink))
///     .build()?;
/// let summary = agent.run().await?;
/// ```
pub struct AgentBuilder {
    config: AgentConfig,
    store: Option<Arc<dyn TaskStore>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    sink: Option<Arc<dyn LogSink>>,
    min_severity: Severity,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            store: None,
            executor: None,
            metrics: None,
            sink: None,
            min_severity: Severity::Info,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            shutdown_rx: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Minimum event severity written by this agent's logger.
    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Without one, the agent only stops at its iteration limit.
    pub fn shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    fn validate(config: &AgentConfig) -> Result<(), BuildError> {
        if config.agent_name.trim().is_empty() {
            return Err(BuildError::InvalidConfig("agent_name must not be empty".into()));
        }
        if config.agent_type.trim().is_empty() {
            return Err(BuildError::InvalidConfig("agent_type must not be empty".into()));
        }
        if config.claim_batch == 0 {
            return Err(BuildError::InvalidConfig("claim_batch must be at least 1".into()));
        }
        if config.retry.base_delay > config.retry.max_delay {
            return Err(BuildError::InvalidConfig(format!(
                "retry base_delay {:?} exceeds max_delay {:?}",
                config.retry.base_delay, config.retry.max_delay
            )));
        }
        Ok(())
    }

    pub fn build(self) -> Result<AgentLoop, BuildError> {
        Self::validate(&self.config)?;

        let store = self.store.ok_or(BuildError::Missing("task store"))?;
        let executor = self.executor.ok_or(BuildError::Missing("task executor"))?;
        let metrics = self.metrics.ok_or(BuildError::Missing("metrics recorder"))?;
        let sink = self.sink.ok_or(BuildError::Missing("log sink"))?;

        let logger = Arc::new(
            EventLogger::new(self.config.agent_name.clone(), self.min_severity, sink)
                .with_clock(self.clock.clone()),
        );
        let client = TaskStoreClient::new(store, logger.clone());
        let processor = TaskProcessor::new(
            client.clone(),
            executor,
            metrics,
            logger.clone(),
            self.sleeper.clone(),
            self.config.retry.clone(),
            self.config.agent_type.clone(),
        );
        let shutdown_rx = self
            .shutdown_rx
            .unwrap_or_else(|| watch::channel(false).1);

        Ok(AgentLoop {
            config: self.config,
            client,
            processor,
            logger,
            sleeper: self.sleeper,
            clock: self.clock,
            shutdown_rx,
        })
    }
}
