//! AgentLoop - エージェントの制御ループ
//!
//! # 流れ
//! 1. system_startup を記録して登録（失敗したら CRITICAL を出して終了）
//! 2. デモ用タスクを投入（`seed_tasks > 0` のとき）
//! 3. ループ: ハートビート → 一覧 → claim → 処理（逐次） → poll_interval 待ち
//! 4. shutdown を受けたら system_shutdown を記録して抜ける
//!
//! shutdown を見るのはタスクの合間と待ちの最中だけ。処理中のタスク（リトライ待ちを含む）は中断しない。

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::domain::{AgentError, CorrelationId};
use crate::observability::{EventLogger, LogEvent};
use crate::ports::{Clock, Sleeper};

use super::client::TaskStoreClient;
use super::processor::TaskProcessor;
use super::seed::seed_tasks;

/// Totals for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub iterations: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct AgentLoop {
    pub(crate) config: AgentConfig,
    pub(crate) client: TaskStoreClient,
    pub(crate) processor: TaskProcessor,
    pub(crate) logger: Arc<EventLogger>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl AgentLoop {
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run until shutdown is signalled.
    pub async fn run(self) -> Result<RunSummary, AgentError> {
        self.run_until(None).await
    }

    /// Run at most `n` iterations (or until shutdown, whichever is first).
    pub async fn run_iterations(self, n: u64) -> Result<RunSummary, AgentError> {
        self.run_until(Some(n)).await
    }

    async fn run_until(mut self, limit: Option<u64>) -> Result<RunSummary, AgentError> {
        self.startup().await?;

        let mut summary = RunSummary::default();
        let mut last_heartbeat = self.clock.now();

        loop {
            if self.shutdown_requested() || limit.is_some_and(|n| summary.iterations >= n) {
                break;
            }

            if self.heartbeat_due(last_heartbeat) {
                self.client.heartbeat(&self.config.agent_name).await;
                last_heartbeat = self.clock.now();
            }

            self.iterate(&mut summary).await;
            summary.iterations += 1;

            if limit.is_some_and(|n| summary.iterations >= n) {
                break;
            }
            if self.pause().await {
                break;
            }
        }

        self.shutdown(&summary).await;
        Ok(summary)
    }

    async fn startup(&self) -> Result<(), AgentError> {
        let correlation_id = CorrelationId::generate();
        let identity = self.config.identity();

        self.logger.emit(
            LogEvent::info(
                "system_startup",
                format!("Agent {} starting up", self.config.agent_name),
            )
            .with_meta("agent_type", self.config.agent_type.clone())
            .with_meta("version", env!("CARGO_PKG_VERSION"))
            .with_meta("environment", self.config.environment.clone())
            .with_correlation_id(correlation_id),
        );

        if !self.client.register(&identity).await {
            self.logger.emit(
                LogEvent::critical(
                    "agent_registration_failed_critical",
                    "Failed to register agent, exiting",
                )
                .with_correlation_id(correlation_id),
            );
            return Err(AgentError::Registration(self.config.agent_name.clone()));
        }

        if self.config.seed_tasks > 0 {
            seed_tasks(
                self.client.store().as_ref(),
                &self.logger,
                self.config.seed_tasks,
            )
            .await;
        }
        Ok(())
    }

    async fn iterate(&self, summary: &mut RunSummary) {
        let tasks = self.client.claimable(self.config.claim_batch).await;

        for listed in tasks {
            if self.shutdown_requested() {
                return;
            }
            let Some(task) = self
                .client
                .claim(listed.task_id, &self.config.agent_name)
                .await
            else {
                continue;
            };

            let outcome = self.processor.process(&task).await;
            summary.processed += 1;
            if outcome.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
    }

    fn heartbeat_due(&self, last: DateTime<Utc>) -> bool {
        let interval = TimeDelta::from_std(self.config.heartbeat_interval).unwrap_or(TimeDelta::MAX);
        self.clock.now() - last >= interval
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep `poll_interval`. Returns `true` if shutdown arrived first.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = self.sleeper.sleep(self.config.poll_interval) => false,
            _ = wait_for_shutdown(&mut self.shutdown_rx) => true,
        }
    }

    async fn shutdown(&self, summary: &RunSummary) {
        let mut event = LogEvent::info(
            "system_shutdown",
            format!("Agent {} shutting down", self.config.agent_name),
        )
        .with_meta("iterations", summary.iterations)
        .with_meta("processed", summary.processed)
        .with_meta("succeeded", summary.succeeded)
        .with_meta("failed", summary.failed)
        .with_correlation_id(CorrelationId::generate());

        if let Some(counts) = self.client.counts().await
            && let Ok(value) = serde_json::to_value(counts)
        {
            event = event.with_meta("task_counts", value);
        }
        self.logger.emit(event);
    }
}

/// Resolves once the flag is `true`. Never resolves if every sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Several agents run side by side, stopped together.
///
/// Dropping the group drops the sender; agents then keep running until their own limit.
pub struct AgentGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(String, JoinHandle<Result<RunSummary, AgentError>>)>,
    finished: Vec<(String, Result<RunSummary, AgentError>)>,
}

impl Default for AgentGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Receiver to hand to an agent built for this group.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn(&mut self, agent: AgentLoop, iterations: Option<u64>) {
        let name = agent.config.agent_name.clone();
        let join = tokio::spawn(async move {
            match iterations {
                Some(n) => agent.run_iterations(n).await,
                None => agent.run().await,
            }
        });
        self.joins.push((name, join));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new tasks. In-flight tasks finish first.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every agent; results keep spawn order.
    ///
    /// Cancel safe: agents already joined are kept for the next call.
    pub async fn join(&mut self) -> Vec<(String, Result<RunSummary, AgentError>)> {
        while let Some((_, join)) = self.joins.first_mut() {
            let result = match join.await {
                Ok(result) => result,
                Err(e) => Err(AgentError::Aborted(e.to_string())),
            };
            let (name, _) = self.joins.remove(0);
            self.finished.push((name, result));
        }
        std::mem::take(&mut self.finished)
    }

    pub async fn shutdown_and_join(mut self) -> Vec<(String, Result<RunSummary, AgentError>)> {
        self.request_shutdown();
        self.join().await
    }
}
