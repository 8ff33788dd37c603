//! TaskProcessor - リトライ付きのタスク処理ステートマシン
//!
//! # 状態遷移
//! ```text
//! Start → Executing → Succeeded        → Finalized
//!                   → RetryWait → Executing（Transient かつ残りリトライあり）
//!                   → PermanentFailed  → Finalized
//!                   → UnexpectedFailed → Finalized
//! ```
//!
//! # 不変条件
//! - active_tasks ゲージは 1 タスクにつき +1 / -1 をちょうど 1 回ずつ（ガードで保証）
//! - 実行 1 回ごとにレイテンシを 1 サンプル
//! - Transient は `retry_count <= max_retries` の間だけ待ってから再実行
//! - Permanent / Unexpected は待たずに即 finalize

use std::any::Any;
use std::sync::Arc;

use crate::domain::{
    FailureKind, PanicError, ProcessOutcome, ProcessResult, RetryPolicy, Task, TaskError,
};
use crate::observability::{ActiveTaskGuard, EventLogger, FailureContext, LatencyTimer, LogEvent};
use crate::ports::{MetricsRecorder, Sleeper, TaskExecutor};

use super::client::TaskStoreClient;

pub struct TaskProcessor {
    client: TaskStoreClient,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<dyn MetricsRecorder>,
    logger: Arc<EventLogger>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    agent_type: String,
}

impl TaskProcessor {
    pub fn new(
        client: TaskStoreClient,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<dyn MetricsRecorder>,
        logger: Arc<EventLogger>,
        sleeper: Arc<dyn Sleeper>,
        retry: RetryPolicy,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            executor,
            metrics,
            logger,
            sleeper,
            retry,
            agent_type: agent_type.into(),
        }
    }

    /// Run a claimed task to a terminal state and finalize it in the store.
    pub async fn process(&self, task: &Task) -> ProcessOutcome {
        let _active = ActiveTaskGuard::acquire(self.metrics.as_ref(), self.agent_type.clone());

        self.logger.emit(
            LogEvent::info("task_processing", format!("Processing task {}", task.task_id))
                .with_meta("task_id", task.task_id.to_string())
                .with_meta("task_type", task.task_type.as_str())
                .with_meta("priority", task.priority.as_str())
                .with_correlation_id(task.task_id),
        );
        self.metrics.record_dispatch(&task.task_type);

        let mut retry_count = 0u32;
        let mut attempts = 0u32;
        let (result, finalized) = loop {
            attempts += 1;

            let timer = LatencyTimer::start(self.metrics.as_ref(), &task.task_type);
            let executed = self.execute_once(task).await;
            timer.stop();

            let Err(err) = executed else {
                break (ProcessResult::Succeeded, self.on_success(task, attempts).await);
            };

            let kind = err.kind();
            self.metrics.record_error(kind);

            let finalized = match kind {
                FailureKind::Transient => {
                    retry_count += 1;
                    if self.retry.allows(retry_count) {
                        let backoff = self.retry.backoff(retry_count);
                        self.logger.emit(
                            LogEvent::warning(
                                "transient_error_retry",
                                format!(
                                    "Transient error, retrying ({retry_count}/{}): {err}",
                                    self.retry.max_retries
                                ),
                            )
                            .with_meta("task_id", task.task_id.to_string())
                            .with_meta("retry_count", retry_count)
                            .with_meta("max_retries", self.retry.max_retries)
                            .with_meta("backoff_secs", backoff.as_secs_f64())
                            .with_meta("error", err.to_string())
                            .with_correlation_id(task.task_id),
                        );
                        self.sleeper.sleep(backoff).await;
                        continue;
                    }
                    self.on_retries_exhausted(task, &err, attempts).await
                }
                FailureKind::Permanent => self.on_permanent(task, &err, attempts).await,
                FailureKind::Unexpected => self.on_unexpected(task, &err, attempts).await,
            };
            break (ProcessResult::Failed(kind), finalized);
        };

        ProcessOutcome {
            task_id: task.task_id,
            attempts,
            result,
            finalized,
        }
    }

    /// One attempt on its own tokio task, so a panic comes back as a `JoinError`.
    async fn execute_once(&self, task: &Task) -> Result<(), TaskError> {
        let executor = self.executor.clone();
        let owned = task.clone();
        match tokio::spawn(async move { executor.execute(&owned).await }).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                Err(TaskError::unexpected(PanicError(panic_message(join.into_panic()))))
            }
            Err(join) => Err(TaskError::unexpected(PanicError(join.to_string()))),
        }
    }

    async fn on_success(&self, task: &Task, attempts: u32) -> bool {
        let record = self.client.finalize(task.task_id, true, None, None).await;

        let mut event = LogEvent::info("task_completed", format!("Task {} completed", task.task_id))
            .with_meta("task_id", task.task_id.to_string())
            .with_meta("task_type", task.task_type.as_str())
            .with_meta("attempts", attempts)
            .with_correlation_id(task.task_id);
        if let Some(record) = &record {
            event = event.with_meta("duration_ms", record.duration_ms);
        }
        self.logger.emit(event);

        record.is_some()
    }

    async fn on_retries_exhausted(&self, task: &Task, err: &TaskError, attempts: u32) -> bool {
        let message = format!("Max retries exceeded: {err}");
        self.logger.emit(
            LogEvent::error(
                "max_retries_exceeded",
                format!("Task {} failed after {} retries: {err}", task.task_id, self.retry.max_retries),
            )
            .with_meta("task_id", task.task_id.to_string())
            .with_meta("task_type", task.task_type.as_str())
            .with_meta("attempts", attempts)
            .with_meta("max_retries", self.retry.max_retries)
            .with_correlation_id(task.task_id)
            .with_failure(FailureContext::from_task_error(err)),
        );
        self.client
            .finalize(task.task_id, false, Some(FailureKind::Transient), Some(message))
            .await
            .is_some()
    }

    async fn on_permanent(&self, task: &Task, err: &TaskError, attempts: u32) -> bool {
        self.logger.emit(
            LogEvent::error("permanent_error", format!("Permanent error in task {}: {err}", task.task_id))
                .with_meta("task_id", task.task_id.to_string())
                .with_meta("task_type", task.task_type.as_str())
                .with_meta("attempts", attempts)
                .with_correlation_id(task.task_id)
                .with_failure(FailureContext::from_task_error(err)),
        );
        self.client
            .finalize(task.task_id, false, Some(FailureKind::Permanent), Some(err.to_string()))
            .await
            .is_some()
    }

    async fn on_unexpected(&self, task: &Task, err: &TaskError, attempts: u32) -> bool {
        self.logger.emit(
            LogEvent::critical(
                "unexpected_error",
                format!("Unexpected error in task {}: {err}", task.task_id),
            )
            .with_meta("task_id", task.task_id.to_string())
            .with_meta("task_type", task.task_type.as_str())
            .with_meta("attempts", attempts)
            .with_correlation_id(task.task_id)
            .with_failure(FailureContext::from_task_error(err)),
        );
        self.client
            .finalize(task.task_id, false, Some(FailureKind::Unexpected), Some(err.to_string()))
            .await
            .is_some()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::client::tests::FailingStore;
    use crate::domain::{NewTask, Priority, TaskState};
    use crate::impls::{InMemoryMetrics, InMemoryTaskStore, MemorySink};
    use crate::observability::Severity;
    use crate::ports::TaskStore;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requested durations and returns immediately.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Step {
        Ok,
        Transient,
        Permanent,
        Io,
        Panic,
    }

    /// Plays back a fixed script of results; repeats the last step once exhausted.
    pub(crate) struct ScriptedExecutor {
        steps: Mutex<VecDeque<Step>>,
        last: Step,
        calls: Mutex<u32>,
    }

    impl ScriptedExecutor {
        pub(crate) fn new(steps: &[Step]) -> Self {
            Self {
                steps: Mutex::new(steps.iter().copied().collect()),
                last: steps.last().copied().unwrap_or(Step::Ok),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn always(step: Step) -> Self {
            Self::new(&[step])
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, _task: &Task) -> Result<(), TaskError> {
            *self.calls.lock().unwrap() += 1;
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(self.last);
            match step {
                Step::Ok => Ok(()),
                Step::Transient => Err(TaskError::transient("socket timeout")),
                Step::Permanent => Err(TaskError::permanent("invalid input")),
                Step::Io => Err(TaskError::unexpected(std::io::Error::other("disk gone"))),
                Step::Panic => panic!("executor blew up"),
            }
        }
    }

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        metrics: Arc<InMemoryMetrics>,
        sink: Arc<MemorySink>,
        sleeper: Arc<RecordingSleeper>,
        executor: Arc<ScriptedExecutor>,
        processor: TaskProcessor,
    }

    fn harness_with(store: Arc<dyn TaskStore>, inmem: Arc<InMemoryTaskStore>, executor: ScriptedExecutor) -> Harness {
        harness_with_policy(store, inmem, executor, RetryPolicy::default())
    }

    fn harness_with_policy(
        store: Arc<dyn TaskStore>,
        inmem: Arc<InMemoryTaskStore>,
        executor: ScriptedExecutor,
        retry: RetryPolicy,
    ) -> Harness {
        let metrics = Arc::new(InMemoryMetrics::new());
        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(EventLogger::new("test_agent_1", Severity::Debug, sink.clone()));
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = Arc::new(executor);
        let processor = TaskProcessor::new(
            TaskStoreClient::new(store, logger.clone()),
            executor.clone(),
            metrics.clone(),
            logger,
            sleeper.clone(),
            retry,
            "test_agent",
        );
        Harness {
            store: inmem,
            metrics,
            sink,
            sleeper,
            executor,
            processor,
        }
    }

    fn harness(executor: ScriptedExecutor) -> Harness {
        let store = Arc::new(InMemoryTaskStore::new());
        harness_with(store.clone(), store, executor)
    }

    async fn claimed(h: &Harness, task_type: &str, priority: Priority) -> Task {
        let task = h
            .store
            .create_task(NewTask::new(task_type, priority))
            .await
            .unwrap();
        h.store.claim(task.task_id, "test_agent_1").await.unwrap().unwrap()
    }

    fn count(h: &Harness, severity: Severity) -> usize {
        h.sink.records().iter().filter(|r| r.severity == severity).count()
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let h = harness(ScriptedExecutor::always(Step::Ok));
        let task = claimed(&h, "research", Priority::Medium).await;

        let outcome = h.processor.process(&task).await;

        assert!(outcome.is_success());
        assert!(outcome.finalized);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(h.metrics.dispatches("research"), 1);
        assert_eq!(h.metrics.latencies("research").len(), 1);
        assert_eq!(
            h.metrics.active_adjustments(),
            vec![("test_agent".to_string(), 1), ("test_agent".to_string(), -1)]
        );

        let completed = h.sink.records_of("task_completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].severity, Severity::Info);
        assert!(completed[0].exception().is_none());
        assert!(completed[0].metadata.contains_key("duration_ms"));
        assert_eq!(count(&h, Severity::Warning), 0);
        assert_eq!(count(&h, Severity::Error), 0);

        let stored = h.store.task(task.task_id).await.unwrap();
        assert_eq!(stored.state, TaskState::Completed);
        assert!(h.sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_back_off_then_fail() {
        let h = harness(ScriptedExecutor::always(Step::Transient));
        let task = claimed(&h, "editing", Priority::Low).await;

        let outcome = h.processor.process(&task).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(outcome.attempts, 4);
        assert_eq!(h.executor.calls(), 4);
        assert_eq!(
            h.sleeper.slept(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );

        let warnings = h.sink.records_of("transient_error_retry");
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.severity == Severity::Warning && w.exception().is_none()));
        assert_eq!(warnings[2].metadata["retry_count"], 3);

        let exceeded = h.sink.records_of("max_retries_exceeded");
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].severity, Severity::Error);
        assert!(exceeded[0].exception().is_some());

        let history = h.store.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].error_type, Some(FailureKind::Transient));
        assert!(history[0].error_message.as_deref().unwrap().starts_with("Max retries exceeded"));
        assert_eq!(h.metrics.errors(FailureKind::Transient), 4);
        assert_eq!(h.metrics.latencies("editing").len(), 4);
        assert_eq!(h.metrics.dispatches("editing"), 1);
    }

    #[rstest]
    #[case::no_retries(0, vec![])]
    #[case::one_retry(1, vec![1])]
    #[case::capped_backoff(5, vec![1, 2, 4, 8, 10])]
    #[tokio::test]
    async fn warnings_follow_configured_max_retries(#[case] max_retries: u32, #[case] sleeps: Vec<u64>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let retry = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        let h = harness_with_policy(store.clone(), store, ScriptedExecutor::always(Step::Transient), retry);
        let task = claimed(&h, "research", Priority::Medium).await;

        let outcome = h.processor.process(&task).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(outcome.attempts, max_retries + 1);
        assert_eq!(h.executor.calls(), max_retries + 1);
        assert_eq!(count(&h, Severity::Warning), max_retries as usize);
        assert_eq!(h.sink.records_of("transient_error_retry").len(), max_retries as usize);
        assert_eq!(h.sink.records_of("max_retries_exceeded").len(), 1);
        assert_eq!(count(&h, Severity::Error), 1);
        let expected: Vec<_> = sleeps.into_iter().map(Duration::from_secs).collect();
        assert_eq!(h.sleeper.slept(), expected);
    }

    #[tokio::test]
    async fn transient_then_success() {
        let h = harness(ScriptedExecutor::new(&[Step::Transient, Step::Transient, Step::Ok]));
        let task = claimed(&h, "research", Priority::High).await;

        let outcome = h.processor.process(&task).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(h.sleeper.slept(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(h.sink.records_of("transient_error_retry").len(), 2);
        assert_eq!(h.sink.records_of("task_completed")[0].metadata["attempts"], 3);
    }

    #[tokio::test]
    async fn high_priority_permanent_fault() {
        let h = harness(ScriptedExecutor::always(Step::Permanent));
        let task = claimed(&h, "fact_checking", Priority::High).await;

        let outcome = h.processor.process(&task).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Permanent));
        assert_eq!(outcome.attempts, 1);
        assert!(h.sleeper.slept().is_empty());

        let errors: Vec<_> = h
            .sink
            .records()
            .into_iter()
            .filter(|r| r.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_type, "permanent_error");
        assert_eq!(errors[0].exception().unwrap().kind, "PermanentError");

        let history = h.store.history().await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].error_type, Some(FailureKind::Permanent));
        assert_eq!(history[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn unexpected_error_is_critical() {
        let h = harness(ScriptedExecutor::always(Step::Io));
        let task = claimed(&h, "research", Priority::Medium).await;

        let outcome = h.processor.process(&task).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unexpected));
        let critical = h.sink.records_of("unexpected_error");
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, Severity::Critical);
        assert!(h.sleeper.slept().is_empty());
        assert_eq!(h.store.history().await[0].error_type, Some(FailureKind::Unexpected));
    }

    #[tokio::test]
    async fn panic_is_classified_unexpected() {
        let h = harness(ScriptedExecutor::always(Step::Panic));
        let task = claimed(&h, "research", Priority::Medium).await;

        let outcome = h.processor.process(&task).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unexpected));
        assert!(outcome.finalized);
        let exc = h.sink.records_of("unexpected_error")[0].exception().unwrap();
        assert_eq!(exc.kind, "PanicError");
        assert!(exc.message.contains("executor blew up"));
        assert_eq!(h.metrics.active("test_agent"), 0);
    }

    #[tokio::test]
    async fn gauge_balances_over_mixed_outcomes() {
        let h = harness(ScriptedExecutor::new(&[
            Step::Ok,
            Step::Transient,
            Step::Transient,
            Step::Transient,
            Step::Transient,
            Step::Permanent,
            Step::Io,
            Step::Panic,
        ]));

        let mut kinds = Vec::new();
        for _ in 0..5 {
            let task = claimed(&h, "research", Priority::Low).await;
            let outcome = h.processor.process(&task).await;
            kinds.push(outcome.failure_kind());
            assert_eq!(h.metrics.active_net(), 0);
        }

        assert_eq!(
            kinds,
            vec![
                None,
                Some(FailureKind::Transient),
                Some(FailureKind::Permanent),
                Some(FailureKind::Unexpected),
                Some(FailureKind::Unexpected),
            ]
        );
        assert_eq!(h.executor.calls(), 8);
        assert_eq!(h.metrics.active_adjustments().len(), 10);
        assert_eq!(h.metrics.active_net(), 0);
        assert_eq!(h.metrics.active("test_agent"), 0);
    }

    #[tokio::test]
    async fn finalize_failure_is_reported_not_retried() {
        let inmem = Arc::new(InMemoryTaskStore::new());
        let h = harness_with(Arc::new(FailingStore), inmem, ScriptedExecutor::always(Step::Ok));
        let task = claimed(&h, "research", Priority::Low).await;

        let outcome = h.processor.process(&task).await;

        assert!(outcome.is_success());
        assert!(!outcome.finalized);
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.sink.records_of("complete_task_failed").len(), 1);
        let completed = h.sink.records_of("task_completed");
        assert!(!completed[0].metadata.contains_key("duration_ms"));
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
