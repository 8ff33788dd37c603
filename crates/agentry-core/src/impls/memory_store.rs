//! In-memory task store.
//!
//! Design:
//! - One mutex around all state, so every port operation is a single critical section.
//!   That makes `claim` an atomic conditional update: two agents racing for the same
//!   task serialize on the lock and only the first sees it unowned.
//! - Tasks are keyed by ULID in a `BTreeMap`, so listing is roughly creation order
//!   (millisecond resolution, random within the same millisecond).
//! - History is append-only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    AgentIdentity, AgentRecord, AgentStatus, FailureKind, NewTask, Registration, StoreError,
    Task, TaskHistoryRecord, TaskId, TaskState,
};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskCounts, TaskStore, UlidGenerator};

#[derive(Default)]
struct InMemoryStoreState {
    /// Agents by unique name.
    agents: HashMap<String, AgentRecord>,

    /// Live task state.
    tasks: BTreeMap<TaskId, Task>,

    /// Terminal outcomes, in finalize order.
    history: Vec<TaskHistoryRecord>,
}

impl InMemoryStoreState {
    fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.values() {
            match task.state {
                TaskState::Queued => counts.queued += 1,
                TaskState::InProgress => counts.in_progress += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Transactional store held in process memory. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            clock,
            ids,
        }
    }

    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(&task_id).cloned()
    }

    pub async fn agent(&self, name: &str) -> Option<AgentRecord> {
        self.state.lock().await.agents.get(name).cloned()
    }

    pub async fn history(&self) -> Vec<TaskHistoryRecord> {
        self.state.lock().await.history.clone()
    }

    /// Mark an agent inactive (e.g. on clean shutdown). The row is kept.
    pub async fn deactivate(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let agent = state
            .agents
            .get_mut(name)
            .ok_or_else(|| StoreError::AgentNotFound(name.to_string()))?;
        agent.status = AgentStatus::Inactive;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn register_or_heartbeat(
        &self,
        agent: &AgentIdentity,
    ) -> Result<Registration, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.agents.get_mut(&agent.name) {
            existing.last_heartbeat = now;
            existing.status = AgentStatus::Active;
            return Ok(Registration::HeartbeatRefreshed);
        }

        state.agents.insert(
            agent.name.clone(),
            AgentRecord {
                identity: agent.clone(),
                status: AgentStatus::Active,
                last_heartbeat: now,
            },
        );
        Ok(Registration::Registered)
    }

    async fn heartbeat(&self, agent_name: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let agent = state
            .agents
            .get_mut(agent_name)
            .ok_or_else(|| StoreError::AgentNotFound(agent_name.to_string()))?;
        agent.last_heartbeat = now;
        Ok(())
    }

    async fn list_claimable(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.is_claimable())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim(&self, task_id: TaskId, agent_name: &str) -> Result<Option<Task>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if task.state.is_terminal() {
            return Ok(None);
        }
        match task.agent_name.as_deref() {
            None => {}
            Some(owner) if owner == agent_name => {}
            Some(_) => return Ok(None),
        }

        task.agent_name = Some(agent_name.to_string());
        task.state = TaskState::InProgress;
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn finalize(
        &self,
        task_id: TaskId,
        success: bool,
        failure_kind: Option<FailureKind>,
        failure_message: Option<String>,
    ) -> Result<TaskHistoryRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if task.state != TaskState::InProgress {
            return Err(StoreError::NotInProgress(task_id));
        }

        task.state = if success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        task.completed_at = Some(now);
        task.updated_at = now;

        let record = TaskHistoryRecord {
            task_id,
            task_type: task.task_type.clone(),
            agent_name: task.agent_name.clone(),
            state: task.state,
            priority: task.priority,
            created_at: task.created_at,
            completed_at: now,
            duration_ms: (now - task.created_at).num_milliseconds().max(0),
            success,
            error_type: if success { None } else { failure_kind },
            error_message: if success { None } else { failure_message },
            metadata: task.metadata.clone(),
        };
        state.history.push(record.clone());
        Ok(record)
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let task = Task {
            task_id: self.ids.generate_task_id(),
            task_type: new_task.task_type,
            priority: new_task.priority,
            metadata: new_task.metadata,
            state: TaskState::Queued,
            agent_name: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let mut state = self.state.lock().await;
        state.tasks.insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn counts(&self) -> Result<TaskCounts, StoreError> {
        Ok(self.state.lock().await.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::ports::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn agent(name: &str) -> AgentIdentity {
        AgentIdentity::new(name, "test_agent").with_capability("test_skill_1")
    }

    #[tokio::test]
    async fn register_then_heartbeat_is_idempotent_upsert() {
        let store = InMemoryTaskStore::new();

        let first = store.register_or_heartbeat(&agent("a1")).await.unwrap();
        assert_eq!(first, Registration::Registered);

        store.deactivate("a1").await.unwrap();
        let second = store.register_or_heartbeat(&agent("a1")).await.unwrap();
        assert_eq!(second, Registration::HeartbeatRefreshed);

        let record = store.agent("a1").await.unwrap();
        assert_eq!(record.status, AgentStatus::Active);
        assert_eq!(record.identity.capabilities, vec!["test_skill_1"]);
    }

    #[tokio::test]
    async fn heartbeat_moves_timestamp_and_rejects_unknown_agent() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryTaskStore::with_clock(clock.clone());
        store.register_or_heartbeat(&agent("a1")).await.unwrap();

        clock.advance(Duration::seconds(60));
        store.heartbeat("a1").await.unwrap();
        assert_eq!(
            store.agent("a1").await.unwrap().last_heartbeat,
            start + Duration::seconds(60)
        );

        let err = store.heartbeat("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::AgentNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn list_claimable_only_returns_queued_unowned_up_to_limit() {
        let store = InMemoryTaskStore::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(store.create_task(NewTask::new("research", Priority::Low)).await.unwrap().task_id);
        }
        store.claim(ids[0], "a1").await.unwrap().unwrap();

        let claimable = store.list_claimable(10).await.unwrap();
        assert_eq!(claimable.len(), 3);
        assert!(claimable.iter().all(|t| t.task_id != ids[0]));

        assert_eq!(store.list_claimable(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn claim_sets_owner_and_state() {
        let store = InMemoryTaskStore::new();
        let task = store.create_task(NewTask::new("editing", Priority::High)).await.unwrap();

        let claimed = store.claim(task.task_id, "a1").await.unwrap().unwrap();
        assert_eq!(claimed.state, TaskState::InProgress);
        assert_eq!(claimed.agent_name.as_deref(), Some("a1"));

        // same agent may re-claim, another may not
        assert!(store.claim(task.task_id, "a1").await.unwrap().is_some());
        assert!(store.claim(task.task_id, "a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_of_missing_or_finalized_task_is_none() {
        let store = InMemoryTaskStore::new();
        assert!(store.claim(TaskId::generate(), "a1").await.unwrap().is_none());

        let task = store.create_task(NewTask::new("editing", Priority::Low)).await.unwrap();
        store.claim(task.task_id, "a1").await.unwrap();
        store.finalize(task.task_id, true, None, None).await.unwrap();
        assert!(store.claim(task.task_id, "a1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = InMemoryTaskStore::new();
        let task_id = store
            .create_task(NewTask::new("research", Priority::High))
            .await
            .unwrap()
            .task_id;

        let mut joins = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let name = format!("agent_{i}");
            joins.push(tokio::spawn(async move {
                let won = store.claim(task_id, &name).await.unwrap();
                (name, won.is_some())
            }));
        }

        let mut winners = Vec::new();
        for j in joins {
            let (name, won) = j.await.unwrap();
            if won {
                winners.push(name);
            }
        }

        assert_eq!(winners.len(), 1);
        let owner = store.task(task_id).await.unwrap().agent_name;
        assert_eq!(owner.as_deref(), Some(winners[0].as_str()));
    }

    #[tokio::test]
    async fn finalize_appends_history_with_duration() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryTaskStore::with_clock(clock.clone());

        let task = store
            .create_task(NewTask::new("fact_checking", Priority::High).with_meta("topic", "Climate Change"))
            .await
            .unwrap();
        store.claim(task.task_id, "a1").await.unwrap();
        clock.advance(Duration::milliseconds(1_250));

        let record = store
            .finalize(
                task.task_id,
                false,
                Some(FailureKind::Permanent),
                Some("bad input".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(record.duration_ms, 1_250);
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.agent_name.as_deref(), Some("a1"));
        assert_eq!(record.error_type, Some(FailureKind::Permanent));
        assert_eq!(record.metadata["topic"], "Climate Change");
        assert_eq!(store.history().await, vec![record]);

        let stored = store.task(task.task_id).await.unwrap();
        assert_eq!(stored.completed_at, Some(start + Duration::milliseconds(1_250)));
    }

    #[tokio::test]
    async fn finalize_rejects_unknown_and_not_in_progress() {
        let store = InMemoryTaskStore::new();
        let err = store.finalize(TaskId::generate(), true, None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));

        let task = store.create_task(NewTask::new("editing", Priority::Low)).await.unwrap();
        let err = store.finalize(task.task_id, true, None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotInProgress(_)));
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn counts_by_state() {
        let store = InMemoryTaskStore::new();
        let a = store.create_task(NewTask::new("x", Priority::Low)).await.unwrap();
        let b = store.create_task(NewTask::new("x", Priority::Low)).await.unwrap();
        store.create_task(NewTask::new("x", Priority::Low)).await.unwrap();
        store.claim(a.task_id, "a1").await.unwrap();
        store.claim(b.task_id, "a1").await.unwrap();
        store.finalize(b.task_id, true, None, None).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            TaskCounts {
                queued: 1,
                in_progress: 1,
                completed: 1,
                failed: 0
            }
        );
    }
}
