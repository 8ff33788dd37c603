//! Demo task seeding.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::domain::{CorrelationId, NewTask, Priority, Task};
use crate::observability::{EventLogger, FailureContext, LogEvent};
use crate::ports::TaskStore;

pub const SEED_TASK_TYPES: [&str; 4] = ["research", "content_generation", "editing", "fact_checking"];

const TOPICS: [&str; 4] = [
    "Artificial Intelligence",
    "Climate Change",
    "Space Exploration",
    "Quantum Computing",
];

/// A random demo task tagged with the batch it belongs to.
pub fn random_task(batch: CorrelationId) -> NewTask {
    let mut rng = rand::thread_rng();
    let task_type = SEED_TASK_TYPES.choose(&mut rng).copied().unwrap_or("research");
    let priority = Priority::ALL.choose(&mut rng).copied().unwrap_or(Priority::Medium);
    let topic = TOPICS.choose(&mut rng).copied().unwrap_or(TOPICS[0]);

    NewTask::new(task_type, priority)
        .with_meta("topic", topic)
        .with_meta("complexity", rng.gen_range(1..=5))
        .with_meta("batch_correlation_id", batch.to_string())
}

/// Create `count` queued demo tasks. Stops at the first store failure and returns what was created.
pub async fn seed_tasks(store: &dyn TaskStore, logger: &EventLogger, count: usize) -> Vec<Task> {
    let batch = CorrelationId::generate();
    let mut created = Vec::with_capacity(count);

    for _ in 0..count {
        match store.create_task(random_task(batch)).await {
            Ok(task) => {
                logger.emit(
                    LogEvent::info("test_task_created", format!("Created test task {}", task.task_id))
                        .with_meta("task_id", task.task_id.to_string())
                        .with_meta("task_type", task.task_type.as_str())
                        .with_meta("priority", task.priority.as_str())
                        .with_metadata(task.metadata.clone())
                        .with_correlation_id(task.task_id),
                );
                created.push(task);
            }
            Err(e) => {
                logger.emit(
                    LogEvent::error("create_test_tasks_failed", format!("Failed to create test tasks: {e}"))
                        .with_meta("created", created.len())
                        .with_meta("error", e.to_string())
                        .with_correlation_id(batch)
                        .with_failure(FailureContext::from_error("StoreError", &e)),
                );
                return created;
            }
        }
    }

    logger.emit(
        LogEvent::info("test_tasks_batch_created", format!("Finished creating {count} test tasks."))
            .with_meta("num_tasks", count)
            .with_correlation_id(batch),
    );
    created
}
