//! Producer/consumer operations over the shared task store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{QueueList, TaskStore};
use crate::task::spec::validate_batch;
use crate::task::{Task, TaskLease, TaskResult, TaskSpec, TaskStats, TaskStatus};

/// Handle to the shared queue, passed explicitly to producers, workers and the reaper.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Producer side ───────────────────────────────────────────────

    /// Create one PENDING task. On error nothing was enqueued.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<Uuid> {
        spec.validate()?;
        let task = spec.into_task(self.clock.now());
        let id = task.id;
        self.store.insert_tasks(std::slice::from_ref(&task)).await?;
        info!(
            task_id = %id,
            agent_id = %task.agent_id,
            trigger = ?task.trigger_type,
            "Task created"
        );
        Ok(id)
    }

    /// Create a batch of tasks as one unit: all are enqueued or none are.
    pub async fn create_tasks(&self, specs: Vec<TaskSpec>) -> Result<Vec<Uuid>> {
        validate_batch(&specs)?;
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let tasks: Vec<Task> = specs.into_iter().map(|spec| spec.into_task(now)).collect();
        self.store.insert_tasks(&tasks).await?;
        info!(count = tasks.len(), "Task batch created");
        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    // ── Read-only queries ───────────────────────────────────────────

    pub async fn get_task_status(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.store.get_task(id).await?)
    }

    pub async fn get_task_stats(&self) -> Result<TaskStats> {
        Ok(self.store.stats().await?)
    }

    /// Number of entries waiting in the pending list.
    pub async fn get_queue_size(&self) -> Result<usize> {
        Ok(self.store.list_len(QueueList::Pending).await?)
    }

    // ── Worker side ─────────────────────────────────────────────────

    /// Claim the oldest pending task for `agent_id` on behalf of `runtime_id`.
    pub async fn claim_next(&self, agent_id: &str, runtime_id: &str) -> Result<Option<Task>> {
        let lease = TaskLease {
            runtime_id: runtime_id.to_string(),
            claimed_at: self.clock.now(),
        };
        let claimed = self.store.claim_pending(agent_id, lease).await?;
        if let Some(ref task) = claimed {
            debug!(task_id = %task.id, agent_id, runtime_id, "Task claimed");
        }
        Ok(claimed)
    }

    /// Persist a non-terminal transition. False means the task was already
    /// finished elsewhere (typically reaped) and must be abandoned.
    pub async fn update_task(&self, task: &Task) -> Result<bool> {
        Ok(self.store.update_task(task).await?)
    }

    /// Persist a terminal transition. False means another party finished it first.
    pub async fn finish_task(&self, task: &Task) -> Result<bool> {
        Ok(self.store.finish_task(task).await?)
    }

    /// Give a claimed, not yet started task back to the pending list.
    pub async fn release_task(&self, task: &Task) -> Result<bool> {
        Ok(self.store.release_task(task).await?)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Time out every processing entry older than its declared timeout.
    ///
    /// Returns how many tasks this pass moved to the failed list.
    pub async fn cleanup_expired_tasks(&self) -> Result<usize> {
        let now = self.clock.now();
        let processing = self.store.processing_tasks().await?;
        let mut seen = HashSet::new();
        let mut reaped = 0;

        for task in processing {
            if !seen.insert(task.id) || !task.is_expired(now) {
                continue;
            }

            let mut expired = task;
            if let Err(e) = expired.transition_to(TaskStatus::Timeout, now) {
                warn!(task_id = %expired.id, error = %e, "Skipping expired task");
                continue;
            }
            let age_ms = expired.age_ms(now).max(0) as u64;
            let previous_output = expired.result.take().and_then(|r| r.output);
            expired.result = Some(TaskResult {
                output: previous_output,
                error: Some(format!(
                    "Task timed out after {}ms (limit {}ms)",
                    age_ms, expired.metadata.timeout
                )),
                duration_ms: age_ms,
            });

            if self.store.finish_task(&expired).await? {
                reaped += 1;
                info!(
                    task_id = %expired.id,
                    agent_id = %expired.agent_id,
                    age_ms,
                    timeout_ms = expired.metadata.timeout,
                    "Task timed out"
                );
            }
        }

        if reaped > 0 {
            info!(count = reaped, "Expired tasks cleaned up");
        }
        Ok(reaped)
    }

    /// Drop task records past their time-to-live.
    pub async fn purge_expired_records(&self) -> Result<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        if purged > 0 {
            info!(count = purged, "Purged expired task records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{Error, ValidationError};
    use crate::store::MemoryStore;
    use crate::task::TaskInput;

    fn setup() -> (TaskQueue, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = TaskQueue::new(store.clone(), clock.clone());
        (queue, store, clock)
    }

    fn spec(agent: &str) -> TaskSpec {
        TaskSpec::new(agent, "user-1", "api", TaskInput::prompt("do the thing"))
    }

    #[tokio::test]
    async fn create_task_enqueues_and_counts() {
        let (queue, _, _) = setup();
        let id = queue.create_task(spec("agent-a")).await.unwrap();

        let task = queue.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(queue.get_queue_size().await.unwrap(), 1);

        let stats = queue.get_task_stats().await.unwrap();
        assert_eq!((stats.total, stats.pending), (1, 1));
    }

    #[tokio::test]
    async fn invalid_spec_writes_nothing() {
        let (queue, _, _) = setup();
        let err = queue.create_task(spec("")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyField { .. })));
        assert_eq!(queue.get_task_stats().await.unwrap(), TaskStats::default());
    }

    #[tokio::test]
    async fn batch_yields_unique_ids_and_exact_counts() {
        let (queue, _, _) = setup();
        queue.create_task(spec("agent-a")).await.unwrap();
        let before = queue.get_task_stats().await.unwrap().total;

        let specs: Vec<TaskSpec> = (0..25).map(|_| spec("agent-a")).collect();
        let ids = queue.create_tasks(specs).await.unwrap();

        let unique: HashSet<Uuid> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 25);
        let stats = queue.get_task_stats().await.unwrap();
        assert_eq!(stats.total, before + 25);
        assert_eq!(queue.get_queue_size().await.unwrap(), 26);
    }

    #[tokio::test]
    async fn empty_batch_creates_nothing() {
        let (queue, store, _) = setup();
        store.set_available(false);
        assert_eq!(queue.create_tasks(Vec::new()).await.unwrap(), Vec::<Uuid>::new());

        store.set_available(true);
        assert_eq!(queue.get_task_stats().await.unwrap(), TaskStats::default());
        assert_eq!(queue.get_queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timeout_beyond_i64_range_is_never_reaped() {
        let (queue, _, clock) = setup();
        let id = queue
            .create_task(spec("agent-a").with_timeout(u64::MAX))
            .await
            .unwrap();
        queue.claim_next("agent-a", "rt-1").await.unwrap().unwrap();

        clock.advance(Duration::from_millis(1));
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 0);
        let task = queue.get_task_status(id).await.unwrap().unwrap();
        assert_ne!(task.status, TaskStatus::Timeout);
        assert_eq!(queue.get_task_stats().await.unwrap().processing, 1);
    }

    #[tokio::test]
    async fn batch_with_one_bad_spec_is_rejected_whole() {
        let (queue, _, _) = setup();
        let mut bad = spec("agent-a");
        bad.metadata.source = String::new();
        let err = queue
            .create_tasks(vec![spec("agent-a"), bad, spec("agent-a")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InBatch { index: 1, .. })
        ));
        assert_eq!(queue.get_queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_and_nothing_is_counted() {
        let (queue, store, _) = setup();
        store.set_available(false);
        let err = queue.create_task(spec("agent-a")).await.unwrap_err();
        assert!(err.is_store_unavailable());

        let err = queue
            .create_tasks(vec![spec("agent-a"), spec("agent-a")])
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());

        store.set_available(true);
        assert_eq!(queue.get_task_stats().await.unwrap(), TaskStats::default());
    }

    #[tokio::test]
    async fn unclaimed_processing_task_times_out_once() {
        let (queue, _, clock) = setup();
        let id = queue
            .create_task(spec("agent-a").with_timeout(5000))
            .await
            .unwrap();
        queue.claim_next("agent-a", "rt-1").await.unwrap().unwrap();
        let before = queue.get_task_stats().await.unwrap();

        clock.advance(Duration::from_millis(6000));
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 1);

        let after = queue.get_task_stats().await.unwrap();
        assert_eq!(after.failed, before.failed + 1);
        assert_eq!(after.processing, before.processing - 1);

        let task = queue.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(task.timestamps.completed_at, Some(clock.now()));
        assert!(task.last_error().unwrap().contains("timed out"));

        let failed = queue.store().list_members(QueueList::Failed).await.unwrap();
        assert_eq!(failed, vec![id]);

        // A second pass over the same data changes nothing.
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 0);
        assert_eq!(queue.get_task_stats().await.unwrap(), after);
    }

    #[tokio::test]
    async fn young_tasks_are_left_alone() {
        let (queue, _, clock) = setup();
        queue
            .create_task(spec("agent-a").with_timeout(5000))
            .await
            .unwrap();
        queue.claim_next("agent-a", "rt-1").await.unwrap();

        clock.advance(Duration::from_millis(5000));
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 0);
        assert_eq!(queue.get_task_stats().await.unwrap().processing, 1);
    }

    #[tokio::test]
    async fn pending_tasks_are_not_reaped() {
        let (queue, _, clock) = setup();
        queue
            .create_task(spec("agent-a").with_timeout(1000))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 0);
        assert_eq!(queue.get_queue_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reaped_task_cannot_be_finished_by_a_late_worker() {
        let (queue, _, clock) = setup();
        queue
            .create_task(spec("agent-a").with_timeout(1000))
            .await
            .unwrap();
        let mut claimed = queue.claim_next("agent-a", "rt-1").await.unwrap().unwrap();
        claimed.transition_to(TaskStatus::Running, clock.now()).unwrap();
        assert!(queue.update_task(&claimed).await.unwrap());

        clock.advance(Duration::from_secs(2));
        assert_eq!(queue.cleanup_expired_tasks().await.unwrap(), 1);

        claimed.transition_to(TaskStatus::Completed, clock.now()).unwrap();
        assert!(!queue.finish_task(&claimed).await.unwrap());
        let stored = queue.get_task_status(claimed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Timeout);
        assert_eq!(queue.get_task_stats().await.unwrap().completed, 0);
    }
}
