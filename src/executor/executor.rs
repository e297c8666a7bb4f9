//! Per-worker task executor: admission, concurrency ceiling, retries.
//!
//! All admission and running-set bookkeeping happens under one std mutex that
//! is never held across an await. Task attempts run on spawned tokio tasks and
//! retries are re-armed by spawned timers, so nothing on the control path
//! sleeps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::AgentDefinition;
use crate::error::{ExecutionError, ExecutorError, LlmError};
use crate::executor::events::{AgentStatus, ExecutorEvent, ExecutorStats};
use crate::executor::prompt::build_request;
use crate::llm::LlmProvider;
use crate::queue::TaskQueue;
use crate::registry::PerformanceCounters;
use crate::task::{Task, TaskOutput, TaskResult, TaskStatus, ToolCallResult};
use crate::tools::{ToolInvocation, ToolInvoker};

/// Base delay for linear retry backoff: retry `n` waits `n` times this.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Collaborators an executor needs.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub queue: Arc<TaskQueue>,
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<dyn ToolInvoker>,
}

/// What `add_task` did with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// A slot was free; the task is running.
    Started,
    /// All slots busy; the task waits in the local queue.
    Queued,
    /// The executor is offline; the caller still owns the task.
    Rejected,
}

#[derive(Debug, Default)]
struct Metrics {
    total: u64,
    completed: u64,
    failed: u64,
    completed_duration_ms: u64,
}

struct ExecState {
    definition: AgentDefinition,
    status: AgentStatus,
    queue: VecDeque<Task>,
    running: HashSet<Uuid>,
    /// Re-armed tasks waiting out their backoff delay.
    backoff: HashMap<Uuid, (Task, AbortHandle)>,
    metrics: Metrics,
}

impl ExecState {
    /// Move queued tasks into free slots. Returns the tasks to spawn.
    fn fill_slots(&mut self) -> Vec<Task> {
        let mut started = Vec::new();
        if self.status == AgentStatus::Offline {
            return started;
        }
        while self.running.len() < self.definition.concurrency_limit() {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            self.running.insert(task.id);
            started.push(task);
        }
        started
    }

    /// Recompute IDLE/BUSY. Returns the previous status if it changed.
    fn settle_status(&mut self) -> Option<AgentStatus> {
        if self.status == AgentStatus::Offline {
            return None;
        }
        let next = if self.running.is_empty() && self.queue.is_empty() {
            AgentStatus::Idle
        } else {
            AgentStatus::Busy
        };
        let prev = std::mem::replace(&mut self.status, next);
        (prev != next).then_some(prev)
    }
}

struct Inner {
    agent_id: String,
    deps: ExecutorDeps,
    state: Mutex<ExecState>,
    events: broadcast::Sender<ExecutorEvent>,
    running_tx: watch::Sender<usize>,
    retry_base: Duration,
}

/// Runs tasks for one agent. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentExecutor {
    inner: Arc<Inner>,
}

impl AgentExecutor {
    pub fn new(definition: AgentDefinition, deps: ExecutorDeps) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (running_tx, _running_rx) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                agent_id: definition.agent_id.clone(),
                deps,
                state: Mutex::new(ExecState {
                    definition,
                    status: AgentStatus::Idle,
                    queue: VecDeque::new(),
                    running: HashSet::new(),
                    backoff: HashMap::new(),
                    metrics: Metrics::default(),
                }),
                events,
                running_tx,
                retry_base: RETRY_BASE_DELAY,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ExecutorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn emit_status(&self, from: Option<AgentStatus>, to: AgentStatus) {
        if let Some(from) = from {
            info!(agent_id = %self.inner.agent_id, %from, %to, "Executor status changed");
            self.emit(ExecutorEvent::StatusChanged { from, to });
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> AgentStatus {
        self.lock().status
    }

    pub fn definition(&self) -> AgentDefinition {
        self.lock().definition.clone()
    }

    /// True while another claimed task could be started or queued without
    /// growing the local queue past the concurrency ceiling.
    pub fn has_capacity(&self) -> bool {
        let state = self.lock();
        state.status != AgentStatus::Offline
            && state.running.len() + state.queue.len() < state.definition.concurrency_limit()
    }

    pub fn get_task_stats(&self) -> ExecutorStats {
        let state = self.lock();
        ExecutorStats {
            queued: state.queue.len(),
            running: state.running.len(),
            total: state.metrics.total,
            completed: state.metrics.completed,
            failed: state.metrics.failed,
        }
    }

    /// Counters in the shape the registry stores on each heartbeat.
    pub fn metrics(&self) -> PerformanceCounters {
        let state = self.lock();
        let m = &state.metrics;
        PerformanceCounters {
            total_tasks: m.total,
            completed_tasks: m.completed,
            failed_tasks: m.failed,
            average_execution_time_ms: if m.completed == 0 {
                0.0
            } else {
                m.completed_duration_ms as f64 / m.completed as f64
            },
        }
    }

    /// Admit a claimed task.
    pub fn add_task(&self, task: Task) -> Result<AdmitOutcome, ExecutorError> {
        if task.agent_id != self.inner.agent_id {
            return Err(ExecutorError::WrongAgent {
                id: task.id,
                task_agent: task.agent_id,
                agent_id: self.inner.agent_id.clone(),
            });
        }
        Ok(self.admit(task, true))
    }

    fn admit(&self, task: Task, fresh: bool) -> AdmitOutcome {
        let task_id = task.id;
        let mut state = self.lock();
        if state.status == AgentStatus::Offline {
            debug!(task_id = %task_id, agent_id = %self.inner.agent_id, "Executor offline, task rejected");
            return AdmitOutcome::Rejected;
        }
        if fresh {
            state.metrics.total += 1;
        }

        if state.running.len() < state.definition.concurrency_limit() {
            state.running.insert(task_id);
            let changed = state.settle_status();
            self.inner.running_tx.send_replace(state.running.len());
            drop(state);

            self.emit_status(changed, AgentStatus::Busy);
            self.spawn_attempt(task);
            AdmitOutcome::Started
        } else {
            state.queue.push_back(task);
            let queue_len = state.queue.len();
            drop(state);

            debug!(task_id = %task_id, queue_len, "Task queued locally");
            self.emit(ExecutorEvent::TaskQueued { task_id, queue_len });
            AdmitOutcome::Queued
        }
    }

    fn spawn_attempt(&self, task: Task) {
        let executor = self.clone();
        tokio::spawn(async move {
            let task_id = task.id;
            executor.run_attempt(task).await;
            executor.release_slot(task_id);
        });
    }

    /// Free the slot held by `task_id` and admit whatever fits.
    fn release_slot(&self, task_id: Uuid) {
        let mut state = self.lock();
        state.running.remove(&task_id);
        let started = state.fill_slots();
        let changed = state.settle_status();
        let to = state.status;
        self.inner.running_tx.send_replace(state.running.len());
        drop(state);

        self.emit_status(changed, to);
        for task in started {
            self.spawn_attempt(task);
        }
    }

    /// Replace the agent definition. A raised ceiling admits queued tasks immediately.
    pub fn apply_definition(&self, definition: AgentDefinition) -> Result<(), ExecutorError> {
        if definition.agent_id != self.inner.agent_id {
            return Err(ExecutorError::DefinitionMismatch {
                expected: self.inner.agent_id.clone(),
                got: definition.agent_id,
            });
        }

        let mut state = self.lock();
        let ceiling = definition.concurrency_limit();
        state.definition = definition;
        let started = state.fill_slots();
        let changed = state.settle_status();
        let to = state.status;
        self.inner.running_tx.send_replace(state.running.len());
        drop(state);

        info!(agent_id = %self.inner.agent_id, max_concurrent_tasks = ceiling, "Agent definition applied");
        self.emit_status(changed, to);
        for task in started {
            self.spawn_attempt(task);
        }
        Ok(())
    }

    /// Go offline, hand locally queued tasks and pending retries back to the
    /// shared queue, and wait until every running attempt has finished.
    /// In-flight calls are not cancelled.
    pub async fn stop(&self) {
        let (drained, from) = {
            let mut state = self.lock();
            let from = std::mem::replace(&mut state.status, AgentStatus::Offline);
            let mut drained: Vec<Task> = state.queue.drain(..).collect();
            for (_, (task, timer)) in state.backoff.drain() {
                timer.abort();
                drained.push(task);
            }
            (drained, from)
        };
        if from != AgentStatus::Offline {
            self.emit_status(Some(from), AgentStatus::Offline);
        }

        for task in drained {
            self.hand_back(&task).await;
        }

        let mut running = self.inner.running_tx.subscribe();
        // The sender lives in `self`, so this only ends when the count hits zero.
        let _ = running.wait_for(|n| *n == 0).await;
        info!(agent_id = %self.inner.agent_id, "Executor stopped");
    }

    async fn hand_back(&self, task: &Task) {
        match self.inner.deps.queue.release_task(task).await {
            Ok(true) => debug!(task_id = %task.id, "Task released to shared queue"),
            Ok(false) => debug!(task_id = %task.id, "Task no longer claimed, nothing to release"),
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to release task"),
        }
    }

    /// One attempt, start to terminal state or re-arm.
    async fn run_attempt(&self, mut task: Task) {
        let queue = &self.inner.deps.queue;

        if let Err(e) = task.transition_to(TaskStatus::Running, queue.now()) {
            warn!(task_id = %task.id, error = %e, "Task cannot start");
            return;
        }
        match queue.update_task(&task).await {
            Ok(true) => {}
            Ok(false) => {
                info!(task_id = %task.id, "Task already finished elsewhere, abandoning");
                return;
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to persist running status"),
        }

        let attempt = task.metadata.retry_count + 1;
        info!(task_id = %task.id, agent_id = %task.agent_id, attempt, "Task started");
        self.emit(ExecutorEvent::TaskStarted {
            task_id: task.id,
            attempt,
        });

        let definition = self.definition();
        let started = tokio::time::Instant::now();
        let outcome = self.execute(&definition, &task).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => self.complete(task, output, duration_ms).await,
            Err(e) if task.has_retries_left() => self.rearm(task, e, duration_ms).await,
            Err(e) => self.fail(task, e, duration_ms).await,
        }
    }

    /// Model call followed by each requested tool call, in order.
    async fn execute(
        &self,
        definition: &AgentDefinition,
        task: &Task,
    ) -> Result<TaskOutput, ExecutionError> {
        let deps = &self.inner.deps;
        let limit = Duration::from_millis(definition.timeout_ms);
        let request = build_request(definition, &task.input);
        let response = tokio::time::timeout(limit, deps.llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: deps.llm.name().to_string(),
                after: limit,
            })??;

        let mut tool_results = Vec::with_capacity(response.tool_calls.len());
        for call in response.tool_calls {
            let binding = definition.tool_binding(&call.name);
            let tool_id = binding
                .map(|b| b.tool_id.clone())
                .unwrap_or_else(|| call.name.clone());
            let timeout_ms = binding
                .and_then(|b| b.timeout_ms)
                .unwrap_or(definition.timeout_ms);

            let result = deps
                .tools
                .invoke(ToolInvocation {
                    tool_id: tool_id.clone(),
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                    timeout: Duration::from_millis(timeout_ms),
                })
                .await?;

            if let Some(ref err) = result.error {
                debug!(task_id = %task.id, tool = %call.name, error = %err, "Tool reported an error");
            }
            tool_results.push(ToolCallResult {
                tool_id,
                tool_name: call.name,
                input: call.input,
                output: result.output,
                error: result.error,
                duration_ms: result.duration.as_millis() as u64,
                timestamp: deps.queue.now(),
            });
        }

        Ok(TaskOutput {
            response: response.content,
            tool_results,
        })
    }

    async fn complete(&self, mut task: Task, output: TaskOutput, duration_ms: u64) {
        let queue = &self.inner.deps.queue;
        if let Err(e) = task.transition_to(TaskStatus::Completed, queue.now()) {
            warn!(task_id = %task.id, error = %e, "Cannot complete task");
            return;
        }
        task.result = Some(TaskResult {
            output: Some(output),
            error: None,
            duration_ms,
        });

        match queue.finish_task(&task).await {
            Ok(true) => {
                let mut state = self.lock();
                state.metrics.completed += 1;
                state.metrics.completed_duration_ms += duration_ms;
            }
            Ok(false) => {
                info!(task_id = %task.id, "Task was finished elsewhere before completion");
                return;
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to persist completion"),
        }
        info!(task_id = %task.id, duration_ms, "Task completed");
        self.emit(ExecutorEvent::TaskCompleted {
            task_id: task.id,
            duration_ms,
        });
    }

    async fn fail(&self, mut task: Task, error: ExecutionError, duration_ms: u64) {
        let queue = &self.inner.deps.queue;
        let message = error.to_string();
        if let Err(e) = task.transition_to(TaskStatus::Failed, queue.now()) {
            warn!(task_id = %task.id, error = %e, "Cannot fail task");
            return;
        }
        task.result = Some(TaskResult {
            output: None,
            error: Some(message.clone()),
            duration_ms,
        });

        match queue.finish_task(&task).await {
            Ok(true) => self.lock().metrics.failed += 1,
            Ok(false) => {
                info!(task_id = %task.id, "Task was finished elsewhere before failure");
                return;
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to persist failure"),
        }
        warn!(
            task_id = %task.id,
            retry_count = task.metadata.retry_count,
            error = %message,
            "Task failed"
        );
        self.emit(ExecutorEvent::TaskFailed {
            task_id: task.id,
            error: message,
        });
    }

    /// Record the failure, move back to PENDING and schedule the next attempt.
    async fn rearm(&self, mut task: Task, error: ExecutionError, duration_ms: u64) {
        let queue = &self.inner.deps.queue;
        let message = error.to_string();
        if let Err(e) = task.transition_to(TaskStatus::Pending, queue.now()) {
            warn!(task_id = %task.id, error = %e, "Cannot re-arm task");
            return;
        }
        task.metadata.retry_count += 1;
        task.result = Some(TaskResult {
            output: None,
            error: Some(message.clone()),
            duration_ms,
        });

        match queue.update_task(&task).await {
            Ok(true) => {}
            Ok(false) => {
                info!(task_id = %task.id, "Task finished elsewhere, not retrying");
                return;
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to persist retry state"),
        }

        let retry_count = task.metadata.retry_count;
        let delay = self.inner.retry_base * retry_count;
        let delay_ms = delay.as_millis() as u64;
        warn!(task_id = %task.id, retry_count, delay_ms, error = %message, "Task attempt failed, retrying");
        self.emit(ExecutorEvent::TaskRetrying {
            task_id: task.id,
            retry_count,
            delay_ms,
            error: message,
        });

        let stopped = {
            let mut state = self.lock();
            if state.status == AgentStatus::Offline {
                Some(task)
            } else {
                let task_id = task.id;
                let executor = self.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // `stop` may have taken the task back already.
                    let entry = executor.lock().backoff.remove(&task_id);
                    let Some((task, _)) = entry else {
                        return;
                    };
                    if executor.admit(task.clone(), false) == AdmitOutcome::Rejected {
                        executor.hand_back(&task).await;
                    }
                });
                state.backoff.insert(task_id, (task, timer.abort_handle()));
                None
            }
        };
        if let Some(task) = stopped {
            self.hand_back(&task).await;
        }
    }
}
