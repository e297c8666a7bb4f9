//! End-to-end tests for a worker: producer → shared queue → dispatch loop →
//! executor → store, with the reaper and heartbeat running alongside.
//!
//! The model is a stub; tools are the real built-in registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::timeout;

use agent_dispatch::agents::{AgentDefinition, AgentToolBinding};
use agent_dispatch::clock::{Clock, ManualClock, SystemClock};
use agent_dispatch::error::LlmError;
use agent_dispatch::executor::{
    AgentExecutor, AgentStatus, ExecutorDeps, spawn_dispatch_loop,
};
use agent_dispatch::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, TokenUsage, ToolCallRequest,
};
use agent_dispatch::queue::{ExpiredTaskReaper, TaskQueue};
use agent_dispatch::registry::{
    AgentRegistry, AgentRuntimeRegistration, Heartbeat, PerformanceCounters, RuntimeMetadata,
    spawn_heartbeat_loop,
};
use agent_dispatch::store::{LibSqlStore, MemoryStore, QueueList, TaskStore};
use agent_dispatch::task::{TaskInput, TaskSpec, TaskStats, TaskStatus};
use agent_dispatch::tools::ToolRegistry;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub model: prompts containing "fail" error out, prompts containing
/// "echo" request one echo tool call, everything else answers directly.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if request.prompt.contains("fail") {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "scripted failure".into(),
            });
        }
        let tool_calls = if request.prompt.contains("echo") {
            vec![ToolCallRequest {
                id: "call-1".into(),
                name: "echo".into(),
                input: serde_json::json!({"message": request.prompt}),
            }]
        } else {
            Vec::new()
        };
        Ok(CompletionResponse {
            content: format!("handled: {}", request.prompt),
            tool_calls,
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        })
    }
}

fn definition(max_concurrent: usize) -> AgentDefinition {
    AgentDefinition::new("support", "stub-model")
        .with_system_prompt("You answer support tickets.")
        .with_max_concurrent_tasks(max_concurrent)
        .with_tool(AgentToolBinding {
            tool_id: "tool-echo".into(),
            name: "echo".into(),
            description: "Echo a message".into(),
            parameters: serde_json::json!({"type": "object"}),
            timeout_ms: Some(2_000),
        })
}

fn registration(runtime_id: &str) -> AgentRuntimeRegistration {
    AgentRuntimeRegistration {
        runtime_id: runtime_id.into(),
        agent_id: "support".into(),
        capabilities: vec!["tickets".into()],
        metadata: RuntimeMetadata {
            version: "test".into(),
            host: "localhost".into(),
            port: None,
            pid: std::process::id(),
        },
        heartbeat: Heartbeat {
            last_heartbeat_at: Utc::now(),
            interval_ms: 50,
        },
        performance: PerformanceCounters::default(),
    }
}

fn spec(prompt: &str) -> TaskSpec {
    TaskSpec::new("support", "user-7", "webhook", TaskInput::prompt(prompt)).with_max_retries(0)
}

async fn wait_for_settled(queue: &TaskQueue, expected_terminal: u64) -> TaskStats {
    timeout(TEST_TIMEOUT, async {
        loop {
            let stats = queue.get_task_stats().await.unwrap();
            if stats.completed + stats.failed >= expected_terminal {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tasks did not settle in time")
}

async fn run_worker(store: Arc<dyn TaskStore>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(TaskQueue::new(Arc::clone(&store), Arc::clone(&clock)));
    let registry = Arc::new(AgentRegistry::new(Arc::clone(&store), Arc::clone(&clock)));
    let executor = AgentExecutor::new(
        definition(3),
        ExecutorDeps {
            queue: Arc::clone(&queue),
            llm: Arc::new(StubLlm),
            tools: Arc::new(ToolRegistry::with_builtins()),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        spawn_dispatch_loop(
            Arc::clone(&queue),
            executor.clone(),
            "support-rt-1".into(),
            Duration::from_millis(20),
            shutdown_rx.clone(),
        ),
        spawn_heartbeat_loop(
            Arc::clone(&registry),
            executor.clone(),
            registration("support-rt-1"),
            Duration::from_millis(50),
            shutdown_rx.clone(),
        ),
        ExpiredTaskReaper::new(Arc::clone(&queue), Duration::from_millis(50)).spawn(shutdown_rx),
    ];

    let mut ids = queue
        .create_tasks(vec![
            spec("summarize ticket 1"),
            spec("echo ticket 2"),
            spec("fail ticket 3"),
            spec("summarize ticket 4"),
            spec("echo ticket 5"),
        ])
        .await
        .unwrap();
    ids.push(queue.create_task(spec("summarize ticket 6")).await.unwrap());

    let stats = wait_for_settled(&queue, 6).await;
    assert_eq!(stats.total, 6);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(queue.get_queue_size().await.unwrap(), 0);

    let echoed = queue.get_task_status(ids[1]).await.unwrap().unwrap();
    assert_eq!(echoed.status, TaskStatus::Completed);
    assert!(echoed.lease.is_some());
    let output = echoed.result.unwrap().output.unwrap();
    assert_eq!(output.tool_results.len(), 1);
    assert_eq!(output.tool_results[0].tool_id, "tool-echo");
    assert!(output.tool_results[0].is_success());

    let failed = queue.get_task_status(ids[2]).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.last_error().unwrap().contains("scripted failure"));
    assert_eq!(
        store.list_members(QueueList::Failed).await.unwrap(),
        vec![ids[2]]
    );

    // Wait for a heartbeat that has seen every task.
    timeout(TEST_TIMEOUT, async {
        loop {
            if let Some(reg) = registry.get_registration("support").await.unwrap()
                && reg.performance.completed_tasks + reg.performance.failed_tasks == 6
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeat never reported the finished tasks");
    assert!(registry.is_agent_online("support").await.unwrap());
    let online = registry.get_online_agents().await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].runtime_id, "support-rt-1");

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
    }
    timeout(TEST_TIMEOUT, executor.stop()).await.unwrap();
    assert_eq!(executor.status(), AgentStatus::Offline);
}

#[tokio::test]
async fn worker_drains_queue_against_memory_store() {
    run_worker(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn worker_drains_queue_against_libsql_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibSqlStore::new_local(&dir.path().join("dispatch.db"))
        .await
        .unwrap();
    run_worker(Arc::new(store)).await;
}

#[tokio::test]
async fn crashed_worker_task_is_reaped() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let queue = Arc::new(TaskQueue::new(store.clone(), clock.clone()));

    // A worker claims the task and then disappears.
    let id = queue
        .create_task(spec("summarize ticket 9").with_timeout(5_000))
        .await
        .unwrap();
    queue.claim_next("support", "dead-rt").await.unwrap().unwrap();

    clock.advance(Duration::from_millis(6_000));
    let reaper = ExpiredTaskReaper::new(Arc::clone(&queue), Duration::from_secs(60));
    assert_eq!(reaper.sweep(1).await, 1);
    assert_eq!(reaper.sweep(2).await, 0);

    let task = queue.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Timeout);
    assert_eq!(task.lease.unwrap().runtime_id, "dead-rt");
    let stats = queue.get_task_stats().await.unwrap();
    assert_eq!((stats.processing, stats.failed), (0, 1));
}

#[tokio::test]
async fn store_outage_rejects_batch_without_partial_writes() {
    let store = Arc::new(MemoryStore::new());
    let queue = TaskQueue::new(store.clone(), Arc::new(SystemClock));

    store.set_available(false);
    let err = queue
        .create_tasks(vec![spec("a"), spec("b"), spec("c")])
        .await
        .unwrap_err();
    assert!(err.is_store_unavailable());

    store.set_available(true);
    assert_eq!(queue.get_task_stats().await.unwrap(), TaskStats::default());
    assert_eq!(queue.get_queue_size().await.unwrap(), 0);
}
