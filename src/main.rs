use std::sync::Arc;

use agent_dispatch::agents::{AgentConfigLoader, StaticConfigLoader};
use agent_dispatch::clock::{Clock, SystemClock};
use agent_dispatch::config::DispatchConfig;
use agent_dispatch::executor::{AgentExecutor, ExecutorDeps, spawn_config_watcher, spawn_dispatch_loop};
use agent_dispatch::llm::{AnthropicProvider, LlmProvider};
use agent_dispatch::queue::{ExpiredTaskReaper, TaskQueue};
use agent_dispatch::registry::{
    AgentRegistry, AgentRuntimeRegistration, Heartbeat, PerformanceCounters, RuntimeMetadata,
    spawn_heartbeat_loop,
};
use agent_dispatch::store::{LibSqlStore, TaskStore};
use agent_dispatch::tools::{ToolInvoker, ToolRegistry};
use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DispatchConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    // Initialize tracing; keep the guard alive so buffered file logs flush on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("🛰  Agent Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Agents: {}", config.agents_file.display());

    // ── Store ───────────────────────────────────────────────────────────
    let store: Arc<dyn TaskStore> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening task store at {}", config.db_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(TaskQueue::new(Arc::clone(&store), Arc::clone(&clock)));
    let registry = Arc::new(AgentRegistry::new(Arc::clone(&store), Arc::clone(&clock)));

    // ── Collaborators ───────────────────────────────────────────────────
    let loader = Arc::new(
        StaticConfigLoader::from_file(&config.agents_file)
            .await
            .context("loading agent definitions")?,
    );
    let mut provider = AnthropicProvider::new(config.anthropic_api_key.clone());
    if let Some(ref url) = config.anthropic_base_url {
        provider = provider.with_base_url(url.clone());
    }
    let llm: Arc<dyn LlmProvider> = Arc::new(provider);
    let tools: Arc<dyn ToolInvoker> = Arc::new(ToolRegistry::with_builtins());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    // ── Workers ─────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();
    let mut executors = Vec::new();

    let definitions = loader.list().await.context("listing agent definitions")?;
    if definitions.is_empty() {
        tracing::warn!("No agent definitions loaded; only the reaper will run");
    }

    for definition in definitions {
        let agent_id = definition.agent_id.clone();
        let runtime_id = format!("{agent_id}-{}", uuid::Uuid::new_v4());
        let template = AgentRuntimeRegistration {
            runtime_id: runtime_id.clone(),
            agent_id: agent_id.clone(),
            capabilities: definition.capabilities.clone(),
            metadata: RuntimeMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                host: host.clone(),
                port: config.advertised_port,
                pid: std::process::id(),
            },
            heartbeat: Heartbeat {
                last_heartbeat_at: clock.now(),
                interval_ms: config.heartbeat_interval.as_millis() as u64,
            },
            performance: PerformanceCounters::default(),
        };

        let executor = AgentExecutor::new(
            definition,
            ExecutorDeps {
                queue: Arc::clone(&queue),
                llm: Arc::clone(&llm),
                tools: Arc::clone(&tools),
            },
        );

        handles.push(spawn_dispatch_loop(
            Arc::clone(&queue),
            executor.clone(),
            runtime_id.clone(),
            config.dispatch_poll_interval,
            shutdown_rx.clone(),
        ));
        handles.push(spawn_heartbeat_loop(
            Arc::clone(&registry),
            executor.clone(),
            template,
            config.heartbeat_interval,
            shutdown_rx.clone(),
        ));
        handles.push(spawn_config_watcher(
            loader.subscribe(),
            executor.clone(),
            shutdown_rx.clone(),
        ));

        eprintln!("   Worker: {agent_id} ({runtime_id})");
        executors.push(executor);
    }

    handles.push(ExpiredTaskReaper::new(Arc::clone(&queue), config.reaper_interval).spawn(shutdown_rx));

    eprintln!("   Press Ctrl-C to stop.\n");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    // ── Shutdown ────────────────────────────────────────────────────────
    tracing::info!("Shutting down");
    // Loops first so nothing new is claimed, then drain the executors.
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    futures::future::join_all(executors.iter().map(|executor| executor.stop())).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &DispatchConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
