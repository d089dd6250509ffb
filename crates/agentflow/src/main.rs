//! `agentflow` — the chat-driven agent orchestrator process: scheduler,
//! heartbeat loop, and HTTP control plane wired over one sqlite database.
//!
//! Usage:
//!     agentflow [--verbose]
//!
//! Grounded on `casparian_sentinel/src/main.rs`: `clap::Parser` args, a
//! `tracing_subscriber` init call, a flat config struct, then "bind" (open
//! storage, recover stale claims) followed by "run" (spawn the loops).

mod config;
mod groups;
mod resources;
mod sink;

use std::sync::Arc;

use agentflow_heartbeat::{Heartbeat, HeartbeatConfig, SqliteHeartbeatJobStore};
use agentflow_http::AppState;
use agentflow_logging::{ErrorRing, LogConfig};
use agentflow_queue::GroupQueue;
use agentflow_runtime::WorkerRuntime;
use agentflow_runtime::WorkerRuntimeConfig;
use agentflow_scheduler::{Scheduler, SchedulerConfig, SqliteTaskStore, TaskStore};
use agentflow_security::IpcSecret;
use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use config::AppConfig;
use groups::GroupRegistryImpl;
use resources::SharedResourceMonitor;
use sink::LoggingResultSink;

#[derive(Parser, Debug)]
#[command(name = "agentflow", about = "Chat-driven agent orchestrator")]
struct Args {
    /// Mirror all log output to stderr at the file filter's level instead of
    /// just warnings.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env();
    let errors = ErrorRing::new();

    agentflow_logging::init_logging(LogConfig {
        app_name: "agentflow",
        verbose: args.verbose,
        tui_mode: false,
        error_ring: Some(errors.clone()),
    })?;

    info!("Starting agentflow");
    info!(database = %config.database_path.display(), "opening storage");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", config.database_path.display()))
        .await?;

    let task_store = Arc::new(SqliteTaskStore::new(pool.clone()));
    task_store.ensure_schema().await?;
    let heartbeat_store = Arc::new(SqliteHeartbeatJobStore::new(pool));
    heartbeat_store.ensure_schema().await?;

    let recovered = task_store.recover_stale_claims().await?;
    if recovered > 0 {
        info!(recovered, "reclaimed stale task claims left over from a previous crash");
    }

    let home = agentflow_logging::agentflow_home();
    let groups = Arc::new(GroupRegistryImpl::load_from_disk(&home.join("groups")));
    let main_group = {
        use agentflow_scheduler::GroupLookup;
        groups
            .group_by_folder("main")
            .await
            .expect("the group registry always seeds a main group")
    };

    let resources = Arc::new(SharedResourceMonitor::new(config.max_concurrent_containers));
    let queue = GroupQueue::new(resources.clone(), config.max_queue_size);

    let ipc_secret = match IpcSecret::load_or_create(&config.ipc_secret_path) {
        Ok(secret) => Some(secret),
        Err(err) => {
            tracing::warn!(error = %err, "could not load/create IPC secret, worker events will be accepted unsigned");
            None
        }
    };

    let runtime = Arc::new(WorkerRuntime::new(
        WorkerRuntimeConfig {
            command: config.worker_command.clone(),
            base_args: config.worker_base_args.clone(),
            default_timeout_ms: config.container_timeout_ms,
            idle_timeout_ms: config.idle_timeout_ms,
            mount_allowlist_path: config.mount_allowlist_path.clone(),
        },
        ipc_secret,
    ));

    let sink = Arc::new(LoggingResultSink);

    let scheduler = Arc::new(Scheduler::new(
        task_store.clone(),
        queue.clone(),
        runtime.clone(),
        groups.clone(),
        sink.clone(),
        SchedulerConfig {
            poll_interval_ms: config.scheduler_poll_interval_ms,
            timezone: config.timezone.clone(),
        },
    ));

    let mut heartbeat_config = HeartbeatConfig::default();
    heartbeat_config.interval_ms = config.heartbeat_interval_ms.max(heartbeat_config.interval_ms);
    if !config.heartbeat_main_chat_jid.is_empty() {
        heartbeat_config.main_chat_jid = config.heartbeat_main_chat_jid.clone();
    }

    let heartbeat = Arc::new(Heartbeat::new(
        heartbeat_config,
        heartbeat_store,
        queue.clone(),
        runtime.clone(),
        main_group,
        sink.clone(),
    ));

    let app_state = AppState::new(
        env!("CARGO_PKG_VERSION"),
        task_store,
        queue,
        resources,
        groups,
        errors,
        Some(heartbeat.clone()),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_for_task = scheduler.clone();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler_for_task.run(scheduler_shutdown).await });

    let heartbeat_for_task = heartbeat.clone();
    let heartbeat_shutdown = shutdown_rx.clone();
    let heartbeat_handle = tokio::spawn(async move { heartbeat_for_task.run(heartbeat_shutdown).await });

    let router = agentflow_http::router(app_state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP control plane listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, stopping background loops");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(scheduler_handle, heartbeat_handle);

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
