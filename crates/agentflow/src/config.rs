//! Environment-driven process configuration (spec.md §6 constants/env vars).
//!
//! Grounded on `casparian_sentinel/src/main.rs`'s `SentinelConfig` — a flat
//! struct built once at startup from CLI args with env-var fallbacks, handed
//! by value to whatever needs it.

use std::path::PathBuf;

use agentflow_logging::agentflow_home;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Everything `main` reads from the environment before wiring the process
/// together (spec.md §6).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// MAX_CONCURRENT_CONTAINERS — `ResourceMonitor`'s `baseMax`.
    pub max_concurrent_containers: usize,
    /// MAX_QUEUE_SIZE — per-key cap enforced by `GroupQueue`.
    pub max_queue_size: usize,
    /// CONTAINER_TIMEOUT — hard per-spawn timeout in ms.
    pub container_timeout_ms: u64,
    /// IDLE_TIMEOUT — stdout-silence timeout in ms.
    pub idle_timeout_ms: u64,
    /// SCHEDULER_POLL_INTERVAL — scheduler tick period in ms.
    pub scheduler_poll_interval_ms: u64,
    /// TIMEZONE — IANA zone cron expressions are evaluated in.
    pub timezone: String,
    /// HTTP control plane bind port.
    pub http_port: u16,
    /// Worker launcher command (e.g. a sandbox wrapper) and its fixed args.
    pub worker_command: String,
    pub worker_base_args: Vec<String>,
    pub mount_allowlist_path: PathBuf,
    pub ipc_secret_path: PathBuf,
    pub database_path: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_main_chat_jid: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let home = agentflow_home();
        Self {
            max_concurrent_containers: env_usize("MAX_CONCURRENT_CONTAINERS", 4),
            max_queue_size: env_usize("MAX_QUEUE_SIZE", 100),
            container_timeout_ms: env_u64("CONTAINER_TIMEOUT", 10 * 60 * 1000),
            idle_timeout_ms: env_u64("IDLE_TIMEOUT", 2 * 60 * 1000),
            scheduler_poll_interval_ms: env_u64("SCHEDULER_POLL_INTERVAL", 60_000),
            timezone: env_string("TIMEZONE", "UTC"),
            http_port: env_u64("AGENTFLOW_HTTP_PORT", 47_779) as u16,
            worker_command: env_string("AGENTFLOW_WORKER_COMMAND", "agentflow-worker"),
            worker_base_args: Vec::new(),
            mount_allowlist_path: std::env::var("AGENTFLOW_MOUNT_ALLOWLIST")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join("mount_allowlist.json")),
            ipc_secret_path: std::env::var("IPC_SECRET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join("ipc_secret")),
            database_path: std::env::var("AGENTFLOW_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join("agentflow.sqlite3")),
            heartbeat_interval_ms: env_u64("HEARTBEAT_INTERVAL", 60_000),
            heartbeat_main_chat_jid: env_string("HEARTBEAT_MAIN_CHAT_JID", ""),
        }
    }
}
