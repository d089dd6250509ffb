//! `WorkerRuntime` — spawns a sandboxed container-agent subprocess, streams
//! its ndjson output, and enforces idle/hard timeouts (spec.md §4.2).
//!
//! Grounded on `casparian_worker::bridge`'s spawn → pipe → read-loop → exit
//! classification shape, generalized from the teacher's Arrow-over-TCP
//! transport to plain ndjson over stdio (spec.md §6 "Worker IPC"), and on
//! `haru0416-dev-AsteronIris`'s `tokio::process::Command` usage
//! (`other_examples/5622f0c1_...scheduler.rs.rs`) for the async, non-blocking
//! spawn idiom. The cooperating idle/hard-timeout timer pair over a single
//! event channel follows `pycckuu-wintermute`'s `tokio::select!`
//! interval/shutdown pattern (`other_examples/04891cc6_...heartbeat-mod.rs.rs`).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use agentflow_protocol::{ContainerEventStatus, ContainerOutput, Group, WorkerRequest};
use agentflow_security::{verify_event, IpcSecret, MountAllowlist, SecurityError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Runtime-wide configuration (spec.md §6 env/constants).
#[derive(Debug, Clone)]
pub struct WorkerRuntimeConfig {
    /// The sandbox launcher binary (e.g. a `bwrap`/container-runtime wrapper);
    /// the opaque worker image/command is appended to `base_args`.
    pub command: String,
    pub base_args: Vec<String>,
    /// CONTAINER_TIMEOUT default.
    pub default_timeout_ms: u64,
    /// IDLE_TIMEOUT default.
    pub idle_timeout_ms: u64,
    pub mount_allowlist_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("mount rejected: {0}")]
    Mount(#[from] SecurityError),
    #[error("failed to load mount allowlist: {0}")]
    AllowlistUnreadable(String),
    #[error("failed to spawn worker process: {0}")]
    Spawn(String),
}

/// A handle callers can use to force-close the worker's stdin early — the
/// mechanism behind `GroupQueue::close_stdin` (idle preemption, hard
/// timeout, or an operator-triggered kill).
#[derive(Clone)]
pub struct StdinCloser(Arc<Notify>);

impl StdinCloser {
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn request_close(&self) {
        self.0.notify_one();
    }

    async fn requested(&self) {
        self.0.notified().await;
    }
}

impl Default for StdinCloser {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of the spawned OS process, handed to the `on_process` callback
/// as soon as `spawn()` succeeds (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub container_name: String,
}

pub struct WorkerRuntime {
    config: WorkerRuntimeConfig,
    ipc_secret: Option<IpcSecret>,
}

impl WorkerRuntime {
    pub fn new(config: WorkerRuntimeConfig, ipc_secret: Option<IpcSecret>) -> Self {
        Self { config, ipc_secret }
    }

    /// Spawn a worker for `req` against `group`, streaming every `result`
    /// event to `on_output` as it arrives, and returning the final event.
    ///
    /// `closer` lets the caller (GroupQueue, the scheduler's per-task hard
    /// timeout guard) request an early stdin close without owning the
    /// process itself.
    pub async fn spawn(
        &self,
        req: WorkerRequest,
        group: &Group,
        closer: StdinCloser,
        mut on_process: impl FnMut(ProcessHandle) + Send,
        mut on_output: impl FnMut(ContainerOutput) + Send,
    ) -> ContainerOutput {
        let effective_timeout_ms = req.timeout_ms.unwrap_or(self.config.default_timeout_ms);

        let mount_args = match self.mount_args(req.is_main, &req.additional_mounts, group) {
            Ok(args) => args,
            Err(err) => {
                warn!(group = %group.folder, error = %err, "spawn refused by mount allowlist");
                return ContainerOutput {
                    status: ContainerEventStatus::Error,
                    result: None,
                    error: Some(err.to_string()),
                    session_id: None,
                    hmac: None,
                };
            }
        };

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.base_args)
            .arg("--group-folder")
            .arg(&group.folder)
            .arg("--chat-jid")
            .arg(&req.chat_jid)
            .args(&mount_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(error = %err, "failed to spawn worker process");
                return ContainerOutput {
                    status: ContainerEventStatus::Error,
                    result: None,
                    error: Some(format!("failed to spawn worker: {err}")),
                    session_id: None,
                    hmac: None,
                };
            }
        };

        let pid = child.id().unwrap_or(0);
        let container_name = format!("agentflow-{}-{}", group.folder, pid);
        on_process(ProcessHandle {
            pid,
            container_name,
        });

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(req.prompt.as_bytes()).await {
                warn!(error = %err, "failed to write prompt to worker stdin");
            }
            // Keep the handle alive in `child.stdin` via reinsertion isn't
            // possible once taken, so we hand it to the read loop instead.
            child.stdin = Some(stdin);
        }

        self.stream_until_done(child, effective_timeout_ms, closer, &mut on_output)
            .await
    }

    /// Validates every requested mount against the allowlist and builds the
    /// `--mount <path>[:ro]` args the sandbox launcher expects, forcing
    /// read-only for non-main groups when the allowlist requires it
    /// (spec.md §4.2 "Mount safety").
    fn mount_args(
        &self,
        is_main: bool,
        additional_mounts: &[String],
        group: &Group,
    ) -> Result<Vec<String>, RuntimeError> {
        let allowlist = MountAllowlist::load(&self.config.mount_allowlist_path)
            .map_err(|e| RuntimeError::AllowlistUnreadable(e.to_string()))?;

        let mut all_mounts: Vec<PathBuf> = group
            .container_config
            .additional_mounts
            .iter()
            .map(PathBuf::from)
            .collect();
        all_mounts.extend(additional_mounts.iter().map(PathBuf::from));

        let report = allowlist.validate_all(&all_mounts);
        if let Some(first) = report.errors.into_iter().next() {
            return Err(RuntimeError::Mount(first));
        }

        let force_read_only = !is_main && allowlist.non_main_read_only;
        let mut args = Vec::with_capacity(all_mounts.len() * 2);
        for mount in &all_mounts {
            args.push("--mount".to_string());
            let mode = if force_read_only { ":ro" } else { "" };
            args.push(format!("{}{mode}", mount.display()));
        }
        Ok(args)
    }

    async fn stream_until_done(
        &self,
        mut child: Child,
        effective_timeout_ms: u64,
        closer: StdinCloser,
        on_output: &mut impl FnMut(ContainerOutput),
    ) -> ContainerOutput {
        let stdout = child.stdout.take().expect("stdout was piped");
        let mut lines = BufReader::new(stdout).lines();

        let hard_deadline = tokio::time::sleep(Duration::from_millis(effective_timeout_ms));
        tokio::pin!(hard_deadline);
        let mut hard_fired = false;

        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let idle_sleep = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle_sleep);
        let mut idle_armed = false;

        let mut final_event: Option<ContainerOutput> = None;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(raw)) => {
                            match self.parse_event(&raw) {
                                Some(event) => {
                                    if event.status == ContainerEventStatus::Result {
                                        on_output(event.clone());
                                        idle_sleep.as_mut().reset(Instant::now() + idle_timeout);
                                        idle_armed = true;
                                    }
                                    if matches!(
                                        event.status,
                                        ContainerEventStatus::Done | ContainerEventStatus::Error
                                    ) {
                                        final_event = Some(event);
                                        break;
                                    }
                                }
                                None => {
                                    debug!(line = %raw, "dropping unparseable worker event");
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "error reading worker stdout");
                            break;
                        }
                    }
                }
                _ = &mut hard_deadline, if !hard_fired => {
                    hard_fired = true;
                    info!(timeout_ms = effective_timeout_ms, "worker hard timeout fired, closing stdin");
                    close_stdin(&mut child);
                }
                _ = &mut idle_sleep, if idle_armed => {
                    info!("worker idle timeout fired, closing stdin");
                    close_stdin(&mut child);
                    idle_armed = false;
                }
                _ = closer.requested() => {
                    info!("stdin close requested externally");
                    close_stdin(&mut child);
                }
            }
        }

        let exit_status = child.wait().await;

        if let Some(event) = final_event {
            return event;
        }

        if hard_fired {
            return ContainerOutput {
                status: ContainerEventStatus::Error,
                result: None,
                error: Some(format!("Hard timeout after {effective_timeout_ms}ms")),
                session_id: None,
                hmac: None,
            };
        }

        match exit_status {
            Ok(status) if status.success() => ContainerOutput {
                status: ContainerEventStatus::Done,
                result: None,
                error: None,
                session_id: None,
                hmac: None,
            },
            Ok(status) => ContainerOutput {
                status: ContainerEventStatus::Error,
                result: None,
                error: Some(format!(
                    "worker exited with status {}",
                    status.code().unwrap_or(-1)
                )),
                session_id: None,
                hmac: None,
            },
            Err(err) => ContainerOutput {
                status: ContainerEventStatus::Error,
                result: None,
                error: Some(format!("failed to reap worker process: {err}")),
                session_id: None,
                hmac: None,
            },
        }
    }

    fn parse_event(&self, raw: &str) -> Option<ContainerOutput> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;

        if value.get("_hmac").is_some() {
            if let Some(secret) = &self.ipc_secret {
                let outcome = verify_event(&value, secret);
                if !outcome.valid {
                    warn!("dropping worker event with invalid HMAC");
                    return None;
                }
            }
        }

        serde_json::from_value(value).ok()
    }
}

fn close_stdin(child: &mut Child) {
    child.stdin = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_protocol::ContainerConfig;
    use chrono::Utc;

    fn sample_group() -> Group {
        Group {
            name: "Main".to_string(),
            folder: "main".to_string(),
            trigger_prefix: "!".to_string(),
            added_at: Utc::now(),
            container_config: ContainerConfig {
                additional_mounts: vec![],
                timeout_ms: None,
            },
            requires_trigger: false,
        }
    }

    #[test]
    fn stdin_closer_delivers_notification() {
        let closer = StdinCloser::new();
        let clone = closer.clone();
        clone.request_close();
        // Just exercising construction/clone; `requested()` is tested via
        // the runtime's select loop in integration-style tests elsewhere.
        let _ = closer;
    }

    #[test]
    fn sample_group_is_main() {
        assert!(sample_group().is_main());
    }
}
