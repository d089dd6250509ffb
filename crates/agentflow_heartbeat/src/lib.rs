//! The heartbeat loop: runs due `HeartbeatJob`s, tracks system-wide activity
//! and consecutive errors, and escalates tick frequency on sustained failure
//! (spec.md §4.7).
//!
//! Grounded almost directly on `pycckuu-wintermute::heartbeat::run_heartbeat`
//! (`other_examples/04891cc6_...heartbeat-mod.rs.rs`): `tokio::time::interval`
//! tick + `tokio::select!` against a shutdown/reconfigure signal + per-tick
//! due-job evaluation. `casparian_sentinel::sentinel`'s escalation-by-doubling
//! idiom drives the consecutive-error tick-frequency rule.

pub mod config;
pub mod store;

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow_protocol::{ContainerEventStatus, Group, HeartbeatJob, HeartbeatJobId, HeartbeatJobLog, OutboundPayload, WorkerRequest};
use agentflow_queue::GroupQueue;
use agentflow_runtime::WorkerRuntime;
use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

pub use config::{HeartbeatConfig, HeartbeatConfigPatch};
pub use store::{HeartbeatJobStore, SqliteHeartbeatJobStore};

pub const VIRTUAL_KEY: &str = "_heartbeat_";

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send_result(&self, chat_jid: &str, payload: OutboundPayload);
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct AlertDedup {
    text: String,
    at_ms: i64,
}

pub struct Heartbeat {
    config: RwLock<HeartbeatConfig>,
    store: Arc<dyn HeartbeatJobStore>,
    queue: GroupQueue,
    runtime: Arc<WorkerRuntime>,
    main_group: Group,
    sink: Arc<dyn ResultSink>,
    last_activity_ms: Arc<AtomicI64>,
    consecutive_errors: Arc<AtomicU32>,
    last_alert: Mutex<Option<AlertDedup>>,
    reconfigure: watch::Sender<()>,
}

impl Heartbeat {
    pub fn new(
        config: HeartbeatConfig,
        store: Arc<dyn HeartbeatJobStore>,
        queue: GroupQueue,
        runtime: Arc<WorkerRuntime>,
        main_group: Group,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (reconfigure, _) = watch::channel(());
        Self {
            config: RwLock::new(config),
            store,
            queue,
            runtime,
            main_group,
            sink,
            last_activity_ms: Arc::new(AtomicI64::new(now_millis())),
            consecutive_errors: Arc::new(AtomicU32::new(0)),
            last_alert: Mutex::new(None),
            reconfigure,
        }
    }

    pub async fn config_snapshot(&self) -> HeartbeatConfig {
        self.config.read().await.clone()
    }

    /// Only callable from the `main` group per spec.md §4.4/§4.7 — the caller
    /// (InlineDispatcher's admin gating) is responsible for that check.
    pub async fn patch_config(&self, patch: HeartbeatConfigPatch) -> HeartbeatConfig {
        let mut guard = self.config.write().await;
        let (next, changed) = guard.apply_patch(patch);
        *guard = next.clone();
        if changed {
            let _ = self.reconfigure.send(());
        }
        next
    }

    /// Called whenever the rest of the system observes activity (an inbound
    /// message, a worker result) so the silence-alert check has a genuine
    /// signal to compare against (spec.md §4.7 "records activity gaps").
    pub fn record_activity(&self) {
        self.last_activity_ms.store(now_millis(), Ordering::Relaxed);
    }

    /// Runs the tick loop until `shutdown` reports `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut reconfigure_rx = self.reconfigure.subscribe();
        loop {
            let interval_ms = self.effective_interval_ms().await;
            let sleep = tokio::time::sleep(Duration::from_millis(interval_ms));
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep => {
                    self.tick().await;
                }
                _ = reconfigure_rx.changed() => {
                    // Loop around and re-read the (possibly new) interval.
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat loop stopping on shutdown signal");
                        return;
                    }
                }
            }
        }
    }

    async fn effective_interval_ms(&self) -> u64 {
        let base = self.config.read().await.interval_ms;
        let errors = self.consecutive_errors.load(Ordering::Relaxed);
        let threshold = self.config.read().await.escalate_after_errors;
        if errors > threshold {
            (base / 2).max(1_000)
        } else {
            base
        }
    }

    pub async fn tick(&self) {
        let config = self.config.read().await.clone();
        if !config.enabled {
            return;
        }

        let due = match self.due_jobs(&config).await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "failed to load due heartbeat jobs");
                return;
            }
        };

        for job in due {
            self.run_job(job, &config).await;
        }

        self.check_silence(&config).await;
    }

    async fn due_jobs(&self, config: &HeartbeatConfig) -> anyhow::Result<Vec<HeartbeatJob>> {
        let jobs = self.store.active_jobs().await?;
        let now = chrono::Utc::now();
        Ok(jobs
            .into_iter()
            .filter(|job| {
                let own_interval = job.interval_ms.unwrap_or(config.interval_ms) as i64;
                match job.last_run {
                    None => true,
                    Some(last) => (now - last).num_milliseconds() >= own_interval,
                }
            })
            .collect())
    }

    async fn run_job(&self, job: HeartbeatJob, config: &HeartbeatConfig) {
        let req = WorkerRequest {
            prompt: job.prompt.clone(),
            session_id: None,
            group_folder: self.main_group.folder.clone(),
            chat_jid: job.chat_jid.clone(),
            is_main: true,
            is_scheduled_task: true,
            additional_mounts: Vec::new(),
            timeout_ms: None,
        };

        let key = format!("{VIRTUAL_KEY}{}", job.id);
        let runtime = self.runtime.clone();
        let group = self.main_group.clone();
        let store = self.store.clone();
        let sink = self.sink.clone();
        let chat_jid = job.chat_jid.clone();
        let job_id = job.id;
        let heartbeat_prompt_ack_limit = config.ack_max_chars;
        let show_ok = config.show_ok;
        let show_alerts = config.show_alerts;
        let delivery_muted = config.delivery_muted;
        let consecutive_errors = self.consecutive_errors.clone();

        let work: agentflow_queue::Work = Box::new(move |closer, activity| {
            Box::pin(async move {
                let output = runtime
                    .spawn(
                        req,
                        &group,
                        closer,
                        |_p| {},
                        {
                            let activity = activity.clone();
                            move |_event| activity.touch()
                        },
                    )
                    .await;

                let success = output.status == ContainerEventStatus::Done;
                if success {
                    consecutive_errors.store(0, Ordering::Relaxed);
                } else {
                    consecutive_errors.fetch_add(1, Ordering::Relaxed);
                }

                let summary = output
                    .result
                    .or(output.error)
                    .unwrap_or_else(|| "(no output)".to_string());
                let truncated: String = summary.chars().take(heartbeat_prompt_ack_limit).collect();

                let _ = store.record_run(job_id, chrono::Utc::now(), success, &truncated).await;
                let _ = store
                    .log(HeartbeatJobLog {
                        job_id,
                        ran_at: chrono::Utc::now(),
                        success,
                        summary: truncated.clone(),
                    })
                    .await;

                let suppressed = delivery_muted || (success && !show_ok) || (!success && !show_alerts);
                if !suppressed {
                    sink.send_result(&chat_jid, OutboundPayload::Text { text: truncated }).await;
                }

                if success {
                    agentflow_queue::WorkOutcome::Completed
                } else {
                    agentflow_queue::WorkOutcome::Failed
                }
            })
        });

        if let Err(err) = self.queue.enqueue_task(key, job.id.to_string(), work).await {
            warn!(job_id = %job.id, error = %err, "failed to enqueue heartbeat job");
            return;
        }

        self.record_activity();
    }

    async fn check_silence(&self, config: &HeartbeatConfig) {
        let elapsed = now_millis() - self.last_activity_ms.load(Ordering::Relaxed);
        if elapsed <= config.silence_threshold_ms as i64 {
            return;
        }

        let text = format!("No activity observed for {}ms.", elapsed);
        self.emit_alert(config, text).await;
    }

    /// Records a tick outcome for the consecutive-error escalation rule
    /// (spec.md §4.7). Callers (e.g. the binary's worker-error observer)
    /// invoke this whenever any tracked operation succeeds or fails.
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.consecutive_errors.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn emit_alert(&self, config: &HeartbeatConfig, text: String) {
        if config.delivery_muted || !config.show_alerts {
            return;
        }

        {
            let mut last = self.last_alert.lock().await;
            if let Some(prev) = last.as_ref() {
                let within_cooldown = (now_millis() - prev.at_ms) < config.alert_repeat_cooldown_ms as i64;
                if within_cooldown && prev.text == text {
                    return;
                }
            }
            *last = Some(AlertDedup {
                text: text.clone(),
                at_ms: now_millis(),
            });
        }

        let indicator = if config.use_indicator { "🔴 " } else { "" };
        info!(text = %text, "emitting heartbeat silence alert");
        self.sink
            .send_result(
                &config.main_chat_jid,
                OutboundPayload::Text {
                    text: format!("{indicator}{text}"),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_key_prefix_is_heartbeat_scoped() {
        let id = HeartbeatJobId::new();
        assert!(format!("{VIRTUAL_KEY}{id}").starts_with(VIRTUAL_KEY));
    }
}
