//! The scheduler: polls due tasks, claims them atomically, enriches and
//! forwards to `GroupQueue`, and owns retry/backoff + auto-pause (spec.md
//! §4.6).
//!
//! Grounded on `haru0416-dev-AsteronIris`'s poll loop
//! (`other_examples/5622f0c1_...scheduler.rs.rs`: `tokio::time::interval` tick
//! → fetch due jobs → per-job retry-with-backoff) for the loop shape, and on
//! `casparian_sentinel::db::queue::JobQueue` for the atomic claim (see
//! [`store`]). Deliberately drops that example's jitter: spec.md §9's open
//! question (a) is answered "fixed delay, no jitter" (see DESIGN.md).

pub mod next_run;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use agentflow_protocol::{ContainerEventStatus, Group, OutboundPayload, ScheduledTask, TaskId, TaskRunLog, TaskStatus, WorkerRequest};
use agentflow_queue::{GroupQueue, WorkOutcome};
use agentflow_runtime::WorkerRuntime;
use async_trait::async_trait;
use tracing::{error, info, warn};

pub use next_run::{compute_next_run, render_local, NextRunError};
pub use store::{SqliteTaskStore, TaskPatch, TaskStore};

/// Delivers a scheduled task's streamed results (and final failure
/// notifications) to the originating chat — the `OutboundRouter` spec.md §4.6
/// hands results to, implemented by a channel adapter outside this crate.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send_result(&self, chat_jid: &str, payload: OutboundPayload);
}

/// Resolves a task's `group_folder` into the `Group` its worker should run
/// against, so the scheduler never has to own group storage itself.
#[async_trait]
pub trait GroupLookup: Send + Sync {
    async fn group_by_folder(&self, folder: &str) -> Option<Group>;
}

pub const VIRTUAL_KEY_PREFIX: &str = "_sched_";

pub fn virtual_key(task_id: TaskId) -> String {
    format!("{VIRTUAL_KEY_PREFIX}{task_id}")
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// SCHEDULER_POLL_INTERVAL, default 60_000ms (spec.md §6).
    pub poll_interval_ms: u64,
    /// IANA timezone cron expressions are evaluated in (spec.md §4.6 TIMEZONE).
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            timezone: "UTC".to_string(),
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    queue: GroupQueue,
    runtime: Arc<WorkerRuntime>,
    groups: Arc<dyn GroupLookup>,
    sink: Arc<dyn ResultSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: GroupQueue,
        runtime: Arc<WorkerRuntime>,
        groups: Arc<dyn GroupLookup>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            runtime,
            groups,
            sink,
            config,
        }
    }

    /// Runs the poll loop until `shutdown` reports `true`. Errors in a single
    /// tick are logged and do not terminate the loop (spec.md §7 "Propagation
    /// policy"); a graceful shutdown signal lets the current tick finish
    /// rather than aborting it mid-claim.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler loop stopping on shutdown signal");
                        return;
                    }
                }
            }
        }
    }

    /// One poll: fetch due tasks, claim + enqueue each, then preempt idle
    /// running entries so freshly-due tasks don't wait out a full idle window
    /// (spec.md §4.6 steps 1-5).
    pub async fn tick(&self) -> anyhow::Result<()> {
        let due = self.store.get_due_tasks().await?;
        for task in due {
            if let Err(err) = self.claim_and_enqueue(task.id).await {
                error!(task_id = %task.id, error = %err, "failed to claim/enqueue due task");
            }
        }
        self.queue.preempt_for_pending_tasks().await;
        Ok(())
    }

    async fn claim_and_enqueue(&self, task_id: TaskId) -> anyhow::Result<()> {
        if !self.store.claim_task(task_id).await? {
            // Lost the race to another claimant; nothing to do.
            return Ok(());
        }

        let Some(task) = self.store.get_task_by_id(task_id).await? else {
            warn!(task_id = %task_id, "claimed task vanished before re-read");
            return Ok(());
        };

        if task.status != TaskStatus::Active {
            // Paused/cancelled between the due-fetch and the claim.
            info!(task_id = %task_id, status = ?task.status, "skipping claimed task, no longer active");
            return Ok(());
        }

        let key = virtual_key(task_id);
        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let groups = self.groups.clone();
        let sink = self.sink.clone();
        let timezone = self.config.timezone.clone();
        let task_for_work = task.clone();

        let work: agentflow_queue::Work = Box::new(move |closer, activity| {
            Box::pin(async move {
                run_task(store, runtime, groups, sink, timezone, task_for_work, closer, activity).await
            })
        });

        self.queue.enqueue_task(key, task_id.to_string(), work).await?;
        Ok(())
    }
}

async fn run_task(
    store: Arc<dyn TaskStore>,
    runtime: Arc<WorkerRuntime>,
    groups: Arc<dyn GroupLookup>,
    sink: Arc<dyn ResultSink>,
    timezone: String,
    task: ScheduledTask,
    closer: agentflow_runtime::StdinCloser,
    activity: agentflow_queue::ActivityReporter,
) -> WorkOutcome {
    let Some(group) = groups.group_by_folder(&task.group_folder).await else {
        // Open question (b): the task's group was deleted while the claim was
        // held. Log and return without touching next_run — the task stays on
        // the sentinel and recover_stale_claims() reclaims it on restart.
        warn!(task_id = %task.id, group_folder = %task.group_folder, "task's group no longer exists, leaving claim in place");
        return WorkOutcome::Failed;
    };

    let session_id = match task.context_mode {
        agentflow_protocol::ContextMode::Group => Some(format!("group:{}", task.group_folder)),
        agentflow_protocol::ContextMode::Isolated => None,
    };

    let req = WorkerRequest {
        prompt: task.prompt.clone(),
        session_id,
        group_folder: task.group_folder.clone(),
        chat_jid: task.chat_jid.clone(),
        is_main: group.is_main(),
        is_scheduled_task: true,
        additional_mounts: Vec::new(),
        timeout_ms: task.task_timeout_ms,
    };

    let chat_jid = task.chat_jid.clone();
    let sink_for_stream = sink.clone();
    let activity_for_stream = activity.clone();

    let output = runtime
        .spawn(
            req,
            &group,
            closer,
            |_process| {},
            move |event| {
                activity_for_stream.touch();
                if let Some(result) = &event.result {
                    let sink = sink_for_stream.clone();
                    let chat_jid = chat_jid.clone();
                    let text = result.clone();
                    tokio::spawn(async move {
                        sink.send_result(&chat_jid, OutboundPayload::Text { text }).await;
                    });
                }
            },
        )
        .await;

    match output.status {
        ContainerEventStatus::Done => {
            on_success(&store, &task, &timezone, output.result.unwrap_or_default()).await;
            WorkOutcome::Completed
        }
        _ => {
            on_error(&store, &sink, &task, output.error.unwrap_or_else(|| "unknown worker error".to_string())).await;
            WorkOutcome::Failed
        }
    }
}

async fn on_success(store: &Arc<dyn TaskStore>, task: &ScheduledTask, timezone: &str, summary: String) {
    if let Err(err) = store.reset_retry_count(task.id).await {
        error!(task_id = %task.id, error = %err, "failed to reset retry count");
    }
    if let Err(err) = store
        .log_task_run(TaskRunLog {
            task_id: task.id,
            ran_at: chrono::Utc::now(),
            success: true,
            summary: summary.clone(),
        })
        .await
    {
        error!(task_id = %task.id, error = %err, "failed to log task run");
    }

    let next_run = match compute_next_run(task.schedule_type, &task.schedule_value, timezone) {
        Ok(next) => next,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to compute next_run, pausing task");
            let _ = store
                .update_task(
                    task.id,
                    TaskPatch {
                        status: Some(TaskStatus::Paused),
                        ..Default::default()
                    },
                )
                .await;
            return;
        }
    };

    if let Err(err) = store.update_task_after_run(task.id, next_run, &summary).await {
        error!(task_id = %task.id, error = %err, "failed to update task after successful run");
    }
}

async fn on_error(store: &Arc<dyn TaskStore>, sink: &Arc<dyn ResultSink>, task: &ScheduledTask, error_text: String) {
    let _ = store
        .log_task_run(TaskRunLog {
            task_id: task.id,
            ran_at: chrono::Utc::now(),
            success: false,
            summary: error_text.clone(),
        })
        .await;

    if task.max_retries > 0 && task.retry_count < task.max_retries {
        if let Err(err) = store.schedule_retry(task.id, task.retry_delay_ms).await {
            error!(task_id = %task.id, error = %err, "failed to schedule retry");
            return;
        }
        info!(
            task_id = %task.id,
            "task failed, retry {}/{} in {}ms: {}",
            task.retry_count + 1,
            task.max_retries,
            task.retry_delay_ms,
            error_text
        );
        return;
    }

    if task.max_retries == 0 {
        // maxRetries=0 means never retry, but spec.md §4.6 only auto-pauses
        // "(and maxRetries > 0)" — leave the claim in place; recoverStaleClaims
        // reclaims it like the deleted-group case (open question (b)).
        error!(task_id = %task.id, error = %error_text, "task failed with retries disabled, leaving claim for recovery");
        return;
    }

    error!(task_id = %task.id, error = %error_text, "task exhausted its retry budget, auto-pausing");
    if let Err(err) = store
        .update_task(
            task.id,
            TaskPatch {
                status: Some(TaskStatus::Paused),
                ..Default::default()
            },
        )
        .await
    {
        error!(task_id = %task.id, error = %err, "failed to auto-pause task");
    }

    let label = task.label.clone().unwrap_or_else(|| task.id.to_string()[..8].to_string());
    sink.send_result(
        &task.chat_jid,
        OutboundPayload::Text {
            text: format!(
                "Task {label} has failed {} times in a row… Use resume_task to start again",
                task.max_retries
            ),
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_key_is_namespaced() {
        let id = TaskId::new();
        assert!(virtual_key(id).starts_with(VIRTUAL_KEY_PREFIX));
    }
}
