//! Axum handlers for every route spec.md §6 names exactly.
//!
//! Grounded on `tvanderb-AutOSINT/crates/fetch/src/routes.rs`'s handler shape:
//! `State<Arc<T>>` extraction, `Result<Json<T>, (StatusCode, String)>` for
//! routes that can fail outright (malformed JSON, unknown route/id), and a
//! plain `Json<T>` return for routes that always succeed with a body.

use std::sync::Arc;

use agentflow_heartbeat::HeartbeatConfigPatch;
use agentflow_protocol::{TaskId, TaskStatus};
use agentflow_scheduler::TaskPatch;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

type ApiError = (StatusCode, String);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn not_found(msg: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, msg.into())
}

fn internal(msg: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string())
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime: u64,
    version: &'static str,
    timestamp: chrono::DateTime<Utc>,
}

/// `GET /health` (spec.md §6).
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: state.uptime_seconds(),
        version: state.version,
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
pub struct ResourcesView {
    #[serde(rename = "currentMax")]
    current_max: usize,
    #[serde(rename = "cpuUsage")]
    cpu_usage: f64,
    #[serde(rename = "memoryFree")]
    memory_free: f64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(rename = "activeContainers")]
    active_containers: usize,
    #[serde(rename = "queueDepth")]
    queue_depth: usize,
    #[serde(rename = "registeredGroups")]
    registered_groups: Vec<String>,
    resources: ResourcesView,
    #[serde(rename = "recentErrors")]
    recent_errors: Vec<String>,
    uptime: u64,
    version: &'static str,
    timestamp: chrono::DateTime<Utc>,
}

/// `GET /status` (spec.md §6).
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.resources.stats();
    Json(StatusResponse {
        active_containers: state.queue.active_count().await,
        queue_depth: state.queue.queue_depth().await,
        registered_groups: state.groups.group_folders(),
        resources: ResourcesView {
            current_max: stats.current_max,
            cpu_usage: stats.cpu_usage_percent,
            memory_free: stats.memory_free_percent,
        },
        recent_errors: state.errors.recent(20),
        uptime: state.uptime_seconds(),
        version: state.version,
        timestamp: Utc::now(),
    })
}

#[derive(serde::Deserialize)]
pub struct TaskListQuery {
    status: Option<String>,
    group: Option<String>,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    tasks: Vec<agentflow_protocol::ScheduledTask>,
    count: usize,
}

fn parse_status_filter(raw: &str) -> Result<TaskStatus, ApiError> {
    match raw {
        "active" => Ok(TaskStatus::Active),
        "paused" => Ok(TaskStatus::Paused),
        "completed" => Ok(TaskStatus::Completed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(bad_request(format!("unknown status filter {other:?}"))),
    }
}

/// `GET /scheduler/tasks[?status=&group=]` (spec.md §6). Default filter
/// excludes `status='cancelled'`.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let all = state.task_store.get_all_tasks().await.map_err(internal)?;

    let status_filter = query.status.as_deref().map(parse_status_filter).transpose()?;

    let tasks: Vec<_> = all
        .into_iter()
        .filter(|task| match &status_filter {
            Some(wanted) => task.status == *wanted,
            None => task.status != TaskStatus::Cancelled,
        })
        .filter(|task| match query.group.as_deref() {
            Some(g) => task.group_folder == g,
            None => true,
        })
        .collect();

    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

#[derive(Serialize)]
pub struct TaskDetailResponse {
    task: agentflow_protocol::ScheduledTask,
    #[serde(rename = "recentRuns")]
    recent_runs: Vec<agentflow_protocol::TaskRunLog>,
}

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse().map_err(|_| not_found(format!("no such task: {raw}")))
}

/// `GET /scheduler/tasks/:id` (spec.md §6).
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetailResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let task = state
        .task_store
        .get_task_by_id(task_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no such task: {id}")))?;
    let recent_runs = state
        .task_store
        .get_task_run_logs(task_id, 20)
        .await
        .map_err(internal)?;

    Ok(Json(TaskDetailResponse { task, recent_runs }))
}

#[derive(Serialize)]
pub struct TaskActionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl TaskActionResponse {
    fn ok(status: TaskStatus) -> Self {
        Self {
            success: true,
            status: Some(status),
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            message: Some(message.into()),
        }
    }
}

/// `POST /scheduler/tasks/:id/pause` — requires current `status='active'`
/// (spec.md §6).
pub async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskActionResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let task = state
        .task_store
        .get_task_by_id(task_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no such task: {id}")))?;

    if task.status != TaskStatus::Active {
        return Ok(Json(TaskActionResponse::failed(format!(
            "task is {}, not active",
            status_name(task.status)
        ))));
    }

    state
        .task_store
        .update_task(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .map_err(internal)?;

    Ok(Json(TaskActionResponse::ok(TaskStatus::Paused)))
}

/// `POST /scheduler/tasks/:id/resume` — requires current `status='paused'`
/// (spec.md §6).
pub async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskActionResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let task = state
        .task_store
        .get_task_by_id(task_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no such task: {id}")))?;

    if task.status != TaskStatus::Paused {
        return Ok(Json(TaskActionResponse::failed(format!(
            "task is {}, not paused",
            status_name(task.status)
        ))));
    }

    state
        .task_store
        .update_task(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Active),
                next_run: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
        .await
        .map_err(internal)?;

    Ok(Json(TaskActionResponse::ok(TaskStatus::Active)))
}

/// `POST /scheduler/tasks/:id/cancel` — idempotent, never fails on an
/// already-cancelled task (spec.md §5 "Cancellation and timeout").
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskActionResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    state
        .task_store
        .get_task_by_id(task_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no such task: {id}")))?;

    state.task_store.cancel_task(task_id).await.map_err(internal)?;
    Ok(Json(TaskActionResponse::ok(TaskStatus::Cancelled)))
}

/// `POST /scheduler/tasks/:id/run` — requires current `status='active'`,
/// sets `next_run=now` so the scheduler's next tick claims it immediately
/// (spec.md §6).
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskActionResponse>, ApiError> {
    let task_id = parse_task_id(&id)?;
    let task = state
        .task_store
        .get_task_by_id(task_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no such task: {id}")))?;

    if task.status != TaskStatus::Active {
        return Ok(Json(TaskActionResponse::failed(format!(
            "task is {}, not active",
            status_name(task.status)
        ))));
    }

    state
        .task_store
        .update_task(
            task_id,
            TaskPatch {
                next_run: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
        .await
        .map_err(internal)?;

    Ok(Json(TaskActionResponse::ok(TaskStatus::Active)))
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Cancelled => "cancelled",
    }
}

#[derive(Serialize)]
pub struct ByStatus {
    active: usize,
    paused: usize,
    completed: usize,
    cancelled: usize,
}

#[derive(Serialize)]
pub struct SchedulerStatsResponse {
    total: usize,
    #[serde(rename = "byStatus")]
    by_status: ByStatus,
    #[serde(rename = "dueSoon")]
    due_soon: usize,
    overdue: usize,
    #[serde(rename = "withRetries")]
    with_retries: usize,
    timestamp: chrono::DateTime<Utc>,
}

/// `GET /scheduler/stats` (spec.md §6).
pub async fn scheduler_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchedulerStatsResponse>, ApiError> {
    let tasks = state.task_store.get_all_tasks().await.map_err(internal)?;
    let now = Utc::now();
    let horizon = now + chrono::Duration::hours(24);

    let mut by_status = ByStatus {
        active: 0,
        paused: 0,
        completed: 0,
        cancelled: 0,
    };
    let mut due_soon = 0;
    let mut overdue = 0;
    let mut with_retries = 0;

    for task in &tasks {
        match task.status {
            TaskStatus::Active => by_status.active += 1,
            TaskStatus::Paused => by_status.paused += 1,
            TaskStatus::Completed => by_status.completed += 1,
            TaskStatus::Cancelled => by_status.cancelled += 1,
        }

        if task.retry_count > 0 {
            with_retries += 1;
        }

        if task.status == TaskStatus::Active {
            if let Some(next_run) = task.next_run {
                if next_run <= now {
                    overdue += 1;
                } else if next_run <= horizon {
                    due_soon += 1;
                }
            }
        }
    }

    Ok(Json(SchedulerStatsResponse {
        total: tasks.len(),
        by_status,
        due_soon,
        overdue,
        with_retries,
        timestamp: now,
    }))
}

/// `GET /heartbeat/config` (spec.md §6).
pub async fn get_heartbeat_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<agentflow_heartbeat::HeartbeatConfig>, ApiError> {
    let heartbeat = state
        .heartbeat
        .as_ref()
        .ok_or_else(|| (StatusCode::SERVICE_UNAVAILABLE, "heartbeat not registered".to_string()))?;
    Ok(Json(heartbeat.config_snapshot().await))
}

/// `POST|PATCH /heartbeat/config` — patches and returns the clamped result
/// (spec.md §6 "re-reads and returns after clamping").
pub async fn patch_heartbeat_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<HeartbeatConfigPatch>,
) -> Result<Json<agentflow_heartbeat::HeartbeatConfig>, ApiError> {
    let heartbeat = state
        .heartbeat
        .as_ref()
        .ok_or_else(|| (StatusCode::SERVICE_UNAVAILABLE, "heartbeat not registered".to_string()))?;
    Ok(Json(heartbeat.patch_config(patch).await))
}

#[derive(Serialize)]
pub struct PingResponse {
    triggered: bool,
}

/// `POST /heartbeat/ping` — triggers a manual heartbeat tick; 503 if the
/// heartbeat loop isn't registered (spec.md §6).
pub async fn ping_heartbeat(State(state): State<Arc<AppState>>) -> Result<Json<PingResponse>, ApiError> {
    let heartbeat = state
        .heartbeat
        .as_ref()
        .ok_or_else(|| (StatusCode::SERVICE_UNAVAILABLE, "heartbeat not registered".to_string()))?;
    heartbeat.tick().await;
    Ok(Json(PingResponse { triggered: true }))
}
