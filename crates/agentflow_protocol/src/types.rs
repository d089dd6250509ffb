//! Canonical wire types shared by every agentflow crate.
//!
//! Mirrors the teacher's pattern of newtype IDs with `Display`/`FromStr` plus a
//! `thiserror` error enum, and `#[serde(rename_all = ...)]` tagged enums as the
//! canonical definition used everywhere (see `casparian_protocol::types::JobId`,
//! `SinkMode`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The reserved far-future instant used to mark a scheduled task as claimed.
///
/// Wire-visible contract (spec.md §6 / §9): do not change without a migration.
pub const CLAIM_SENTINEL: &str = "9999-12-31T23:59:59.999Z";

/// Returns the sentinel instant as a parsed `DateTime<Utc>`.
pub fn claim_sentinel() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(CLAIM_SENTINEL)
        .expect("CLAIM_SENTINEL is a fixed valid RFC3339 literal")
        .with_timezone(&Utc)
}

/// ULID-like, time-ordered scheduled task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|_| TaskIdError::Parse(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskIdError {
    #[error("invalid task id: {0}")]
    Parse(String),
}

/// ULID-like, time-ordered heartbeat job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct HeartbeatJobId(Uuid);

impl HeartbeatJobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for HeartbeatJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HeartbeatJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HeartbeatJobId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(HeartbeatJobId)
            .map_err(|_| TaskIdError::Parse(s.to_string()))
    }
}

/// A chat/group identifier as supplied by the channel adapter (spec.md GLOSSARY: JID).
pub type Jid = String;

/// Per-group container spawn settings (spec.md §3 Group.containerConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub additional_mounts: Vec<String>,
    pub timeout_ms: Option<u64>,
}

/// A chat workspace (spec.md §3, GLOSSARY). `folder` is the stable key and
/// filesystem identifier; it never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub folder: String,
    pub trigger_prefix: String,
    pub added_at: DateTime<Utc>,
    pub container_config: ContainerConfig,
    pub requires_trigger: bool,
}

impl Group {
    /// The `main` group carries elevated privileges (GLOSSARY).
    pub fn is_main(&self) -> bool {
        self.folder == "main"
    }
}

// ============================================================================
// Scheduled task
// ============================================================================

/// How a scheduled task's due time is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::Once => "once",
        };
        write!(f, "{s}")
    }
}

/// Whether a scheduled task runs inside the group's persistent session or a
/// fresh, isolated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Group,
    Isolated,
}

/// Lifecycle status of a [`ScheduledTask`] (spec.md §3 invariants I1-I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Cancelled is terminal (I1); completed is terminal for once-tasks (I2).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Completed)
    }
}

/// A user-defined scheduled job: cron, interval, or one-shot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub group_folder: String,
    pub chat_jid: Jid,
    pub prompt: String,
    pub schedule_type: ScheduleType,
    /// Cron expression, interval in ms (as a string), or an ISO instant — shape
    /// depends on `schedule_type`.
    pub schedule_value: String,
    pub context_mode: ContextMode,
    /// `None` only for a `once` task whose run has completed.
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub task_timeout_ms: Option<u64>,
    pub label: Option<String>,
}

impl ScheduledTask {
    /// True while claimed by the scheduler (G4): `next_run` sits on the sentinel.
    pub fn is_claimed(&self) -> bool {
        self.next_run
            .map(|t| t == claim_sentinel())
            .unwrap_or(false)
    }
}

/// One row of a task's append-only run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunLog {
    pub task_id: TaskId,
    pub ran_at: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
}

// ============================================================================
// Heartbeat job
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatJobCategory {
    Learning,
    Monitor,
    Health,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatJobStatus {
    Active,
    Paused,
}

/// A user-configured recurring health/monitor prompt (spec.md GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatJob {
    pub id: HeartbeatJobId,
    pub chat_jid: Jid,
    pub label: String,
    pub prompt: String,
    pub category: HeartbeatJobCategory,
    pub status: HeartbeatJobStatus,
    /// `None` means inherit the global heartbeat tick interval.
    pub interval_ms: Option<u64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatJobLog {
    pub job_id: HeartbeatJobId,
    pub ran_at: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
}

// ============================================================================
// Chat / channel
// ============================================================================

/// An inbound message from a channel adapter. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub chat_jid: Jid,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
}

/// A reply destined for a channel, tagged by payload kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutboundPayload {
    Text {
        text: String,
    },
    Photo {
        file_path: String,
        caption: Option<String>,
    },
    Document {
        file_path: String,
        caption: Option<String>,
        file_name: String,
    },
}

// ============================================================================
// Container agent IPC
// ============================================================================

/// Status of a single streamed container-agent event (spec.md §4.2/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEventStatus {
    Progress,
    Result,
    Error,
    Done,
}

/// One newline-delimited JSON event emitted by a container-agent subprocess on
/// stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerOutput {
    pub status: ContainerEventStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub session_id: Option<String>,
    /// Present iff the message is HMAC-signed (spec.md §6 Worker IPC).
    #[serde(default, rename = "_hmac")]
    pub hmac: Option<String>,
}

/// Request to spawn a container-agent worker for a piece of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub prompt: String,
    pub session_id: Option<String>,
    pub group_folder: String,
    pub chat_jid: Jid,
    pub is_main: bool,
    pub is_scheduled_task: bool,
    /// Additional bind mounts beyond the group's workspace, resolved and
    /// validated against the mount allowlist before spawn.
    pub additional_mounts: Vec<String>,
    /// Hard timeout in ms; `None` defers to the runtime's configured default.
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrips_through_display_and_parse() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn task_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn claim_sentinel_matches_the_wire_constant() {
        assert_eq!(
            claim_sentinel().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            CLAIM_SENTINEL
        );
    }

    #[test]
    fn task_is_claimed_iff_next_run_is_sentinel() {
        let mut task = sample_task();
        assert!(!task.is_claimed());
        task.next_run = Some(claim_sentinel());
        assert!(task.is_claimed());
    }

    #[test]
    fn outbound_payload_tags_by_kind() {
        let text = OutboundPayload::Text {
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hi");
    }

    fn sample_task() -> ScheduledTask {
        ScheduledTask {
            id: TaskId::new(),
            group_folder: "main".to_string(),
            chat_jid: "123@g.us".to_string(),
            prompt: "check the weather".to_string(),
            schedule_type: ScheduleType::Interval,
            schedule_value: "60000".to_string(),
            context_mode: ContextMode::Group,
            next_run: Some(Utc::now()),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
            retry_delay_ms: 1000,
            task_timeout_ms: None,
            label: None,
        }
    }
}
