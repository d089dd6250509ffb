//! The `TaskStore` contract (spec.md §6) and its SQLite implementation.
//!
//! Grounded directly on `casparian_sentinel::db::queue::JobQueue`: `claim_task`
//! is the same atomic `UPDATE ... WHERE status = ? AND ...` /
//! `rows_affected() == 0 ⇒ lost race` shape as `JobQueue::pop_job`, just
//! against a `tasks` table and the predicate spec.md §6 names exactly.

use agentflow_protocol::{claim_sentinel, ContextMode, ScheduleType, ScheduledTask, TaskId, TaskRunLog, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// A partial update applied via `updateTask` (spec.md §6). `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears `next_run`; `None` leaves it untouched.
    pub next_run: Option<Option<DateTime<Utc>>>,
    pub label: Option<String>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn get_task_by_id(&self, id: TaskId) -> Result<Option<ScheduledTask>>;
    async fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>>;
    /// `status='active' AND next_run ≤ now() AND next_run ≠ sentinel`, ordered
    /// by `next_run asc` (spec.md §6).
    async fn get_due_tasks(&self) -> Result<Vec<ScheduledTask>>;
    /// Atomic `UPDATE tasks SET next_run=sentinel WHERE id=? AND status='active'
    /// AND next_run≤now() AND next_run≠sentinel`; returns true iff one row
    /// changed (spec.md §4.6/§6, the G4 concurrency primitive).
    async fn claim_task(&self, id: TaskId) -> Result<bool>;
    /// `UPDATE tasks SET next_run=now() WHERE status='active' AND
    /// next_run=sentinel`, returns the row count (spec.md §6).
    async fn recover_stale_claims(&self) -> Result<u64>;
    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<()>;
    async fn cancel_task(&self, id: TaskId) -> Result<()>;
    /// `next_run=None` also transitions the task to `status='completed'`
    /// (spec.md §6).
    async fn update_task_after_run(
        &self,
        id: TaskId,
        next_run: Option<DateTime<Utc>>,
        result_summary: &str,
    ) -> Result<()>;
    async fn schedule_retry(&self, id: TaskId, delay_ms: u64) -> Result<()>;
    async fn reset_retry_count(&self, id: TaskId) -> Result<()>;
    async fn log_task_run(&self, row: TaskRunLog) -> Result<()>;
    async fn get_task_run_logs(&self, id: TaskId, limit: i64) -> Result<Vec<TaskRunLog>>;
}

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `tasks`/`task_run_logs` tables if they don't exist. Callers
    /// running against a shared database may skip this and rely on a
    /// separate migration step instead.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                group_folder TEXT NOT NULL,
                chat_jid TEXT NOT NULL,
                prompt TEXT NOT NULL,
                schedule_type TEXT NOT NULL,
                schedule_value TEXT NOT NULL,
                context_mode TEXT NOT NULL,
                next_run TEXT,
                last_run TEXT,
                last_result TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 0,
                retry_delay_ms INTEGER NOT NULL DEFAULT 0,
                task_timeout_ms INTEGER,
                label TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_run_logs (
                task_id TEXT NOT NULL,
                ran_at TEXT NOT NULL,
                success INTEGER NOT NULL,
                summary TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn schedule_type_to_str(v: ScheduleType) -> &'static str {
    match v {
        ScheduleType::Cron => "cron",
        ScheduleType::Interval => "interval",
        ScheduleType::Once => "once",
    }
}

fn schedule_type_from_str(s: &str) -> Result<ScheduleType> {
    match s {
        "cron" => Ok(ScheduleType::Cron),
        "interval" => Ok(ScheduleType::Interval),
        "once" => Ok(ScheduleType::Once),
        other => anyhow::bail!("unknown schedule_type {other}"),
    }
}

fn context_mode_to_str(v: ContextMode) -> &'static str {
    match v {
        ContextMode::Group => "group",
        ContextMode::Isolated => "isolated",
    }
}

fn context_mode_from_str(s: &str) -> Result<ContextMode> {
    match s {
        "group" => Ok(ContextMode::Group),
        "isolated" => Ok(ContextMode::Isolated),
        other => anyhow::bail!("unknown context_mode {other}"),
    }
}

fn task_status_to_str(v: TaskStatus) -> &'static str {
    match v {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn task_status_from_str(s: &str) -> Result<TaskStatus> {
    match s {
        "active" => Ok(TaskStatus::Active),
        "paused" => Ok(TaskStatus::Paused),
        "completed" => Ok(TaskStatus::Completed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => anyhow::bail!("unknown task status {other}"),
    }
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn task_from_row(row: &SqliteRow) -> Result<ScheduledTask> {
    let id: String = row.try_get("id")?;
    let next_run: Option<String> = row.try_get("next_run")?;
    let last_run: Option<String> = row.try_get("last_run")?;

    Ok(ScheduledTask {
        id: id.parse().context("stored task id is not a valid uuid")?,
        group_folder: row.try_get("group_folder")?,
        chat_jid: row.try_get("chat_jid")?,
        prompt: row.try_get("prompt")?,
        schedule_type: schedule_type_from_str(&row.try_get::<String, _>("schedule_type")?)?,
        schedule_value: row.try_get("schedule_value")?,
        context_mode: context_mode_from_str(&row.try_get::<String, _>("context_mode")?)?,
        next_run: next_run.map(|s| parse_rfc3339(&s)).transpose()?,
        last_run: last_run.map(|s| parse_rfc3339(&s)).transpose()?,
        last_result: row.try_get("last_result")?,
        status: task_status_from_str(&row.try_get::<String, _>("status")?)?,
        created_at: parse_rfc3339(&row.try_get::<String, _>("created_at")?)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        retry_delay_ms: row.try_get::<i64, _>("retry_delay_ms")? as u64,
        task_timeout_ms: row.try_get::<Option<i64>, _>("task_timeout_ms")?.map(|v| v as u64),
        label: row.try_get("label")?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, group_folder, chat_jid, prompt, schedule_type, schedule_value,
                context_mode, next_run, last_run, last_result, status, created_at,
                retry_count, max_retries, retry_delay_ms, task_timeout_ms, label
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.group_folder)
        .bind(&task.chat_jid)
        .bind(&task.prompt)
        .bind(schedule_type_to_str(task.schedule_type))
        .bind(&task.schedule_value)
        .bind(context_mode_to_str(task.context_mode))
        .bind(task.next_run.map(rfc3339))
        .bind(task.last_run.map(rfc3339))
        .bind(&task.last_result)
        .bind(task_status_to_str(task.status))
        .bind(rfc3339(task.created_at))
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.retry_delay_ms as i64)
        .bind(task.task_timeout_ms.map(|v| v as i64))
        .bind(&task.label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task_by_id(&self, id: TaskId) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn get_due_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let now = rfc3339(Utc::now());
        let sentinel = claim_sentinel().to_rfc3339();
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status = 'active' AND next_run <= ? AND next_run <> ?
            ORDER BY next_run ASC
            "#,
        )
        .bind(&now)
        .bind(&sentinel)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn claim_task(&self, id: TaskId) -> Result<bool> {
        let now = rfc3339(Utc::now());
        let sentinel = claim_sentinel().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE tasks SET next_run = ?
            WHERE id = ? AND status = 'active' AND next_run <= ? AND next_run <> ?
            "#,
        )
        .bind(&sentinel)
        .bind(id.to_string())
        .bind(&now)
        .bind(&sentinel)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn recover_stale_claims(&self) -> Result<u64> {
        let now = rfc3339(Utc::now());
        let sentinel = claim_sentinel().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE tasks SET next_run = ? WHERE status = 'active' AND next_run = ?"#,
        )
        .bind(&now)
        .bind(&sentinel)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<()> {
        if let Some(status) = patch.status {
            sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
                .bind(task_status_to_str(status))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        if let Some(next_run) = patch.next_run {
            sqlx::query("UPDATE tasks SET next_run = ? WHERE id = ?")
                .bind(next_run.map(rfc3339))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        if let Some(label) = patch.label {
            sqlx::query("UPDATE tasks SET label = ? WHERE id = ?")
                .bind(label)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn cancel_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'cancelled' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_task_after_run(
        &self,
        id: TaskId,
        next_run: Option<DateTime<Utc>>,
        result_summary: &str,
    ) -> Result<()> {
        // Cancellation is terminal (I1): a cancelled task's in-flight run must
        // never resurrect it to 'completed' (spec.md §5).
        let status_clause = if next_run.is_none() { Some("completed") } else { None };
        sqlx::query(
            r#"
            UPDATE tasks
            SET next_run = ?, last_run = ?, last_result = ?,
                status = COALESCE(?, status)
            WHERE id = ? AND status != 'cancelled'
            "#,
        )
        .bind(next_run.map(rfc3339))
        .bind(rfc3339(Utc::now()))
        .bind(result_summary)
        .bind(status_clause)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_retry(&self, id: TaskId, delay_ms: u64) -> Result<()> {
        let next_run = rfc3339(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
        sqlx::query(
            r#"
            UPDATE tasks
            SET next_run = ?, retry_count = retry_count + 1
            WHERE id = ?
            "#,
        )
        .bind(next_run)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_retry_count(&self, id: TaskId) -> Result<()> {
        sqlx::query("UPDATE tasks SET retry_count = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_task_run(&self, row: TaskRunLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_run_logs (task_id, ran_at, success, summary) VALUES (?, ?, ?, ?)",
        )
        .bind(row.task_id.to_string())
        .bind(rfc3339(row.ran_at))
        .bind(row.success)
        .bind(row.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task_run_logs(&self, id: TaskId, limit: i64) -> Result<Vec<TaskRunLog>> {
        let rows = sqlx::query(
            "SELECT * FROM task_run_logs WHERE task_id = ? ORDER BY ran_at DESC LIMIT ?",
        )
        .bind(id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let task_id: String = row.try_get("task_id")?;
                let ran_at: String = row.try_get("ran_at")?;
                Ok(TaskRunLog {
                    task_id: task_id.parse().context("stored task_id is not a valid uuid")?,
                    ran_at: parse_rfc3339(&ran_at)?,
                    success: row.try_get("success")?,
                    summary: row.try_get("summary")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_protocol::claim_sentinel;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqliteTaskStore {
        let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let store = SqliteTaskStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    fn sample_task(next_run: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask {
            id: TaskId::new(),
            group_folder: "main".to_string(),
            chat_jid: "123@g.us".to_string(),
            prompt: "ping the server".to_string(),
            schedule_type: ScheduleType::Interval,
            schedule_value: "60000".to_string(),
            context_mode: ContextMode::Group,
            next_run: Some(next_run),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
            retry_delay_ms: 1_000,
            task_timeout_ms: None,
            label: Some("ping".to_string()),
        }
    }

    #[tokio::test]
    async fn claim_task_is_single_winner_under_double_claim() {
        let store = setup().await;
        let task = sample_task(DateTime::parse_from_rfc3339("2020-01-01T00:00:00.000Z").unwrap().with_timezone(&Utc));
        store.create_task(&task).await.unwrap();

        assert!(store.claim_task(task.id).await.unwrap());
        assert!(!store.claim_task(task.id).await.unwrap());

        let reloaded = store.get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_run, Some(claim_sentinel()));
        assert!(store.get_due_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recover_stale_claims_unsticks_orphaned_tasks() {
        let store = setup().await;
        let task = sample_task(DateTime::parse_from_rfc3339("2020-01-01T00:00:00.000Z").unwrap().with_timezone(&Utc));
        store.create_task(&task).await.unwrap();
        store.claim_task(task.id).await.unwrap();

        let recovered = store.recover_stale_claims().await.unwrap();
        assert_eq!(recovered, 1);

        let due = store.get_due_tasks().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, task.id);
    }

    #[tokio::test]
    async fn update_task_after_run_with_none_next_run_completes_once_task() {
        let store = setup().await;
        let task = sample_task(Utc::now() - chrono::Duration::seconds(5));
        store.create_task(&task).await.unwrap();

        store.update_task_after_run(task.id, None, "done").await.unwrap();
        let reloaded = store.get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Completed);
        assert_eq!(reloaded.next_run, None);
    }

    #[tokio::test]
    async fn cancel_task_is_idempotent() {
        let store = setup().await;
        let task = sample_task(Utc::now());
        store.create_task(&task).await.unwrap();

        store.cancel_task(task.id).await.unwrap();
        store.cancel_task(task.id).await.unwrap();
        let reloaded = store.get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Cancelled);
    }
}
