//! Persistence for [`HeartbeatJob`] rows (spec.md §6 "Heartbeat job analogs
//! with the same shapes" as the task store).

use agentflow_protocol::{HeartbeatJob, HeartbeatJobCategory, HeartbeatJobId, HeartbeatJobLog, HeartbeatJobStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

#[async_trait]
pub trait HeartbeatJobStore: Send + Sync {
    async fn create_job(&self, job: &HeartbeatJob) -> Result<()>;
    async fn get_job(&self, id: HeartbeatJobId) -> Result<Option<HeartbeatJob>>;
    async fn list_jobs(&self) -> Result<Vec<HeartbeatJob>>;
    async fn active_jobs(&self) -> Result<Vec<HeartbeatJob>>;
    async fn set_label(&self, id: HeartbeatJobId, label: String) -> Result<()>;
    async fn set_prompt(&self, id: HeartbeatJobId, prompt: String) -> Result<()>;
    async fn set_interval(&self, id: HeartbeatJobId, minutes: u64) -> Result<()>;
    async fn set_category(&self, id: HeartbeatJobId, category: HeartbeatJobCategory) -> Result<()>;
    async fn set_status(&self, id: HeartbeatJobId, status: HeartbeatJobStatus) -> Result<()>;
    async fn remove_job(&self, id: HeartbeatJobId) -> Result<()>;
    async fn record_run(&self, id: HeartbeatJobId, ran_at: DateTime<Utc>, success: bool, summary: &str) -> Result<()>;
    async fn log(&self, row: HeartbeatJobLog) -> Result<()>;
    async fn logs(&self, id: HeartbeatJobId, limit: i64) -> Result<Vec<HeartbeatJobLog>>;
}

pub struct SqliteHeartbeatJobStore {
    pool: SqlitePool,
}

impl SqliteHeartbeatJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heartbeat_jobs (
                id TEXT PRIMARY KEY,
                chat_jid TEXT NOT NULL,
                label TEXT NOT NULL,
                prompt TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                interval_ms INTEGER,
                last_run TEXT,
                last_result TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heartbeat_job_logs (
                job_id TEXT NOT NULL,
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

fn category_to_str(v: HeartbeatJobCategory) -> &'static str {
    match v {
        HeartbeatJobCategory::Learning => "learning",
        HeartbeatJobCategory::Monitor => "monitor",
        HeartbeatJobCategory::Health => "health",
        HeartbeatJobCategory::Custom => "custom",
    }
}

fn category_from_str(s: &str) -> Result<HeartbeatJobCategory> {
    match s {
        "learning" => Ok(HeartbeatJobCategory::Learning),
        "monitor" => Ok(HeartbeatJobCategory::Monitor),
        "health" => Ok(HeartbeatJobCategory::Health),
        "custom" => Ok(HeartbeatJobCategory::Custom),
        other => anyhow::bail!("unknown heartbeat job category {other}"),
    }
}

fn status_to_str(v: HeartbeatJobStatus) -> &'static str {
    match v {
        HeartbeatJobStatus::Active => "active",
        HeartbeatJobStatus::Paused => "paused",
    }
}

fn status_from_str(s: &str) -> Result<HeartbeatJobStatus> {
    match s {
        "active" => Ok(HeartbeatJobStatus::Active),
        "paused" => Ok(HeartbeatJobStatus::Paused),
        other => anyhow::bail!("unknown heartbeat job status {other}"),
    }
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn job_from_row(row: &SqliteRow) -> Result<HeartbeatJob> {
    let id: String = row.try_get("id")?;
    let last_run: Option<String> = row.try_get("last_run")?;

    Ok(HeartbeatJob {
        id: id.parse().context("stored heartbeat job id is not a valid uuid")?,
        chat_jid: row.try_get("chat_jid")?,
        label: row.try_get("label")?,
        prompt: row.try_get("prompt")?,
        category: category_from_str(&row.try_get::<String, _>("category")?)?,
        status: status_from_str(&row.try_get::<String, _>("status")?)?,
        interval_ms: row.try_get::<Option<i64>, _>("interval_ms")?.map(|v| v as u64),
        last_run: last_run.map(|s| parse_rfc3339(&s)).transpose()?,
        last_result: row.try_get("last_result")?,
        created_at: parse_rfc3339(&row.try_get::<String, _>("created_at")?)?,
        created_by: row.try_get("created_by")?,
    })
}

#[async_trait]
impl HeartbeatJobStore for SqliteHeartbeatJobStore {
    async fn create_job(&self, job: &HeartbeatJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeat_jobs (
                id, chat_jid, label, prompt, category, status, interval_ms,
                last_run, last_result, created_at, created_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.chat_jid)
        .bind(&job.label)
        .bind(&job.prompt)
        .bind(category_to_str(job.category))
        .bind(status_to_str(job.status))
        .bind(job.interval_ms.map(|v| v as i64))
        .bind(job.last_run.map(rfc3339))
        .bind(&job.last_result)
        .bind(rfc3339(job.created_at))
        .bind(&job.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: HeartbeatJobId) -> Result<Option<HeartbeatJob>> {
        let row = sqlx::query("SELECT * FROM heartbeat_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<HeartbeatJob>> {
        let rows = sqlx::query("SELECT * FROM heartbeat_jobs ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn active_jobs(&self) -> Result<Vec<HeartbeatJob>> {
        let rows = sqlx::query("SELECT * FROM heartbeat_jobs WHERE status = 'active' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn set_label(&self, id: HeartbeatJobId, label: String) -> Result<()> {
        sqlx::query("UPDATE heartbeat_jobs SET label = ? WHERE id = ?")
            .bind(label)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_prompt(&self, id: HeartbeatJobId, prompt: String) -> Result<()> {
        sqlx::query("UPDATE heartbeat_jobs SET prompt = ? WHERE id = ?")
            .bind(prompt)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_interval(&self, id: HeartbeatJobId, minutes: u64) -> Result<()> {
        sqlx::query("UPDATE heartbeat_jobs SET interval_ms = ? WHERE id = ?")
            .bind((minutes * 60_000) as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_category(&self, id: HeartbeatJobId, category: HeartbeatJobCategory) -> Result<()> {
        sqlx::query("UPDATE heartbeat_jobs SET category = ? WHERE id = ?")
            .bind(category_to_str(category))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(&self, id: HeartbeatJobId, status: HeartbeatJobStatus) -> Result<()> {
        sqlx::query("UPDATE heartbeat_jobs SET status = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_job(&self, id: HeartbeatJobId) -> Result<()> {
        sqlx::query("DELETE FROM heartbeat_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_run(&self, id: HeartbeatJobId, ran_at: DateTime<Utc>, success: bool, summary: &str) -> Result<()> {
        let _ = success;
        sqlx::query("UPDATE heartbeat_jobs SET last_run = ?, last_result = ? WHERE id = ?")
            .bind(rfc3339(ran_at))
            .bind(summary)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log(&self, row: HeartbeatJobLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO heartbeat_job_logs (job_id, ran_at, success, summary) VALUES (?, ?, ?, ?)",
        )
        .bind(row.job_id.to_string())
        .bind(rfc3339(row.ran_at))
        .bind(row.success)
        .bind(row.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs(&self, id: HeartbeatJobId, limit: i64) -> Result<Vec<HeartbeatJobLog>> {
        let rows = sqlx::query(
            "SELECT * FROM heartbeat_job_logs WHERE job_id = ? ORDER BY ran_at DESC LIMIT ?",
        )
        .bind(id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let job_id: String = row.try_get("job_id")?;
                let ran_at: String = row.try_get("ran_at")?;
                Ok(HeartbeatJobLog {
                    job_id: job_id.parse().context("stored job_id is not a valid uuid")?,
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
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqliteHeartbeatJobStore {
        let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        let store = SqliteHeartbeatJobStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    fn sample_job() -> HeartbeatJob {
        HeartbeatJob {
            id: HeartbeatJobId::new(),
            chat_jid: "123@g.us".to_string(),
            label: "Disk check".to_string(),
            prompt: "check free disk space".to_string(),
            category: HeartbeatJobCategory::Monitor,
            status: HeartbeatJobStatus::Active,
            interval_ms: Some(1_800_000),
            last_run: None,
            last_result: None,
            created_at: Utc::now(),
            created_by: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_roundtrips() {
        let store = setup().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.label, "Disk check");
        assert_eq!(fetched.category, HeartbeatJobCategory::Monitor);
    }

    #[tokio::test]
    async fn pause_removes_job_from_active_list() {
        let store = setup().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();

        store.set_status(job.id, HeartbeatJobStatus::Paused).await.unwrap();
        assert!(store.active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_job_deletes_it() {
        let store = setup().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        store.remove_job(job.id).await.unwrap();
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }
}
