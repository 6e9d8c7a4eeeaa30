use super::{encode_json, Repository};
use crate::domain::{JobAction, JobStatus, PoolName, RawJob, TimeMs};
use crate::gateway::{GatewayError, JobQueue};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

/// A stored job with its reported outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub pool_name: String,
    pub action: String,
    pub details: serde_json::Value,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_ms: i64,
    pub updated_ms: i64,
}

fn parse_json_column(id: &str, column: &str, raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(job_id = %id, column, error = %e, "Failed to parse job JSON column, using null");
        serde_json::Value::Null
    })
}

fn parse_status(id: &str, raw: &str) -> JobStatus {
    JobStatus::parse(raw).unwrap_or_else(|| {
        warn!(job_id = %id, status = %raw, "Unknown job status, treating as failed");
        JobStatus::Failed
    })
}

fn job_record_from_row(row: &SqliteRow) -> JobRecord {
    let id: String = row.get("id");
    let details = parse_json_column(&id, "details", &row.get::<String, _>("details"));
    let result = row
        .get::<Option<String>, _>("result")
        .map(|raw| parse_json_column(&id, "result", &raw));
    let status = parse_status(&id, &row.get::<String, _>("status"));
    JobRecord {
        pool_name: row.get("pool"),
        action: row.get("action"),
        details,
        status,
        result,
        created_ms: row.get("created_ms"),
        updated_ms: row.get("updated_ms"),
        id,
    }
}

impl Repository {
    /// Queue a new pending job and return its id.
    ///
    /// The payload is stored as given; validation happens when the dispatcher
    /// picks the job up.
    pub async fn insert_job(
        &self,
        pool: &PoolName,
        action: &str,
        details: &serde_json::Value,
    ) -> Result<String, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let now = TimeMs::now().as_ms();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, pool, action, details, status, created_ms, updated_ms)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(pool.as_str())
        .bind(action)
        .bind(encode_json(details)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, pool, action, details, status, result, created_ms, updated_ms
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(job_record_from_row))
    }
}

#[async_trait]
impl JobQueue for Repository {
    async fn fetch_pending(&self) -> Result<Vec<RawJob>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT id, pool, action, details, status, result, created_ms, updated_ms
            FROM jobs
            WHERE status = 'pending'
            ORDER BY created_ms ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(job_record_from_row)
            .map(|job| RawJob {
                id: job.id,
                action: job.action,
                pool_name: job.pool_name,
                details: job.details,
                status: job.status,
            })
            .collect())
    }

    async fn report_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, result = ?, updated_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(encode_json(details)?)
        .bind(TimeMs::now().as_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    async fn enqueue(&self, pool: &PoolName, action: &JobAction) -> Result<String, GatewayError> {
        self.insert_job(pool, action.name(), &action.details()).await
    }
}
