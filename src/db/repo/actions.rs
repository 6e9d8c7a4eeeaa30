use super::{encode_json, Repository};
use crate::domain::{ActionKind, ActionRecord, Actor, PoolName, TimeMs};
use crate::gateway::{ActionLog, GatewayError};
use async_trait::async_trait;
use sqlx::Row;
use tracing::warn;

impl Repository {
    /// Insert an action record idempotently.
    ///
    /// Returns true if the record was newly inserted, false if a record with
    /// the same `action_key` already existed.
    pub async fn insert_action(&self, record: &ActionRecord) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            r#"
            INSERT INTO actions (action_key, pool, kind, actor, job_id, details, time_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(action_key) DO NOTHING
            "#,
        )
        .bind(record.action_key.as_str())
        .bind(record.pool.as_str())
        .bind(record.kind.as_str())
        .bind(encode_json(&record.actor)?)
        .bind(record.job_id.as_deref())
        .bind(encode_json(&record.details)?)
        .bind(record.timestamp.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent actions for a pool, newest first.
    ///
    /// Rows that no longer decode (unknown kind, bad JSON) are skipped with a
    /// warning rather than failing the whole page.
    pub async fn list_actions(
        &self,
        pool: &PoolName,
        limit: u32,
    ) -> Result<Vec<ActionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT action_key, pool, kind, actor, job_id, details, time_ms
            FROM actions
            WHERE pool = ?
            ORDER BY time_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(pool.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .filter_map(|row| {
                let action_key: String = row.get("action_key");
                let kind_str: String = row.get("kind");
                let actor_str: String = row.get("actor");
                let details_str: String = row.get("details");

                let Some(kind) = ActionKind::parse(&kind_str) else {
                    warn!(action_key = %action_key, kind = %kind_str, "Unknown action kind, skipping");
                    return None;
                };
                let actor: Actor = match serde_json::from_str(&actor_str) {
                    Ok(actor) => actor,
                    Err(e) => {
                        warn!(action_key = %action_key, error = %e, "Failed to parse actor, skipping");
                        return None;
                    }
                };
                let details = serde_json::from_str(&details_str).unwrap_or_else(|e| {
                    warn!(action_key = %action_key, error = %e, "Failed to parse action details, using null");
                    serde_json::Value::Null
                });

                Some(ActionRecord {
                    action_key,
                    pool: PoolName::new(row.get::<String, _>("pool")),
                    kind,
                    actor,
                    job_id: row.get("job_id"),
                    details,
                    timestamp: TimeMs::new(row.get("time_ms")),
                })
            })
            .collect();

        Ok(records)
    }
}

#[async_trait]
impl ActionLog for Repository {
    async fn record_action(&self, record: &ActionRecord) -> Result<(), GatewayError> {
        self.insert_action(record).await?;
        Ok(())
    }
}
