//! Repository layer for database operations.
//!
//! `Repository` implements the collaborator traits the engine and dispatcher
//! need, so a single SQLite file can stand in for the remote pool service.
//! Methods are organized across submodules by table:
//! - `pools.rs` - Holdings snapshots (`PoolStore`)
//! - `quotes.rs` - Latest bid/ask per pool asset (`QuoteSource`)
//! - `actions.rs` - Append-only action history (`ActionLog`)
//! - `jobs.rs` - Job queue and outcomes (`JobQueue`)

mod actions;
mod jobs;
mod pools;
mod quotes;

pub use jobs::JobRecord;

use crate::gateway::GatewayError;
use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Cheap connectivity check for the readiness endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode a JSON column, treating corruption as a permanent failure.
fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, GatewayError> {
    serde_json::from_str(raw)
        .map_err(|e| GatewayError::Parse(format!("{} column is not valid JSON: {}", column, e)))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, GatewayError> {
    serde_json::to_string(value).map_err(|e| GatewayError::Parse(e.to_string()))
}
