//! Schema setup for the local pool database.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// Bumped whenever `schema.sql` changes shape. Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the SQLite file at `db_path` and bring its
/// schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .after_connect(|conn, _meta| Box::pin(async move { apply_pragmas(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    migrate(&pool).await?;

    info!(path = %db_path, version = SCHEMA_VERSION, "Pool database ready");
    Ok(pool)
}

/// Apply `schema.sql` when the stored version is behind. Every statement is
/// `IF NOT EXISTS`, so re-running is harmless.
async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let current: i64 = sqlx::query("PRAGMA user_version")
        .fetch_one(pool)
        .await?
        .get(0);
    if current >= SCHEMA_VERSION {
        debug!(version = current, "Schema up to date");
        return Ok(());
    }

    info!(from = current, to = SCHEMA_VERSION, "Migrating pool database");
    let mut tx = pool.begin().await?;
    for statement in include_str!("schema.sql").split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
    }
    // PRAGMA does not accept bound parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// WAL journal with a busy timeout: the dispatcher writes while the API reads.
async fn apply_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    // journal_mode reports the mode actually in effect
    let journal_mode: String = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    debug!(journal_mode = %journal_mode, "SQLite connection opened");

    for pragma in [
        "PRAGMA foreign_keys = ON",
        "PRAGMA busy_timeout = 5000",
        "PRAGMA synchronous = NORMAL",
    ] {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}
