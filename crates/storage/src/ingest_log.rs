//! Crash-safe per-file processing log.
//!
//! Every source file gets one row keyed by (bucket, file_path). Workers move
//! the row through `pending → processing → completed | failed` using single
//! conditional UPDATE statements, so at most one worker holds a file at a
//! time without any extra locking primitive. A `processing` row whose lock
//! timestamp has gone stale is treated as a crashed worker and reclaimed.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use raster_common::{RasterError, RasterResult};

/// Attempts after which a failed file is left for manual intervention.
pub const MAX_RETRIES: i32 = 3;

/// Minutes after which a `processing` lock is considered abandoned.
pub const LOCK_TIMEOUT_MINUTES: i64 = 30;

/// Stored error messages are truncated to this many characters.
const MAX_ERROR_LENGTH: usize = 2000;

/// Processing state of one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Pending => "pending",
            IngestState::Processing => "processing",
            IngestState::Completed => "completed",
            IngestState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for IngestState {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IngestState::Pending),
            "processing" => Ok(IngestState::Processing),
            "completed" => Ok(IngestState::Completed),
            "failed" => Ok(IngestState::Failed),
            other => Err(RasterError::InternalError(format!(
                "unknown ingest state '{}'",
                other
            ))),
        }
    }
}

/// One row of the processing log.
#[derive(Debug, Clone)]
pub struct IngestLogEntry {
    pub bucket: String,
    pub file_path: String,
    pub state: IngestState,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub archive_path: Option<String>,
    pub items_created: Option<i32>,
    pub assets_created: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable processing log backed by PostgreSQL.
pub struct IngestLog {
    pool: PgPool,
}

impl IngestLog {
    /// Connect with a fresh pool.
    pub async fn connect(database_url: &str) -> RasterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RasterError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Reuse an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the log table if missing.
    pub async fn migrate(&self) -> RasterResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RasterError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Record a newly observed file as `pending`. Returns false when the file
    /// was already known (re-delivery is a no-op).
    #[instrument(skip(self))]
    pub async fn register(&self, bucket: &str, file_path: &str) -> RasterResult<bool> {
        let result = sqlx::query(
            "INSERT INTO ingestion_log (id, bucket, file_path, status) \
             VALUES ($1, $2, $3, 'pending') \
             ON CONFLICT (bucket, file_path) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(file_path)
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Insert failed: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Try to take the processing lock for a file.
    ///
    /// First claims a `pending` row or a `failed` row with retries remaining;
    /// if neither matched, claims a `processing` row whose lock went stale
    /// (crashed worker). Each branch is one conditional UPDATE, so two
    /// workers racing for the same file cannot both win.
    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        bucket: &str,
        file_path: &str,
        worker_id: &str,
    ) -> RasterResult<bool> {
        let result = sqlx::query(
            "UPDATE ingestion_log SET \
                 status = 'processing', \
                 locked_by = $3, \
                 locked_at = NOW(), \
                 retry_count = retry_count + 1, \
                 updated_at = NOW() \
             WHERE bucket = $1 AND file_path = $2 \
               AND (status = 'pending' OR (status = 'failed' AND retry_count < $4))",
        )
        .bind(bucket)
        .bind(file_path)
        .bind(worker_id)
        .bind(MAX_RETRIES)
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Lock update failed: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(LOCK_TIMEOUT_MINUTES);
        let result = sqlx::query(
            "UPDATE ingestion_log SET \
                 locked_by = $3, \
                 locked_at = NOW(), \
                 updated_at = NOW() \
             WHERE bucket = $1 AND file_path = $2 \
               AND status = 'processing' AND locked_at < $4",
        )
        .bind(bucket)
        .bind(file_path)
        .bind(worker_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Lock update failed: {}", e)))?;

        if result.rows_affected() > 0 {
            debug!(file_path, worker = worker_id, "Reclaimed stale lock");
            return Ok(true);
        }

        Ok(false)
    }

    /// Terminal success: store the archive destination and creation counts.
    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        bucket: &str,
        file_path: &str,
        archive_path: Option<&str>,
        items: u32,
        assets: u32,
    ) -> RasterResult<()> {
        sqlx::query(
            "UPDATE ingestion_log SET \
                 status = 'completed', \
                 locked_by = NULL, \
                 locked_at = NULL, \
                 last_error = NULL, \
                 archive_path = $3, \
                 items_created = $4, \
                 assets_created = $5, \
                 updated_at = NOW() \
             WHERE bucket = $1 AND file_path = $2",
        )
        .bind(bucket)
        .bind(file_path)
        .bind(archive_path)
        .bind(items as i32)
        .bind(assets as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Update failed: {}", e)))?;

        Ok(())
    }

    /// Record a failure and release the lock so a later acquire can retry.
    #[instrument(skip(self, error))]
    pub async fn mark_failed(&self, bucket: &str, file_path: &str, error: &str) -> RasterResult<()> {
        sqlx::query(
            "UPDATE ingestion_log SET \
                 status = 'failed', \
                 locked_by = NULL, \
                 locked_at = NULL, \
                 last_error = $3, \
                 updated_at = NOW() \
             WHERE bucket = $1 AND file_path = $2",
        )
        .bind(bucket)
        .bind(file_path)
        .bind(truncate_error(error))
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Update failed: {}", e)))?;

        Ok(())
    }

    /// Bulk-return stale `processing` rows to `pending`. Returns how many
    /// locks were reset.
    pub async fn reset_stale_locks(&self) -> RasterResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(LOCK_TIMEOUT_MINUTES);
        let result = sqlx::query(
            "UPDATE ingestion_log SET \
                 status = 'pending', \
                 locked_by = NULL, \
                 locked_at = NULL, \
                 updated_at = NOW() \
             WHERE status = 'processing' AND locked_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Update failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Whether the file has ever been registered.
    pub async fn is_known(&self, bucket: &str, file_path: &str) -> RasterResult<bool> {
        let known = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM ingestion_log WHERE bucket = $1 AND file_path = $2)",
        )
        .bind(bucket)
        .bind(file_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(known)
    }

    /// Whether the file has completed successfully.
    pub async fn is_done(&self, bucket: &str, file_path: &str) -> RasterResult<bool> {
        let done = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM ingestion_log \
             WHERE bucket = $1 AND file_path = $2 AND status = 'completed')",
        )
        .bind(bucket)
        .bind(file_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(done)
    }

    /// Failed entries with retries remaining, oldest first.
    pub async fn get_retryable(&self, limit: i64) -> RasterResult<Vec<IngestLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT bucket, file_path, status, locked_by, locked_at, retry_count, \
                    last_error, archive_path, items_created, assets_created, \
                    created_at, updated_at \
             FROM ingestion_log \
             WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY updated_at ASC LIMIT $2",
        )
        .bind(MAX_RETRIES)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Query failed: {}", e)))?;

        rows.into_iter().map(IngestLogEntry::try_from).collect()
    }

    /// Failed entries out of retries; these need manual intervention.
    pub async fn get_permanently_failed(&self) -> RasterResult<Vec<IngestLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT bucket, file_path, status, locked_by, locked_at, retry_count, \
                    last_error, archive_path, items_created, assets_created, \
                    created_at, updated_at \
             FROM ingestion_log \
             WHERE status = 'failed' AND retry_count >= $1 \
             ORDER BY updated_at DESC",
        )
        .bind(MAX_RETRIES)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Query failed: {}", e)))?;

        rows.into_iter().map(IngestLogEntry::try_from).collect()
    }
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LENGTH).collect()
}

/// Internal row type for database queries.
#[derive(FromRow)]
struct LogRow {
    bucket: String,
    file_path: String,
    status: String,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    archive_path: Option<String>,
    items_created: Option<i32>,
    assets_created: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for IngestLogEntry {
    type Error = RasterError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(IngestLogEntry {
            state: row.status.parse()?,
            bucket: row.bucket,
            file_path: row.file_path,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            retry_count: row.retry_count,
            last_error: row.last_error,
            archive_path: row.archive_path,
            items_created: row.items_created,
            assets_created: row.assets_created,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ingestion_log (
    id UUID PRIMARY KEY,
    bucket VARCHAR(50) NOT NULL,
    file_path TEXT NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    locked_by VARCHAR(100),
    locked_at TIMESTAMPTZ,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    archive_path TEXT,
    items_created INTEGER,
    assets_created INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE(bucket, file_path)
);

CREATE INDEX IF NOT EXISTS idx_ingestion_log_status ON ingestion_log(status);
CREATE INDEX IF NOT EXISTS idx_ingestion_log_locked_at ON ingestion_log(locked_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_caps_length() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LENGTH);

        let short = "file not found";
        assert_eq!(truncate_error(short), short);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let wide = "é".repeat(3000);
        let truncated = truncate_error(&wide);
        assert_eq!(truncated.chars().count(), MAX_ERROR_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            IngestState::Pending,
            IngestState::Processing,
            IngestState::Completed,
            IngestState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<IngestState>().unwrap(), state);
        }
    }

    #[test]
    fn test_state_rejects_unknown() {
        assert!("available".parse::<IngestState>().is_err());
    }
}
