use crate::repository::JobRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estator_core::{EstatorError, EstatorResult, Job, JobStatus, JobType, NewJob};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    job_id           TEXT PRIMARY KEY,
    job_type         TEXT NOT NULL,
    status           TEXT NOT NULL,
    request_payload  TEXT NOT NULL,
    response_payload TEXT,
    error_message    TEXT,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    parent_job_id    TEXT REFERENCES jobs(job_id) ON DELETE SET NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    completed_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_parent ON jobs(parent_job_id);
";

const JOB_COLUMNS: &str = "job_id, job_type, status, request_payload, response_payload, \
                           error_message, retry_count, parent_job_id, created_at, updated_at, \
                           completed_at";

/// SQLite-backed job store. A single connection behind a mutex; the mutex
/// doubles as the atomicity guarantee for the compare-and-swap transition.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> EstatorResult<Self> {
        Self::from_connection(Connection::open(path).map_err(storage_err)?)
    }

    /// Open an in-memory store. Each call gets an independent database.
    pub fn open_in_memory() -> EstatorResult<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn from_connection(conn: Connection) -> EstatorResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch(conn: &Connection, job_id: &str) -> EstatorResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let mut rows = stmt
            .query_map(params![job_id], row_to_job)
            .map_err(storage_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(storage_err)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JobRepository for SqliteRepository {
    async fn create(&self, new_job: NewJob) -> EstatorResult<Job> {
        let conn = self.conn.lock();

        if let Some(parent) = &new_job.parent_job_id {
            if Self::fetch(&conn, parent)?.is_none() {
                return Err(EstatorError::NotFound(parent.clone()));
            }
        }
        if Self::fetch(&conn, &new_job.job_id)?.is_some() {
            return Err(EstatorError::AlreadyExists(new_job.job_id));
        }

        let job = new_job.into_job(Utc::now());
        conn.execute(
            "INSERT INTO jobs (job_id, job_type, status, request_payload, response_payload, \
             error_message, retry_count, parent_job_id, created_at, updated_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, NULL, NULL, 0, ?5, ?6, ?7, NULL)",
            params![
                job.job_id,
                job.job_type.to_string(),
                job.status.to_string(),
                job.request_payload.to_string(),
                job.parent_job_id,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        Ok(job)
    }

    async fn get(&self, job_id: &str) -> EstatorResult<Job> {
        let conn = self.conn.lock();
        Self::fetch(&conn, job_id)?.ok_or_else(|| EstatorError::NotFound(job_id.to_string()))
    }

    async fn transition(
        &self,
        job_id: &str,
        expected: JobStatus,
        new: JobStatus,
        response_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> EstatorResult<Job> {
        let conn = self.conn.lock();
        let current = Self::fetch(&conn, job_id)?
            .ok_or_else(|| EstatorError::NotFound(job_id.to_string()))?;

        if current.status != expected || !expected.can_transition_to(new) {
            return Err(EstatorError::Conflict {
                current: current.status,
            });
        }

        let now = Utc::now();
        let completed_at = new.is_terminal().then(|| now.to_rfc3339());
        let response = if new.is_terminal() {
            response_payload.map(|p| p.to_string())
        } else {
            None
        };
        let error = if new.is_terminal() { error_message } else { None };

        // The WHERE clause re-checks the status so a stale read can never win
        // the swap even across processes sharing the database file.
        let changed = conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2, \
                 completed_at = COALESCE(?3, completed_at), \
                 response_payload = COALESCE(?4, response_payload), \
                 error_message = COALESCE(?5, error_message) \
                 WHERE job_id = ?6 AND status = ?7",
                params![
                    new.to_string(),
                    now.to_rfc3339(),
                    completed_at,
                    response,
                    error,
                    job_id,
                    expected.to_string(),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            let row = Self::fetch(&conn, job_id)?
                .ok_or_else(|| EstatorError::NotFound(job_id.to_string()))?;
            return Err(EstatorError::Conflict { current: row.status });
        }

        Self::fetch(&conn, job_id)?.ok_or_else(|| EstatorError::NotFound(job_id.to_string()))
    }

    async fn list_children(&self, parent_job_id: &str) -> EstatorResult<Vec<Job>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE parent_job_id = ?1 ORDER BY created_at ASC, job_id ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![parent_job_id], row_to_job)
            .map_err(storage_err)?;
        rows.map(|r| r.map_err(storage_err)).collect()
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> EstatorResult<Vec<Job>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![status.to_string(), limit as i64], row_to_job)
            .map_err(storage_err)?;
        rows.map(|r| r.map_err(storage_err)).collect()
    }

    async fn list_stale_in_progress(&self, cutoff: DateTime<Utc>) -> EstatorResult<Vec<Job>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'in_progress' AND updated_at < ?1 \
             ORDER BY updated_at ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], row_to_job)
            .map_err(storage_err)?;
        rows.map(|r| r.map_err(storage_err)).collect()
    }

    async fn record_retry(&self, job_id: &str) -> EstatorResult<Job> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE jobs SET retry_count = retry_count + 1, updated_at = ?1 WHERE job_id = ?2",
                params![Utc::now().to_rfc3339(), job_id],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(EstatorError::NotFound(job_id.to_string()));
        }
        Self::fetch(&conn, job_id)?.ok_or_else(|| EstatorError::NotFound(job_id.to_string()))
    }

    async fn delete(&self, job_id: &str) -> EstatorResult<()> {
        let conn = self.conn.lock();
        // ON DELETE SET NULL orphans the children; they are never cascaded.
        let changed = conn
            .execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(EstatorError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> EstatorResult<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(storage_err)
    }
}

fn storage_err(e: rusqlite::Error) -> EstatorError {
    EstatorError::Storage(e.to_string())
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let job_type: String = row.get(1)?;
    let status: String = row.get(2)?;
    let request_payload: String = row.get(3)?;
    let response_payload: Option<String> = row.get(4)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;

    Ok(Job {
        job_id: row.get(0)?,
        job_type: JobType::parse(&job_type)
            .ok_or_else(|| invalid_column(1, format!("unknown job type: {job_type}")))?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| invalid_column(2, format!("unknown status: {status}")))?,
        request_payload: serde_json::from_str(&request_payload)
            .map_err(|e| invalid_column(3, e.to_string()))?,
        response_payload: response_payload
            .map(|s| serde_json::from_str(&s).map_err(|e| invalid_column(4, e.to_string())))
            .transpose()?,
        error_message: row.get(5)?,
        retry_count: row.get::<_, i64>(6)? as u32,
        parent_job_id: row.get(7)?,
        created_at: parse_ts(&created_at, 8)?,
        updated_at: parse_ts(&updated_at, 9)?,
        completed_at: completed_at.map(|s| parse_ts(&s, 10)).transpose()?,
    })
}

fn parse_ts(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid_column(column, e.to_string()))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_in_memory_and_ping() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_persisted_roundtrip() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let created = repo
            .create(NewJob::with_id(
                "j-1",
                JobType::Planning,
                json!({"query": "villas in goa", "context": {"budget": 20000000}}),
            ))
            .await
            .unwrap();

        let fetched = repo.get("j-1").await.unwrap();
        assert_eq!(fetched.job_id, created.job_id);
        assert_eq!(fetched.job_type, JobType::Planning);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.request_payload["context"]["budget"], 20000000);
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_cas_update_recheck() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create(NewJob::with_id("j-1", JobType::Planning, json!({})))
            .await
            .unwrap();

        repo.transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();
        let err = repo
            .transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EstatorError::Conflict {
                current: JobStatus::InProgress
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_write_is_atomic() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create(NewJob::with_id("j-1", JobType::Search, json!({})))
            .await
            .unwrap();
        repo.transition("j-1", JobStatus::Pending, JobStatus::InProgress, None, None)
            .await
            .unwrap();

        let job = repo
            .transition(
                "j-1",
                JobStatus::InProgress,
                JobStatus::Failed,
                None,
                Some("upstream 503".into()),
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("upstream 503"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fk_set_null_on_parent_delete() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create(NewJob::with_id("parent", JobType::Planning, json!({})))
            .await
            .unwrap();
        repo.create(NewJob::with_id("child", JobType::Search, json!({})).with_parent("parent"))
            .await
            .unwrap();

        repo.delete("parent").await.unwrap();

        let child = repo.get("child").await.unwrap();
        assert!(child.parent_job_id.is_none());
    }

    #[tokio::test]
    async fn test_reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.create(NewJob::with_id("j-1", JobType::Planning, json!({"q": 1})))
                .await
                .unwrap();
        }

        let repo = SqliteRepository::open(&path).unwrap();
        let job = repo.get("j-1").await.unwrap();
        assert_eq!(job.request_payload["q"], 1);
    }
}
