//! SQLite-backed job store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{check_create_request, check_progress_status};
use super::{
    ClaimOutcome, CreateJobRequest, ErrorCode, ExtractionJob, JobError, JobFilter, JobStatus,
    JobStore, TransitionOutcome,
};

const JOB_COLUMNS: &str = "id, user_id, job_type, source_url, source_path, mime_type, status, \
     progress, status_message, result_recipe_id, error_code, error_message, idempotency_key, \
     created_at, started_at, completed_at";

const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed', 'cancelled')";
const ACTIVE: &str = "status IN ('downloading', 'processing', 'extracting')";

/// Current time at the precision stored in the database.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width UTC timestamps so that string order matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {:?}: {}", value, e)))
}

/// SQLite-backed job store.
///
/// Correctness of concurrent claims comes from SQLite's single-statement
/// atomicity, so several processes may point at the same database file.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                source_url TEXT,
                source_path TEXT,
                mime_type TEXT,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                status_message TEXT,
                result_recipe_id TEXT,
                error_code TEXT,
                error_message TEXT,
                idempotency_key TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_extraction_jobs_idempotency
                ON extraction_jobs(user_id, idempotency_key)
                WHERE idempotency_key IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status ON extraction_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_extraction_jobs_started_at ON extraction_jobs(started_at);
            CREATE INDEX IF NOT EXISTS idx_extraction_jobs_user ON extraction_jobs(user_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("job store connection lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ExtractionJob> {
        let job_type: String = row.get(2)?;
        let source_path: Option<String> = row.get(4)?;
        let status: String = row.get(6)?;
        let progress: i64 = row.get(7)?;
        let created_at: String = row.get(13)?;
        let started_at: Option<String> = row.get(14)?;
        let completed_at: Option<String> = row.get(15)?;

        Ok(ExtractionJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            job_type: job_type.parse().map_err(|e| conversion_error(2, e))?,
            source_url: row.get(3)?,
            source_path: source_path.map(PathBuf::from),
            mime_type: row.get(5)?,
            status: status.parse().map_err(|e| conversion_error(6, e))?,
            progress: progress.clamp(0, 100) as u8,
            status_message: row.get(8)?,
            result_recipe_id: row.get(9)?,
            error_code: row.get(10)?,
            error_message: row.get(11)?,
            idempotency_key: row.get(12)?,
            created_at: parse_ts(13, &created_at)?,
            started_at: started_at.as_deref().map(|s| parse_ts(14, s)).transpose()?,
            completed_at: completed_at.as_deref().map(|s| parse_ts(15, s)).transpose()?,
        })
    }

    fn get_with(conn: &Connection, id: &str) -> Result<Option<ExtractionJob>, JobError> {
        let sql = format!("SELECT {} FROM extraction_jobs WHERE id = ?", JOB_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?)
    }

    fn current_status(conn: &Connection, id: &str) -> Result<Option<JobStatus>, JobError> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM extraction_jobs WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .map(|s| s.parse::<JobStatus>().map_err(JobError::Database))
            .transpose()
    }

    /// Turn an affected-row count into a transition outcome.
    fn outcome(conn: &Connection, id: &str, changed: usize) -> Result<TransitionOutcome, JobError> {
        if changed > 0 {
            return Ok(TransitionOutcome::Applied);
        }
        Ok(match Self::current_status(conn, id)? {
            Some(current) => TransitionOutcome::Rejected { current },
            None => TransitionOutcome::NotFound,
        })
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (where_clause, params)
    }

    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ExtractionJob>, JobError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<ExtractionJob, JobError> {
        check_create_request(&request)?;
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        let source_path = request
            .source_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());

        let inserted = conn.execute(
            "INSERT INTO extraction_jobs (id, user_id, job_type, source_url, source_path, mime_type, status, progress, status_message, idempotency_key, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, 'Queued', ?, ?, ?)",
            params![
                id,
                request.user_id,
                request.job_type.as_str(),
                request.source_url,
                source_path,
                request.mime_type,
                request.idempotency_key,
                ts(now),
                ts(now),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                let existing_id: String = conn.query_row(
                    "SELECT id FROM extraction_jobs WHERE user_id = ? AND idempotency_key = ?",
                    params![request.user_id, key],
                    |row| row.get(0),
                )?;
                return Err(JobError::Conflict { existing_id });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(ExtractionJob {
            id,
            user_id: request.user_id,
            job_type: request.job_type,
            source_url: request.source_url,
            source_path: request.source_path,
            mime_type: request.mime_type,
            status: JobStatus::Pending,
            progress: 0,
            status_message: Some("Queued".to_string()),
            result_recipe_id: None,
            error_code: None,
            error_message: None,
            idempotency_key: request.idempotency_key,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<ExtractionJob>, JobError> {
        let conn = self.lock()?;
        Self::get_with(&conn, id)
    }

    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<ExtractionJob>, JobError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM extraction_jobs WHERE user_id = ? AND idempotency_key = ?",
            JOB_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![user_id, key], Self::row_to_job)
            .optional()?)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<ExtractionJob>, JobError> {
        let conn = self.lock()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM extraction_jobs {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Self::query_jobs(&conn, &sql, param_refs.as_slice())
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.lock()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM extraction_jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<ExtractionJob>, JobError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM extraction_jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?",
            JOB_COLUMNS
        );
        Self::query_jobs(&conn, &sql, params![limit as i64])
    }

    fn claim(&self, id: &str) -> Result<ClaimOutcome, JobError> {
        let conn = self.lock()?;
        let now = ts(now());

        // The status predicate is the whole claim: exactly one writer can
        // observe a changed row.
        let changed = conn.execute(
            "UPDATE extraction_jobs SET status = 'downloading', started_at = ?, status_message = 'Starting', updated_at = ? WHERE id = ? AND status = 'pending' AND started_at IS NULL",
            params![now, now, id],
        )?;

        if changed == 1 {
            return match Self::get_with(&conn, id)? {
                Some(job) => Ok(ClaimOutcome::Claimed(job)),
                None => Ok(ClaimOutcome::NotFound),
            };
        }

        Ok(match Self::current_status(&conn, id)? {
            Some(_) => ClaimOutcome::AlreadyClaimed,
            None => ClaimOutcome::NotFound,
        })
    }

    fn update_progress(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        message: &str,
    ) -> Result<TransitionOutcome, JobError> {
        check_progress_status(status)?;
        let allowed = JobStatus::predecessors(status);
        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            "UPDATE extraction_jobs SET status = ?, progress = MAX(progress, ?), status_message = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(status.as_str()),
            Box::new(i64::from(progress.min(100))),
            Box::new(message.to_string()),
            Box::new(ts(now())),
            Box::new(id.to_string()),
        ];
        for s in allowed {
            values.push(Box::new(s.as_str()));
        }
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let conn = self.lock()?;
        let changed = conn.execute(&sql, refs.as_slice())?;
        Self::outcome(&conn, id, changed)
    }

    fn record_artifact(
        &self,
        id: &str,
        source_path: &Path,
        mime_type: &str,
    ) -> Result<TransitionOutcome, JobError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE extraction_jobs SET source_path = ?, mime_type = ?, updated_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );
        let changed = conn.execute(
            &sql,
            params![
                source_path.to_string_lossy(),
                mime_type,
                ts(now()),
                id
            ],
        )?;
        Self::outcome(&conn, id, changed)
    }

    fn mark_completed(&self, id: &str, recipe_id: &str) -> Result<TransitionOutcome, JobError> {
        let conn = self.lock()?;
        let now = ts(now());
        let sql = format!(
            "UPDATE extraction_jobs SET status = 'completed', result_recipe_id = ?, progress = 100, status_message = 'Recipe extracted', completed_at = ?, updated_at = ? WHERE id = ? AND {}",
            ACTIVE
        );
        let changed = conn.execute(&sql, params![recipe_id, now, now, id])?;
        Self::outcome(&conn, id, changed)
    }

    fn mark_failed(
        &self,
        id: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<TransitionOutcome, JobError> {
        let conn = self.lock()?;
        let now = ts(now());
        let sql = format!(
            "UPDATE extraction_jobs SET status = 'failed', error_code = ?, error_message = ?, status_message = 'Failed', completed_at = ?, updated_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );
        let changed = conn.execute(&sql, params![code.as_str(), message, now, now, id])?;
        Self::outcome(&conn, id, changed)
    }

    fn mark_cancelled(&self, id: &str) -> Result<TransitionOutcome, JobError> {
        let conn = self.lock()?;
        let now = ts(now());
        let sql = format!(
            "UPDATE extraction_jobs SET status = 'cancelled', status_message = 'Cancelled', completed_at = ?, updated_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );
        let changed = conn.execute(&sql, params![now, now, id])?;
        Self::outcome(&conn, id, changed)
    }

    fn list_stuck(&self, max_age: Duration) -> Result<Vec<ExtractionJob>, JobError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| JobError::InvalidRequest(format!("max_age out of range: {}", e)))?;
        let cutoff = ts(Utc::now() - max_age);

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM extraction_jobs WHERE {} AND started_at IS NOT NULL AND started_at < ? ORDER BY started_at ASC",
            JOB_COLUMNS, ACTIVE
        );
        Self::query_jobs(&conn, &sql, params![cutoff])
    }
}
