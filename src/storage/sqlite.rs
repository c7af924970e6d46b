//! SQLite storage backend for folio

use super::traits::{JobStore, OpenStore, StorageResult};
use crate::job::{DocumentJob, JobId};
use crate::usage::UsageEntry;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed job store
///
/// One table of job snapshots (status and timestamps broken out for
/// listing, the full job as JSON) and one append-only usage table.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                job_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_created
                ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS usage (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                job_id TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                entry_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_user
                ON usage(user);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl JobStore for SqliteStore {
    fn save_job(&self, job: &DocumentJob) -> StorageResult<()> {
        let job_json = serde_json::to_string(job)?;
        self.conn().execute(
            r#"
            INSERT INTO jobs (id, status, document, created_at, updated_at, job_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                document = excluded.document,
                updated_at = excluded.updated_at,
                job_json = excluded.job_json
            "#,
            params![
                job.id.as_str(),
                job.status.as_str(),
                job.display_name(),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job_json,
            ],
        )?;
        Ok(())
    }

    fn load_job(&self, id: &JobId) -> StorageResult<Option<DocumentJob>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT job_json FROM jobs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn load_jobs(&self) -> StorageResult<Vec<DocumentJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT job_json FROM jobs ORDER BY created_at, rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut jobs = Vec::new();
        for json in rows {
            jobs.push(serde_json::from_str(&json?)?);
        }
        Ok(jobs)
    }

    fn delete_job(&self, id: &JobId) -> StorageResult<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.as_str()])?;
        Ok(deleted > 0)
    }

    fn record_usage(&self, entry: &UsageEntry) -> StorageResult<()> {
        let entry_json = serde_json::to_string(entry)?;
        self.conn().execute(
            "INSERT INTO usage (user, job_id, recorded_at, entry_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.user,
                entry.job_id.as_str(),
                entry.timestamp.to_rfc3339(),
                entry_json,
            ],
        )?;
        Ok(())
    }

    fn load_usage(&self) -> StorageResult<Vec<UsageEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT entry_json FROM usage ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for json in rows {
            entries.push(serde_json::from_str(&json?)?);
        }
        Ok(entries)
    }
}
