use std::path::Path;

use chrono::{SecondsFormat, Utc};
use fieldflow_utils::ExecutionError;
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::RunReport;

/// SQLite-backed ledger of pipeline run outcomes.
///
/// Only outcomes are stored; pipeline definitions live with the caller.
pub struct Store {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Store {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                rows_read INTEGER,
                rows_written INTEGER,
                batches INTEGER,
                watermark TEXT,
                failed_stage TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_pipeline ON pipeline_runs(pipeline);
            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status);",
        )?;
        Ok(())
    }

    /// Record a run as started, before handing it to the engine.
    pub fn record_started(&self, run_id: &str, pipeline: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO pipeline_runs (id, pipeline, status, started_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![run_id, pipeline, now()],
        )?;
        Ok(())
    }

    /// Store a successful outcome. The report's own run id is used, creating
    /// the row when [`record_started`](Store::record_started) was skipped.
    pub fn record_success(&self, report: &RunReport) -> Result<(), rusqlite::Error> {
        let finished = now();
        self.conn.execute(
            "INSERT INTO pipeline_runs
                (id, pipeline, status, started_at, finished_at, duration_ms,
                 rows_read, rows_written, batches, watermark)
             VALUES (?1, ?2, 'completed', ?3, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = 'completed', finished_at = ?3, duration_ms = ?4,
                rows_read = ?5, rows_written = ?6, batches = ?7, watermark = ?8",
            params![
                report.run_id,
                report.pipeline,
                finished,
                report.duration_ms as i64,
                report.rows_read as i64,
                report.rows_processed as i64,
                report.batches as i64,
                report.watermark,
            ],
        )?;
        Ok(())
    }

    /// Store a failure for a run previously recorded as started.
    pub fn record_failure(
        &self,
        run_id: &str,
        error: &ExecutionError,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE pipeline_runs
             SET status = 'failed', finished_at = ?2, rows_written = ?3,
                 failed_stage = ?4, error = ?5
             WHERE id = ?1",
            params![
                run_id,
                now(),
                error.rows_written as i64,
                error.stage.as_str(),
                error.message,
            ],
        )?;
        Ok(())
    }

    /// Mark in-flight runs as crashed (for crash recovery on startup).
    pub fn mark_inflight_as_crashed(&self) -> Result<usize, rusqlite::Error> {
        let count = self.conn.execute(
            "UPDATE pipeline_runs SET status = 'crashed' WHERE status = 'running'",
            [],
        )?;
        Ok(count)
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<PipelineRunRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, pipeline, status, started_at, finished_at, duration_ms,
                    rows_read, rows_written, watermark, failed_stage, error
             FROM pipeline_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PipelineRunRow {
                id: row.get(0)?,
                pipeline: row.get(1)?,
                status: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                duration_ms: row.get(5)?,
                rows_read: row.get(6)?,
                rows_written: row.get(7)?,
                watermark: row.get(8)?,
                failed_stage: row.get(9)?,
                error: row.get(10)?,
            })
        })?;
        rows.collect()
    }

    /// Watermark of the latest completed run that reported one.
    pub fn last_watermark(&self, pipeline: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT watermark FROM pipeline_runs
                 WHERE pipeline = ?1 AND status = 'completed' AND watermark IS NOT NULL
                 ORDER BY finished_at DESC, rowid DESC LIMIT 1",
                params![pipeline],
                |row| row.get(0),
            )
            .optional()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRunRow {
    pub id: String,
    pub pipeline: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub rows_read: Option<i64>,
    pub rows_written: Option<i64>,
    pub watermark: Option<String>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}
