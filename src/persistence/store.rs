//! SQLite-based run history

use crate::core::{
    error::AuditError,
    state::{ActionOutcome, AttemptRecord, PipelineRun, RunStatus},
};
use crate::persistence::{AuditSink, RunReport};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// One row of run history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHistory {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failed_stage: Option<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
}

/// SQLite run history store
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

fn store_err(e: sqlx::Error) -> AuditError {
    AuditError::Store(e.to_string())
}

impl SqliteAuditStore {
    /// Open (creating if needed) a store at `db_path`; `:memory:` for an ephemeral one
    pub async fn new(db_path: &str) -> Result<Self, AuditError> {
        let options = if db_path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(store_err)?
        } else {
            SqliteConnectOptions::new().filename(db_path).create_if_missing(true)
        };
        // single connection: an in-memory database is private to its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self, AuditError> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("bak2cloud");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("history.db");
        Self::new(&db_path.to_string_lossy()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), AuditError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                failed_stage TEXT,
                last_error TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                run_id TEXT NOT NULL REFERENCES runs(id),
                seq INTEGER NOT NULL,
                stage_name TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                success INTEGER NOT NULL,
                artifact_ref TEXT,
                error_detail TEXT,
                PRIMARY KEY (run_id, seq)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> RunStatus {
        match status {
            "Running" => RunStatus::Running,
            "Succeeded" => RunStatus::Succeeded,
            "Failed" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }

    fn history_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RunHistory, AuditError> {
        Ok(RunHistory {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))
                .map_err(|e| AuditError::Store(e.to_string()))?,
            pipeline_name: row.get("pipeline_name"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            ended_at: row
                .get::<Option<NaiveDateTime>, _>("ended_at")
                .map(Self::from_naive),
            failed_stage: row.get("failed_stage"),
            last_error: row.get("last_error"),
            attempts: row.get::<i64, _>("attempts") as u32,
        })
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunHistory>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.pipeline_name, r.status, r.started_at, r.ended_at, r.failed_stage, r.last_error,
                   (SELECT COUNT(*) FROM attempts a WHERE a.run_id = r.id) AS attempts
            FROM runs r
            ORDER BY r.started_at DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::history_from_row).collect()
    }

    /// A run and its attempts, in recorded order
    pub async fn load_run(&self, run_id: Uuid) -> Result<Option<(RunHistory, Vec<AttemptRecord>)>, AuditError> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.pipeline_name, r.status, r.started_at, r.ended_at, r.failed_stage, r.last_error,
                   (SELECT COUNT(*) FROM attempts a WHERE a.run_id = r.id) AS attempts
            FROM runs r
            WHERE r.id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let history = Self::history_from_row(&row)?;

        let rows = sqlx::query(
            r#"
            SELECT stage_name, attempt_number, started_at, ended_at, success, artifact_ref, error_detail
            FROM attempts
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let attempts = rows
            .iter()
            .map(|row| AttemptRecord {
                stage_name: row.get("stage_name"),
                attempt_number: row.get::<i64, _>("attempt_number") as u32,
                started_at: Self::from_naive(row.get("started_at")),
                ended_at: Self::from_naive(row.get("ended_at")),
                outcome: ActionOutcome {
                    success: row.get::<i64, _>("success") != 0,
                    produced_artifact_ref: row.get("artifact_ref"),
                    error_detail: row.get("error_detail"),
                },
            })
            .collect();

        Ok(Some((history, attempts)))
    }
}

#[async_trait::async_trait]
impl AuditSink for SqliteAuditStore {
    fn name(&self) -> &str {
        "history"
    }

    async fn begin_run(&self, run: &PipelineRun) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs (id, pipeline_name, status, started_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(format!("{:?}", run.status))
        .bind(Self::to_naive(run.overall_start.unwrap_or_else(Utc::now)))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn append(&self, run_id: Uuid, record: &AttemptRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO attempts
            (run_id, seq, stage_name, attempt_number, started_at, ended_at, success, artifact_ref, error_detail)
            VALUES (?1, (SELECT COUNT(*) FROM attempts WHERE run_id = ?1), ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run_id.to_string())
        .bind(&record.stage_name)
        .bind(i64::from(record.attempt_number))
        .bind(Self::to_naive(record.started_at))
        .bind(Self::to_naive(record.ended_at))
        .bind(i64::from(record.outcome.success))
        .bind(record.outcome.produced_artifact_ref.as_deref())
        .bind(record.outcome.error_detail.as_deref())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn finish_run(&self, report: &RunReport) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = ?2, ended_at = ?3, failed_stage = ?4, last_error = ?5
            WHERE id = ?1
            "#,
        )
        .bind(report.run_id.to_string())
        .bind(format!("{:?}", report.status))
        .bind(report.ended_at.map(Self::to_naive))
        .bind(report.failure.as_ref().map(|f| f.stage_name.clone()))
        .bind(report.failure.as_ref().map(|f| f.last_error.clone()))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}
