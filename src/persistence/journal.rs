//! Local JSON-lines journal of attempts plus one summary file per run

use crate::core::{
    error::AuditError,
    state::{AttemptRecord, PipelineRun},
};
use crate::persistence::{AuditSink, RunReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Journal file name inside the audit directory
pub const JOURNAL_FILE: &str = "attempts.jsonl";

/// One line of the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub record: AttemptRecord,
}

/// Appends every attempt to `<dir>/attempts.jsonl` and writes
/// `<dir>/<run_id>.summary.json` when a run finishes
#[derive(Debug, Clone)]
pub struct JsonlJournal {
    dir: PathBuf,
}

impl JsonlJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    pub fn summary_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.summary.json", run_id))
    }

    /// Read back every journal entry, oldest first
    pub async fn entries(&self) -> Result<Vec<JournalEntry>, AuditError> {
        let content = match tokio::fs::read_to_string(self.journal_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(AuditError::from))
            .collect()
    }

    async fn append_line(path: &Path, line: &str) -> Result<(), AuditError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditSink for JsonlJournal {
    fn name(&self) -> &str {
        "journal"
    }

    async fn begin_run(&self, _run: &PipelineRun) -> Result<(), AuditError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn append(&self, run_id: Uuid, record: &AttemptRecord) -> Result<(), AuditError> {
        let entry = JournalEntry {
            run_id,
            record: record.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        Self::append_line(&self.journal_path(), &line).await
    }

    async fn finish_run(&self, report: &RunReport) -> Result<(), AuditError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(self.summary_path(report.run_id), json).await?;
        Ok(())
    }
}
