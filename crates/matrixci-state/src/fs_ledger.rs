//! Filesystem-backed `RunLedger`.
//!
//! Layout: `<root>/runs/<run-id>/record.json` (rewritten atomically) and
//! `<root>/runs/<run-id>/events.jsonl` (one `RunEvent` per line, append-only).

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

const RECORD_FILE: &str = "record.json";
const EVENTS_FILE: &str = "events.jsonl";

/// Run ledger that persists runs as JSON files under a root directory.
pub struct FsRunLedger {
    runs_dir: PathBuf,
    // Highest seq appended per run; serialises writers within this process.
    last_seq: Mutex<HashMap<String, u64>>,
}

impl FsRunLedger {
    /// Open (or create) a ledger rooted at `root`. Creates `root/runs/` if needed.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        debug!(path = %runs_dir.display(), "opened filesystem run ledger");
        Ok(Self {
            runs_dir,
            last_seq: Mutex::new(HashMap::new()),
        })
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(&run_id.0)
    }

    fn read_record(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        check_run_id(run_id)?;
        let path = self.run_dir(run_id).join(RECORD_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_record(&self, record: &RunRecord) -> StorageResult<()> {
        let dir = self.run_dir(&record.run_id);
        fs::create_dir_all(&dir)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.flush()?;
        tmp.persist(dir.join(RECORD_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let path = self.run_dir(run_id).join(EVENTS_FILE);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str::<RunEvent>(&line)?);
        }
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    fn finish(&self, run_id: &RunId, status: RunStatus, summary: RunSummary) -> StorageResult<()> {
        let mut last_seq = self.last_seq.lock().unwrap();
        let mut record = self.read_record(run_id)?;
        ensure_running(run_id, &record.status)?;
        record.status = status;
        record.summary = Some(summary);
        record.completed_at = Some(Utc::now());
        self.write_record(&record)?;
        // Finished runs accept no more events.
        last_seq.remove(&run_id.0);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_runs(&self) -> usize {
        self.last_seq.lock().unwrap().len()
    }
}

/// Run IDs name a directory directly under `runs/`.
fn check_run_id(run_id: &RunId) -> StorageResult<()> {
    let id = run_id.0.as_str();
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(StorageError::InvalidRunId {
            run_id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl RunLedger for FsRunLedger {
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let record = RunRecord {
            run_id: run_id.clone(),
            spec_digest: spec_digest.clone(),
            metadata,
            status: RunStatus::Running,
            summary: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.write_record(&record)?;
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut last_seq = self.last_seq.lock().unwrap();
        let record = self.read_record(run_id)?;
        ensure_running(run_id, &record.status)?;

        let last = match last_seq.get(&run_id.0) {
            Some(seq) => Some(*seq),
            None => self.read_events(run_id)?.last().map(|e| e.seq),
        };
        if let Some(last) = last {
            if event.seq <= last {
                return Err(StorageError::OutOfOrderEvent {
                    run_id: run_id.0.clone(),
                    seq: event.seq,
                    last,
                });
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir(run_id).join(EVENTS_FILE))?;
        let line = serde_json::to_string(&event)?;
        writeln!(file, "{}", line)?;
        last_seq.insert(run_id.0.clone(), event.seq);
        Ok(())
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, summary)
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, summary)
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Cancelled, summary)
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.read_record(run_id)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        // Surface RunNotFound rather than an empty list for unknown ids.
        self.read_record(run_id)?;
        self.read_events(run_id)
    }

    async fn list_runs(&self, job_name: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = RunId(entry.file_name().to_string_lossy().into_owned());
            match self.read_record(&run_id) {
                Ok(record) => {
                    if job_name.map(|n| record.metadata.job_name == n).unwrap_or(true) {
                        records.push(record);
                    }
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "skipping unreadable run record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
