//! In-memory ledger (testing only)
//!
//! `MemoryRunLedger` satisfies the `RunLedger` contract without touching the
//! filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        ensure_running(run_id, &state.record.status)?;
        state.record.status = status;
        state.record.summary = Some(summary);
        state.record.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
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
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        ensure_running(run_id, &state.record.status)?;
        if let Some(last) = state.events.last() {
            if event.seq <= last.seq {
                return Err(StorageError::OutOfOrderEvent {
                    run_id: run_id.0.clone(),
                    seq: event.seq,
                    last: last.seq,
                });
            }
        }
        state.events.push(event);
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
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let runs = self.runs.lock().unwrap();
        let state = runs
            .get(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        let mut events = state.events.clone();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(&self, job_name: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|s| job_name.map(|n| s.record.metadata.job_name == n).unwrap_or(true))
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
