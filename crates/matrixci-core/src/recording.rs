//! Run recorder: bridges context lifecycle events to `RunLedger` persistence.

use std::sync::Arc;

use chrono::Utc;
use matrixci_state::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunSummary, StorageResult,
};
use serde::{Deserialize, Serialize};

/// Kinds of events recorded for a context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordedKind {
    StepStarted,
    StepSucceeded,
    StepFailed,
    StepSkipped,
    StateChanged,
}

impl RecordedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordedKind::StepStarted => "step_started",
            RecordedKind::StepSucceeded => "step_succeeded",
            RecordedKind::StepFailed => "step_failed",
            RecordedKind::StepSkipped => "step_skipped",
            RecordedKind::StateChanged => "state_changed",
        }
    }
}

/// Records one execution context as a ledger run.
///
/// Usage:
/// 1. [`RunRecorder::start`] creates the run.
/// 2. [`RunRecorder::record`] appends events with increasing `seq`.
/// 3. [`RunRecorder::finish_ok`] or [`RunRecorder::finish_err`] finalizes it.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    next_seq: u64,
}

impl RunRecorder {
    /// Start a new run in the ledger, returning a recorder bound to it.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<Self> {
        let job = metadata.job_name.clone();
        let context = metadata.context_label.clone();
        let run_id = ledger.create_run(spec_digest, metadata).await?;
        crate::obs::emit_run_started(run_id.0.as_str(), &job, &context);
        Ok(Self {
            ledger,
            run_id,
            next_seq: 1,
        })
    }

    /// Append one event; returns the sequence number used.
    pub async fn record(
        &mut self,
        kind: RecordedKind,
        payload: serde_json::Value,
    ) -> StorageResult<u64> {
        let seq = self.next_seq;
        let event = RunEvent {
            seq,
            kind: kind.as_str().to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.ledger.append_event(&self.run_id, event).await?;
        crate::obs::emit_event_appended(self.run_id.0.as_str(), kind.as_str(), seq);
        self.next_seq += 1;
        Ok(seq)
    }

    /// Number of events recorded so far.
    pub fn event_count(&self) -> u64 {
        self.next_seq - 1
    }

    /// Finalize the run as completed.
    pub async fn finish_ok(self, summary: RunSummary) -> StorageResult<()> {
        crate::obs::emit_run_finished(
            self.run_id.0.as_str(),
            summary.duration_ms,
            summary.total_events,
            true,
        );
        self.ledger.complete_run(&self.run_id, summary).await
    }

    /// Finalize the run as failed.
    pub async fn finish_err(self, summary: RunSummary) -> StorageResult<()> {
        crate::obs::emit_run_finished(
            self.run_id.0.as_str(),
            summary.duration_ms,
            summary.total_events,
            false,
        );
        self.ledger.fail_run(&self.run_id, summary).await
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}
