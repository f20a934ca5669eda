//! Trait contract tests for RunLedger.
//!
//! Every test runs against the in-memory fake and the filesystem ledger;
//! any conforming implementation must pass these.

use std::sync::Arc;

use chrono::Utc;
use matrixci_state::fakes::MemoryRunLedger;
use matrixci_state::storage_traits::*;
use matrixci_state::{FsRunLedger, StorageError};
use serde_json::json;

fn ledgers() -> Vec<(Arc<dyn RunLedger>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsRunLedger::open(dir.path()).unwrap();
    vec![
        (Arc::new(MemoryRunLedger::new()), None),
        (Arc::new(fs), Some(dir)),
    ]
}

fn metadata(job: &str) -> RunMetadata {
    RunMetadata {
        git_sha: Some("deadbeef".to_string()),
        job_name: job.to_string(),
        context_label: "python-version=3.13".to_string(),
        tags: json!({ "python-version": "3.13" }),
    }
}

fn event(seq: u64, kind: &str) -> RunEvent {
    RunEvent {
        seq,
        kind: kind.to_string(),
        payload: json!({ "step": "mypy multiqc" }),
        timestamp: Utc::now(),
    }
}

fn summary(success: bool) -> RunSummary {
    RunSummary {
        total_events: 2,
        duration_ms: 10,
        success,
        failed_step: if success { None } else { Some("install".to_string()) },
    }
}

#[tokio::test]
async fn ledger_create_starts_running() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-a");
        let run_id = ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        let record = ledger.get_run(&run_id).await.unwrap();

        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.spec_digest, digest);
        assert!(record.summary.is_none());
        assert!(record.completed_at.is_none());
    }
}

#[tokio::test]
async fn ledger_events_are_ordered_by_seq() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-b");
        let run_id = ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.append_event(&run_id, event(1, "step_started")).await.unwrap();
        ledger.append_event(&run_id, event(2, "step_succeeded")).await.unwrap();
        ledger.append_event(&run_id, event(3, "step_started")).await.unwrap();

        let events = ledger.get_events(&run_id).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}

#[tokio::test]
async fn ledger_rejects_non_increasing_seq() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-c");
        let run_id = ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.append_event(&run_id, event(5, "step_started")).await.unwrap();

        let err = ledger
            .append_event(&run_id, event(5, "step_started"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrderEvent { seq: 5, last: 5, .. }));
    }
}

#[tokio::test]
async fn ledger_terminal_runs_are_immutable() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-d");
        let run_id = ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.fail_run(&run_id, summary(false)).await.unwrap();

        let err = ledger
            .append_event(&run_id, event(1, "step_started"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunState { .. }));

        let err = ledger.complete_run(&run_id, summary(true)).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunState { .. }));

        let record = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(
            record.summary.unwrap().failed_step.as_deref(),
            Some("install")
        );
        assert!(record.completed_at.is_some());
    }
}

#[tokio::test]
async fn ledger_cancel_is_terminal() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-e");
        let run_id = ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.cancel_run(&run_id, summary(false)).await.unwrap();

        let record = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Cancelled);
    }
}

#[tokio::test]
async fn ledger_unknown_run_not_found() {
    for (ledger, _dir) in ledgers() {
        let missing = RunId::new();
        assert!(matches!(
            ledger.get_run(&missing).await.unwrap_err(),
            StorageError::RunNotFound { .. }
        ));
        assert!(matches!(
            ledger.get_events(&missing).await.unwrap_err(),
            StorageError::RunNotFound { .. }
        ));
        assert!(matches!(
            ledger.append_event(&missing, event(1, "x")).await.unwrap_err(),
            StorageError::RunNotFound { .. }
        ));
    }
}

#[tokio::test]
async fn ledger_list_filters_by_job_name() {
    for (ledger, _dir) in ledgers() {
        let digest = ContentDigest::from_bytes(b"spec-f");
        ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.create_run(&digest, metadata("typecheck")).await.unwrap();
        ledger.create_run(&digest, metadata("lint")).await.unwrap();

        assert_eq!(ledger.list_runs(None).await.unwrap().len(), 3);
        assert_eq!(ledger.list_runs(Some("typecheck")).await.unwrap().len(), 2);
        assert_eq!(ledger.list_runs(Some("lint")).await.unwrap().len(), 1);
        assert!(ledger.list_runs(Some("docs")).await.unwrap().is_empty());
    }
}
