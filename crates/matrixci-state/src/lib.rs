//! matrixci-state: run ledger persistence for matrixci
//!
//! Every execution context of a job is recorded as one run: metadata at
//! creation, an ordered stream of step events, and a terminal summary.
//!
//! ## Key Components
//!
//! - `RunLedger`: async persistence trait
//! - `FsRunLedger`: JSON files under a ledger root
//! - `fakes::MemoryRunLedger`: in-memory ledger for tests

mod error;
pub mod fakes;
pub mod fs_ledger;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_ledger::FsRunLedger;
pub use storage_traits::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary,
    StorageResult,
};
