//! Reconciliation engine for sequentially numbered remote documents.
//!
//! Records are discovered by probing a remote registry one document number at
//! a time, per partition. The engine finds the upper bound of a partition's
//! sequence, acquires forward from a persisted cursor, and backfills gaps the
//! store is missing, all behind injected probe, parser and store traits.

mod acquire;
mod backfill;
mod cancel;
mod config;
mod engine;
mod error;
mod gaps;
mod model;
mod probe;
mod reconcile;
mod store;
mod throttle;
mod upper_bound;

#[cfg(test)]
mod testing;

pub use acquire::AcquireReport;
pub use backfill::BackfillReport;
pub use cancel::CancellationToken;
pub use config::{
    EngineConfig, DEFAULT_BACKFILL_CAP, DEFAULT_FLOOR_RUN_LENGTH,
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MAX_DOC_NUMBER, DEFAULT_NOT_FOUND_THRESHOLD,
    DEFAULT_REQUEST_DELAY_MS, DEFAULT_TRANSPORT_RETRIES,
};
pub use engine::{Engine, FetchOutcome};
pub use error::{Aborted, EngineError, StoreError, TransportErrorKind, TransportFailure};
pub use gaps::{missing_in_range, reconciliation_floor, scan_partition, scan_range, GapScan};
pub use model::{source_hash, Cursor, DocNumber, Partition, PartitionId, Record, RunId};
pub use probe::{ProbeOutcome, RecordParser, RemoteProbe};
pub use reconcile::{summarize_range, PartitionReport, RangeSummary, WindowReport};
pub use store::{CursorStore, InsertOutcome, RecordStore};
pub use throttle::Throttle;
pub use upper_bound::UpperBound;
