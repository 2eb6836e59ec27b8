use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::model::{DocNumber, PartitionId};
use crate::probe::{RecordParser, RemoteProbe};
use crate::store::{CursorStore, RecordStore};

/// Derived missing set for one partition. Never persisted.
///
/// An empty reconciliation range is reported as `range_start > range_end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GapScan {
    pub partition_id: PartitionId,
    pub range_start: DocNumber,
    pub range_end: DocNumber,
    pub persisted: u64,
    pub missing: Vec<DocNumber>,
}

impl GapScan {
    fn empty(partition_id: PartitionId) -> Self {
        Self { partition_id, range_start: 1, range_end: 0, persisted: 0, missing: Vec::new() }
    }

    #[must_use]
    pub fn is_empty_range(&self) -> bool {
        self.range_start > self.range_end
    }
}

/// Start of reliable history: the first document of the first run of
/// `run_length` consecutive persisted numbers.
///
/// History that already begins at document 1 has no legacy prefix, so the
/// floor is 1. Without a qualifying run the observed minimum is used.
#[must_use]
pub fn reconciliation_floor(persisted: &BTreeSet<DocNumber>, run_length: u32) -> Option<DocNumber> {
    let minimum = *persisted.first()?;
    if minimum == 1 {
        return Some(1);
    }

    let needed = u64::from(run_length.max(1));
    let mut run_start = minimum;
    let mut run_len = 0_u64;
    let mut previous: Option<DocNumber> = None;
    for &doc in persisted {
        if previous.is_some_and(|prev| prev + 1 == doc) {
            run_len += 1;
        } else {
            run_start = doc;
            run_len = 1;
        }
        if run_len >= needed {
            return Some(run_start);
        }
        previous = Some(doc);
    }
    Some(minimum)
}

/// Ordered complement of `persisted` within the closed interval `[start, end]`.
#[must_use]
pub fn missing_in_range(
    persisted: &BTreeSet<DocNumber>,
    start: DocNumber,
    end: DocNumber,
) -> Vec<DocNumber> {
    if start > end {
        return Vec::new();
    }
    (start..=end).filter(|doc| !persisted.contains(doc)).collect()
}

/// Gaps over an explicit range. Reads the store only.
///
/// # Errors
/// Rejects ranges starting at 0 or with `start > end`; propagates store failures.
pub fn scan_range<S: RecordStore>(
    store: &S,
    partition: &PartitionId,
    start: DocNumber,
    end: DocNumber,
) -> Result<GapScan, EngineError> {
    if start == 0 {
        return Err(EngineError::InvalidDocNumber(start));
    }
    if start > end {
        return Err(EngineError::InvalidRange { start, end });
    }
    let persisted = store.existing_doc_numbers(partition, start, end)?;
    Ok(GapScan {
        partition_id: partition.clone(),
        range_start: start,
        range_end: end,
        persisted: persisted.len() as u64,
        missing: missing_in_range(&persisted, start, end),
    })
}

/// Gaps between the reconciliation floor and the last explored number.
///
/// # Errors
/// [`EngineError::MissingCursor`] when the partition has never been bounded or
/// acquired; store failures otherwise.
pub fn scan_partition<S: RecordStore + CursorStore>(
    store: &S,
    partition: &PartitionId,
    floor_run_length: u32,
) -> Result<GapScan, EngineError> {
    let cursor =
        store.get_cursor(partition)?.ok_or_else(|| EngineError::MissingCursor(partition.clone()))?;
    let Some(range_end) = cursor.last_explored() else {
        return Ok(GapScan::empty(partition.clone()));
    };

    let persisted = store.existing_doc_numbers(partition, 1, range_end)?;
    let Some(range_start) = reconciliation_floor(&persisted, floor_run_length) else {
        return Ok(GapScan::empty(partition.clone()));
    };

    let missing = missing_in_range(&persisted, range_start, range_end);
    let in_range = persisted.range(range_start..=range_end).count() as u64;
    tracing::info!(
        partition = %partition,
        range_start,
        range_end,
        missing = missing.len(),
        "gap scan complete"
    );
    Ok(GapScan { partition_id: partition.clone(), range_start, range_end, persisted: in_range, missing })
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    /// # Errors
    /// See [`scan_partition`].
    pub fn find_gaps(&self, partition: &PartitionId) -> Result<GapScan, EngineError> {
        scan_partition(self.store(), partition, self.config().floor_run_length)
    }

    /// # Errors
    /// See [`scan_range`].
    pub fn find_gaps_in(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<GapScan, EngineError> {
        scan_range(self.store(), partition, start, end)
    }
}
