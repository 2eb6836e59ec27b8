use serde::{Deserialize, Serialize};

use crate::acquire::AcquireReport;
use crate::backfill::BackfillReport;
use crate::engine::Engine;
use crate::error::{Aborted, EngineError};
use crate::gaps::{scan_partition, scan_range, GapScan};
use crate::model::{DocNumber, Partition, PartitionId, RunId};
use crate::probe::{RecordParser, RemoteProbe};
use crate::store::{CursorStore, RecordStore};

/// Per-partition outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionReport {
    pub run_id: RunId,
    pub partition_id: PartitionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<AcquireReport>,
    pub range_start: DocNumber,
    pub range_end: DocNumber,
    /// Records inserted by this pass, forward acquisition included.
    pub fetched: u64,
    pub missing_detected: u64,
    pub missing_found: u64,
    pub missing_still_absent: u64,
    pub failed: u64,
    pub deferred: u64,
    pub cancelled: bool,
}

impl PartitionReport {
    fn new(run_id: RunId, partition_id: PartitionId) -> Self {
        Self {
            run_id,
            partition_id,
            acquisition: None,
            range_start: 1,
            range_end: 0,
            fetched: 0,
            missing_detected: 0,
            missing_found: 0,
            missing_still_absent: 0,
            failed: 0,
            deferred: 0,
            cancelled: false,
        }
    }

    fn absorb_acquisition(&mut self, acquisition: AcquireReport) {
        self.fetched += acquisition.fetched;
        self.failed += acquisition.parse_failures + acquisition.transport_failures;
        self.cancelled = acquisition.cancelled;
        self.acquisition = Some(acquisition);
    }

    fn absorb_backfill(&mut self, scan: &GapScan, backfill: &BackfillReport) {
        self.range_start = scan.range_start;
        self.range_end = scan.range_end;
        self.missing_detected = scan.missing.len() as u64;
        self.fetched += backfill.fetched;
        self.missing_found = backfill.found();
        self.missing_still_absent = backfill.still_absent;
        self.failed += backfill.failed();
        self.deferred = backfill.deferred;
        self.cancelled = backfill.cancelled;
    }
}

/// Backfill of the numbers just below the frontier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowReport {
    pub range_start: DocNumber,
    pub range_end: DocNumber,
    pub missing_detected: u64,
    pub backfill: BackfillReport,
}

/// Offline coverage of the reconciliation range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeSummary {
    pub partition_id: PartitionId,
    pub frontier: DocNumber,
    /// Lowest and highest persisted numbers, legacy prefix included.
    pub observed: Option<(DocNumber, DocNumber)>,
    pub range_start: DocNumber,
    pub range_end: DocNumber,
    pub expected: u64,
    pub persisted: u64,
    pub missing: u64,
    /// Lowest missing numbers, for a quick look.
    pub first_missing: Vec<DocNumber>,
}

const SUMMARY_PREVIEW: usize = 20;

/// Count persisted and missing documents between the floor and the frontier.
///
/// # Errors
/// See [`scan_partition`].
pub fn summarize_range<S: RecordStore + CursorStore>(
    store: &S,
    partition: &PartitionId,
    floor_run_length: u32,
) -> Result<RangeSummary, EngineError> {
    let scan = scan_partition(store, partition, floor_run_length)?;
    let frontier = store.get_cursor(partition)?.map_or(1, |cursor| cursor.frontier);
    let (expected, persisted) = if scan.is_empty_range() {
        (0, 0)
    } else {
        (
            scan.range_end - scan.range_start + 1,
            store.count_in_range(partition, scan.range_start, scan.range_end)?,
        )
    };
    Ok(RangeSummary {
        partition_id: partition.clone(),
        frontier,
        observed: store.doc_number_bounds(partition)?,
        range_start: scan.range_start,
        range_end: scan.range_end,
        expected,
        persisted,
        missing: scan.missing.len() as u64,
        first_missing: scan.missing.iter().take(SUMMARY_PREVIEW).copied().collect(),
    })
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    /// One reconciliation pass: optional forward acquisition, then gap
    /// detection against the stored cursor, then capped backfill.
    ///
    /// The missing set is always derived after acquisition so it is never stale.
    ///
    /// # Errors
    /// [`EngineError::MissingCursor`] when `extend` is off and the partition has
    /// no cursor. Session expiry and store failures abort the pass; once any
    /// document has been probed the error carries the report so far.
    pub fn reconcile(
        &mut self,
        partition: &Partition,
        extend: bool,
    ) -> Result<PartitionReport, Aborted<PartitionReport>> {
        let mut report = PartitionReport::new(self.run_id(), partition.id.clone());
        tracing::info!(run_id = %report.run_id, partition = %partition.id, extend, "reconciliation started");

        if extend {
            match self.acquire(partition) {
                Ok(acquisition) => report.absorb_acquisition(acquisition),
                Err(aborted) => {
                    if let Some(acquisition) = aborted.partial {
                        report.absorb_acquisition(acquisition);
                    }
                    return Err(Aborted::new(aborted.error, report));
                }
            }
            if report.cancelled {
                return Ok(report);
            }
        }

        let scan = match self.find_gaps(&partition.id) {
            Ok(scan) => scan,
            Err(error) if extend => return Err(Aborted::new(error, report)),
            Err(error) => return Err(error.into()),
        };
        let cap = self.config().backfill_cap;
        match self.backfill(partition, &scan.missing, cap) {
            Ok(backfill) => report.absorb_backfill(&scan, &backfill),
            Err(aborted) => {
                if let Some(backfill) = &aborted.partial {
                    report.absorb_backfill(&scan, backfill);
                }
                tracing::error!(
                    run_id = %report.run_id,
                    partition = %partition.id,
                    fetched = report.fetched,
                    error = %aborted.error,
                    "reconciliation aborted"
                );
                return Err(Aborted::new(aborted.error, report));
            }
        }

        tracing::info!(
            run_id = %report.run_id,
            partition = %partition.id,
            fetched = report.fetched,
            missing_detected = report.missing_detected,
            missing_found = report.missing_found,
            missing_still_absent = report.missing_still_absent,
            failed = report.failed,
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Backfill gaps among the `window` numbers immediately below the frontier.
    ///
    /// # Errors
    /// [`EngineError::MissingCursor`] without a cursor; see [`Self::backfill`].
    pub fn refetch_window(
        &mut self,
        partition: &Partition,
        window: u64,
    ) -> Result<WindowReport, Aborted<WindowReport>> {
        let cursor = self.reconciliation_cursor(&partition.id)?;
        let cap = self.config().backfill_cap;
        let (range_start, range_end, missing) = match cursor.last_explored() {
            Some(end) if window > 0 => {
                let start = end.saturating_sub(window - 1).max(1);
                (start, end, scan_range(self.store(), &partition.id, start, end)?.missing)
            }
            _ => (1, 0, Vec::new()),
        };

        let missing_detected = missing.len() as u64;
        let window_report =
            |backfill: BackfillReport| WindowReport { range_start, range_end, missing_detected, backfill };
        self.backfill(partition, &missing, cap)
            .map(window_report)
            .map_err(|aborted| aborted.map(window_report))
    }

    /// # Errors
    /// See [`summarize_range`].
    pub fn range_summary(&self, partition: &PartitionId) -> Result<RangeSummary, EngineError> {
        summarize_range(self.store(), partition, self.config().floor_run_length)
    }
}
