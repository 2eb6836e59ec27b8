use serde::{Deserialize, Serialize};

use crate::engine::{Engine, FetchOutcome};
use crate::error::{Aborted, EngineError};
use crate::model::{DocNumber, Partition, PartitionId};
use crate::probe::{RecordParser, RemoteProbe};
use crate::store::{CursorStore, RecordStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub partition_id: PartitionId,
    pub requested: u64,
    pub attempted: u64,
    pub fetched: u64,
    /// Stored by someone else between the gap scan and the fetch.
    pub already_present: u64,
    /// The source answered NOT_FOUND for a number expected to exist.
    pub still_absent: u64,
    pub parse_failures: u64,
    pub transport_failures: u64,
    /// Left for a later run because of the cap or cancellation.
    pub deferred: u64,
    pub cancelled: bool,
}

impl BackfillReport {
    fn new(partition_id: PartitionId, requested: u64) -> Self {
        Self {
            partition_id,
            requested,
            attempted: 0,
            fetched: 0,
            already_present: 0,
            still_absent: 0,
            parse_failures: 0,
            transport_failures: 0,
            deferred: 0,
            cancelled: false,
        }
    }

    /// Present at the source, whoever stored it.
    #[must_use]
    pub fn found(&self) -> u64 {
        self.fetched + self.already_present
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.parse_failures + self.transport_failures
    }
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    /// Re-fetch known gaps in ascending order, at most `cap` attempts.
    ///
    /// Per-document failures are counted and the batch continues. The cursor
    /// is never touched: backfill only fills holes below the frontier.
    ///
    /// # Errors
    /// Session expiry and store failures abort the batch. The error carries
    /// the counts so far; candidates after the failing one count as deferred.
    pub fn backfill(
        &mut self,
        partition: &Partition,
        missing: &[DocNumber],
        cap: usize,
    ) -> Result<BackfillReport, Aborted<BackfillReport>> {
        let mut ordered = missing.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        if ordered.first() == Some(&0) {
            return Err(EngineError::InvalidDocNumber(0).into());
        }

        let mut report = BackfillReport::new(partition.id.clone(), ordered.len() as u64);
        let budget = ordered.len().min(cap);
        report.deferred = (ordered.len() - budget) as u64;
        tracing::info!(
            partition = %partition.id,
            requested = report.requested,
            cap,
            "backfill started"
        );

        for (index, &doc_number) in ordered[..budget].iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                report.deferred += (budget - index) as u64;
                tracing::warn!(partition = %partition.id, doc_number, "backfill cancelled");
                break;
            }

            report.attempted += 1;
            let outcome = match self.fetch_one(partition, doc_number) {
                Ok(outcome) => outcome,
                Err(error) => {
                    report.deferred += (budget - index - 1) as u64;
                    return Err(Aborted::new(error, report));
                }
            };
            match outcome {
                FetchOutcome::Inserted => report.fetched += 1,
                FetchOutcome::AlreadyPresent => report.already_present += 1,
                FetchOutcome::NotFound => report.still_absent += 1,
                FetchOutcome::ParseFailed => report.parse_failures += 1,
                FetchOutcome::TransportFailed { .. } => report.transport_failures += 1,
            }
        }

        tracing::info!(
            partition = %partition.id,
            fetched = report.fetched,
            still_absent = report.still_absent,
            failed = report.failed(),
            deferred = report.deferred,
            "backfill finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::testing::{engine_for, partition, Script};

    #[test]
    fn cap_bounds_fetch_attempts() -> Result<(), EngineError> {
        let script = Script::existing([]);
        let mut engine = engine_for(&script);
        let missing: Vec<DocNumber> = (1..=200).collect();

        let report = engine.backfill(&partition(), &missing, 50)?;
        assert_eq!(script.calls().len(), 50);
        assert_eq!(report.attempted, 50);
        assert_eq!(report.deferred, 150);
        Ok(())
    }

    #[test]
    fn candidates_are_fetched_in_ascending_order() -> Result<(), EngineError> {
        let script = Script::existing([3, 5, 9]);
        let mut engine = engine_for(&script);

        let report = engine.backfill(&partition(), &[9, 3, 5, 3], 50)?;
        assert_eq!(script.calls(), vec![3, 5, 9]);
        assert_eq!(report.requested, 3);
        assert_eq!(report.fetched, 3);
        Ok(())
    }

    #[test]
    fn failures_are_counted_without_aborting() -> Result<(), EngineError> {
        let script = Script::existing([2, 3, 6]).unparseable([3]).transient_failures(6, 100);
        let mut engine = engine_for(&script);
        let p = partition();

        let report = engine.backfill(&p, &[2, 3, 4, 6, 7], 50)?;
        assert_eq!(report.attempted, 5);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.transport_failures, 1);
        assert_eq!(report.still_absent, 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(engine.store().records_for(&p.id), vec![2]);
        Ok(())
    }

    #[test]
    fn backfill_leaves_cursor_alone() -> Result<(), EngineError> {
        let script = Script::existing([4]);
        let mut engine = engine_for(&script);
        let p = partition();
        engine.store_mut().seed(&p.id, [4]);

        let report = engine.backfill(&p, &[4], 50)?;
        assert_eq!(report.already_present, 1);
        assert_eq!(report.found(), 1);
        assert!(engine.store().cursor_writes.is_empty());
        Ok(())
    }

    #[test]
    fn session_expiry_aborts_the_batch() {
        let script = Script::existing([1, 2, 3]).session_expires_at(2);
        let mut engine = engine_for(&script);
        let p = partition();

        let aborted = engine.backfill(&p, &[1, 2, 3], 50).err().unwrap_or_else(|| panic!("expected abort"));
        assert!(matches!(aborted.error, EngineError::SessionExpired { .. }));
        assert_eq!(script.calls(), vec![1, 2]);
        assert_eq!(engine.store().records_for(&p.id), vec![1]);

        let partial = aborted.partial.unwrap_or_else(|| panic!("partial report missing"));
        assert_eq!(partial.fetched, 1);
        assert_eq!(partial.attempted, 2);
        assert_eq!(partial.deferred, 1);
    }

    #[test]
    fn cancellation_defers_the_remainder() -> Result<(), EngineError> {
        let script = Script::existing([1, 2, 3]);
        let token = CancellationToken::new();
        token.cancel();
        let mut engine = engine_for(&script).with_cancellation(token);

        let report = engine.backfill(&partition(), &[1, 2, 3, 4], 3)?;
        assert!(report.cancelled);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.deferred, 4);
        Ok(())
    }

    #[test]
    fn document_zero_is_rejected() {
        let script = Script::existing([]);
        let mut engine = engine_for(&script);
        assert_eq!(
            engine.backfill(&partition(), &[0, 1], 50),
            Err(Aborted::from(EngineError::InvalidDocNumber(0)))
        );
        assert!(script.calls().is_empty());
    }
}
