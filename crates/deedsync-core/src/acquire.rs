use serde::{Deserialize, Serialize};

use crate::engine::{Engine, FetchOutcome};
use crate::error::{Aborted, EngineError};
use crate::model::{DocNumber, Partition, PartitionId};
use crate::probe::{RecordParser, RemoteProbe};
use crate::store::{CursorStore, RecordStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireReport {
    pub partition_id: PartitionId,
    pub started_at: DocNumber,
    pub fetched: u64,
    pub already_present: u64,
    pub not_found: u64,
    pub parse_failures: u64,
    pub transport_failures: u64,
    /// Frontier left in the cursor when the pass ended.
    pub stopped_at: DocNumber,
    pub cancelled: bool,
}

impl AcquireReport {
    fn new(partition_id: PartitionId, started_at: DocNumber) -> Self {
        Self {
            partition_id,
            started_at,
            fetched: 0,
            already_present: 0,
            not_found: 0,
            parse_failures: 0,
            transport_failures: 0,
            stopped_at: started_at,
            cancelled: false,
        }
    }
}

/// Tracks the current run of consecutive NOT_FOUND answers.
#[derive(Debug, Default)]
struct AbsenceRun {
    length: u32,
    first: Option<DocNumber>,
}

impl AbsenceRun {
    fn observe(&mut self, doc_number: DocNumber) {
        if self.length == 0 {
            self.first = Some(doc_number);
        }
        self.length += 1;
    }

    fn reset(&mut self) {
        self.length = 0;
        self.first = None;
    }
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    /// Forward acquisition from the partition's cursor, or from 1 on cold start.
    ///
    /// # Errors
    /// See [`Self::acquire_from`].
    pub fn acquire(
        &mut self,
        partition: &Partition,
    ) -> Result<AcquireReport, Aborted<AcquireReport>> {
        let start = self.acquisition_frontier(&partition.id)?;
        self.acquire_from(partition, start)
    }

    /// Walk document numbers upward from `start` until `not_found_threshold`
    /// consecutive NOT_FOUND answers.
    ///
    /// The cursor moves to `n + 1` after every confirmed record `n`. When the
    /// pass stops, the cursor is set to the first number of the terminal
    /// NOT_FOUND run so the next pass re-probes from the true frontier.
    /// Parse failures and exhausted transport retries neither reset nor extend
    /// the run, but `max_consecutive_failures` of them in a row end the pass.
    ///
    /// # Errors
    /// Session expiry, store failures and a run of consecutive failures abort
    /// the pass. The cursor keeps the last confirmed value and the error
    /// carries the counts gathered so far.
    pub fn acquire_from(
        &mut self,
        partition: &Partition,
        start: DocNumber,
    ) -> Result<AcquireReport, Aborted<AcquireReport>> {
        if start == 0 {
            return Err(EngineError::InvalidDocNumber(start).into());
        }

        let threshold = self.config().not_found_threshold.max(1);
        let failure_limit = self.config().max_consecutive_failures.max(1);
        let mut report = AcquireReport::new(partition.id.clone(), start);
        let mut run = AbsenceRun::default();
        let mut failures = 0_u32;
        let mut doc_number = start;

        tracing::info!(partition = %partition.id, start, threshold, "acquisition started");

        loop {
            if self.is_cancelled() {
                report.cancelled = true;
                tracing::warn!(partition = %partition.id, doc_number, "acquisition cancelled");
                return Ok(report);
            }

            let outcome = match self.fetch_one(partition, doc_number) {
                Ok(outcome) => outcome,
                Err(error) => return Err(Aborted::new(error, report)),
            };
            match outcome {
                confirmed @ (FetchOutcome::Inserted | FetchOutcome::AlreadyPresent) => {
                    if confirmed == FetchOutcome::Inserted {
                        report.fetched += 1;
                    } else {
                        report.already_present += 1;
                    }
                    run.reset();
                    failures = 0;
                    if let Err(error) = self.commit_frontier(&partition.id, doc_number + 1) {
                        return Err(Aborted::new(error, report));
                    }
                    report.stopped_at = doc_number + 1;
                }
                FetchOutcome::NotFound => {
                    report.not_found += 1;
                    failures = 0;
                    run.observe(doc_number);
                    tracing::debug!(
                        partition = %partition.id,
                        doc_number,
                        run = run.length,
                        threshold,
                        "not found"
                    );
                    if run.length >= threshold {
                        break;
                    }
                }
                failed => {
                    let detail = match failed {
                        FetchOutcome::TransportFailed { failure } => {
                            report.transport_failures += 1;
                            failure.to_string()
                        }
                        _ => {
                            report.parse_failures += 1;
                            "payload could not be parsed".to_string()
                        }
                    };
                    failures += 1;
                    if failures >= failure_limit {
                        tracing::error!(
                            partition = %partition.id,
                            doc_number,
                            failures,
                            "acquisition aborted after consecutive failures"
                        );
                        let error = EngineError::Transport {
                            partition: partition.id.clone(),
                            doc_number,
                            detail: format!("{failures} consecutive failures, last: {detail}"),
                        };
                        return Err(Aborted::new(error, report));
                    }
                }
            }
            doc_number += 1;
        }

        let stop = run.first.unwrap_or(doc_number);
        if let Err(error) = self.commit_frontier(&partition.id, stop) {
            return Err(Aborted::new(error, report));
        }
        report.stopped_at = stop;
        tracing::info!(
            partition = %partition.id,
            fetched = report.fetched,
            stopped_at = stop,
            "acquisition stopped after consecutive misses"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::testing::{engine_for, partition, Script};
    use time::OffsetDateTime;

    #[test]
    fn short_miss_run_does_not_stop_and_frontier_is_start_of_terminal_run(
    ) -> Result<(), EngineError> {
        let script = Script::existing([10]);
        let mut engine = engine_for(&script);
        let p = partition();

        let report = engine.acquire_from(&p, 1)?;
        assert_eq!(report.fetched, 1);
        assert_eq!(report.not_found, 19);
        assert_eq!(report.stopped_at, 11);
        assert_eq!(script.calls(), (1..=20).collect::<Vec<_>>());
        assert_eq!(engine.store().frontier(&p.id), Some(11));
        assert_eq!(engine.store().records_for(&p.id), vec![10]);
        Ok(())
    }

    #[test]
    fn transport_failure_does_not_count_as_absence() -> Result<(), EngineError> {
        let script = Script::existing(1..=5).transient_failures(8, 100);
        let mut engine = engine_for(&script);
        let p = partition();

        let report = engine.acquire_from(&p, 1)?;
        assert_eq!(report.fetched, 5);
        assert_eq!(report.transport_failures, 1);
        assert_eq!(report.not_found, 10);
        assert_eq!(script.calls().last(), Some(&16));
        assert_eq!(report.stopped_at, 6);
        Ok(())
    }

    #[test]
    fn cursor_follows_every_confirmed_record() -> Result<(), EngineError> {
        let script = Script::existing(1..=5);
        let mut engine = engine_for(&script);
        let p = partition();

        engine.acquire(&p)?;
        assert_eq!(engine.store().cursor_writes, vec![2, 3, 4, 5, 6, 6]);
        Ok(())
    }

    #[test]
    fn resumes_from_stored_cursor() -> Result<(), EngineError> {
        let script = Script::existing(1..=6);
        let mut engine = engine_for(&script);
        let p = partition();
        engine.store_mut().set_cursor(&p.id, 4, OffsetDateTime::now_utc())?;

        let report = engine.acquire(&p)?;
        assert_eq!(report.started_at, 4);
        assert_eq!(report.fetched, 3);
        assert_eq!(script.calls().first(), Some(&4));
        assert_eq!(engine.store().records_for(&p.id), vec![4, 5, 6]);
        Ok(())
    }

    #[test]
    fn parse_failure_neither_resets_nor_extends_the_run() -> Result<(), EngineError> {
        let script = Script::existing([1, 2, 3, 8]).unparseable([8]);
        let mut engine = engine_for(&script);
        let p = partition();

        let report = engine.acquire_from(&p, 1)?;
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.not_found, 10);
        assert_eq!(script.calls().last(), Some(&14));
        assert_eq!(report.stopped_at, 4);
        Ok(())
    }

    #[test]
    fn existing_records_are_confirmed_without_duplicates() -> Result<(), EngineError> {
        let script = Script::existing(1..=5);
        let mut engine = engine_for(&script);
        let p = partition();
        engine.store_mut().seed(&p.id, 1..=3);

        let report = engine.acquire_from(&p, 1)?;
        assert_eq!(report.fetched, 2);
        assert_eq!(report.already_present, 3);
        assert_eq!(engine.store().records_for(&p.id), vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn session_expiry_keeps_last_confirmed_frontier() {
        let script = Script::existing(1..=10).session_expires_at(6);
        let mut engine = engine_for(&script);
        let p = partition();

        let aborted = engine.acquire_from(&p, 1).err().unwrap_or_else(|| panic!("expected abort"));
        assert!(matches!(aborted.error, EngineError::SessionExpired { .. }));
        assert_eq!(aborted.partial.map(|report| report.fetched), Some(5));
        assert_eq!(engine.store().frontier(&p.id), Some(6));
    }

    #[test]
    fn unreachable_registry_ends_the_pass_after_consecutive_failures() {
        let script = Script::existing(1..=3).unreachable_from(4);
        let mut engine = engine_for(&script);
        let p = partition();
        let limit = engine.config().max_consecutive_failures;
        let attempts = engine.config().transport_retries + 1;

        let aborted = engine.acquire_from(&p, 1).err().unwrap_or_else(|| panic!("expected abort"));
        let last_doc = 3 + u64::from(limit);
        assert_eq!(
            aborted.error,
            EngineError::Transport {
                partition: p.id.clone(),
                doc_number: last_doc,
                detail: format!("{limit} consecutive failures, last: connection: connection refused"),
            }
        );
        let partial = aborted.partial.unwrap_or_else(|| panic!("partial report missing"));
        assert_eq!(partial.fetched, 3);
        assert_eq!(partial.transport_failures, u64::from(limit));
        assert_eq!(partial.stopped_at, 4);
        assert_eq!(script.calls().len(), 3 + (limit * attempts) as usize);
        assert_eq!(engine.store().frontier(&p.id), Some(4));
    }

    #[test]
    fn a_confirmed_record_clears_the_failure_count() -> Result<(), EngineError> {
        let script = Script::existing(1..=30).unparseable((2..=30).filter(|n| n % 2 == 0));
        let mut engine = engine_for(&script);

        let report = engine.acquire_from(&partition(), 1)?;
        assert_eq!(report.parse_failures, 15);
        assert_eq!(report.fetched, 15);
        Ok(())
    }

    #[test]
    fn cancellation_is_checked_before_each_fetch() -> Result<(), EngineError> {
        let script = Script::existing(1..=10);
        let token = CancellationToken::new();
        token.cancel();
        let mut engine = engine_for(&script).with_cancellation(token);
        let p = partition();

        let report = engine.acquire_from(&p, 1)?;
        assert!(report.cancelled);
        assert!(script.calls().is_empty());
        assert_eq!(engine.store().frontier(&p.id), None);
        Ok(())
    }
}
