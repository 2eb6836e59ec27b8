use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, TransportFailure};
use crate::model::{source_hash, Cursor, DocNumber, Partition, PartitionId, RunId};
use crate::probe::{ProbeOutcome, RecordParser, RemoteProbe};
use crate::store::{CursorStore, InsertOutcome, RecordStore};
use crate::throttle::Throttle;

/// Result of the single-fetch path for one document number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FetchOutcome {
    Inserted,
    AlreadyPresent,
    NotFound,
    /// Present at the source but unparseable. Not evidence of absence.
    ParseFailed,
    /// Retries exhausted on a non-terminal transport failure.
    TransportFailed { failure: TransportFailure },
}

impl FetchOutcome {
    /// The record is known to be in the store after this fetch.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Inserted | Self::AlreadyPresent)
    }
}

/// Reconciliation context: remote probe, parser, store and configuration are
/// injected once and shared by every operation on one partition at a time.
pub struct Engine<P, X, S> {
    probe: P,
    parser: X,
    store: S,
    config: EngineConfig,
    throttle: Throttle,
    cancel: CancellationToken,
    run_id: RunId,
    probes_issued: u64,
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    #[must_use]
    pub fn new(probe: P, parser: X, store: S, config: EngineConfig) -> Self {
        let throttle = Throttle::new(config.request_delay());
        Self {
            probe,
            parser,
            store,
            config,
            throttle,
            cancel: CancellationToken::new(),
            run_id: RunId::new(),
            probes_issued: 0,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tag reports with a run shared by several engines.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Continue the spacing of an earlier engine instead of starting fresh.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    #[must_use]
    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    #[must_use]
    pub fn remote(&self) -> &P {
        &self.probe
    }

    /// Outbound calls made so far, retries included.
    #[must_use]
    pub fn probes_issued(&self) -> u64 {
        self.probes_issued
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// One throttled lookup with bounded retry of non-terminal transport
    /// failures. A rejected session is returned as an error immediately.
    ///
    /// # Errors
    /// Returns [`EngineError::SessionExpired`] when the credential is rejected and
    /// [`EngineError::InvalidDocNumber`] for document number 0.
    pub fn probe_once(
        &mut self,
        partition: &Partition,
        doc_number: DocNumber,
    ) -> Result<ProbeOutcome, EngineError> {
        if doc_number == 0 {
            return Err(EngineError::InvalidDocNumber(doc_number));
        }

        let mut attempt = 0;
        loop {
            self.throttle.wait();
            self.probes_issued += 1;
            let outcome =
                self.probe.probe(partition, doc_number, self.config.registration_year);
            tracing::debug!(
                partition = %partition.id,
                doc_number,
                attempt,
                outcome = outcome.label(),
                "probe"
            );

            match outcome {
                ProbeOutcome::TransportError(failure) if failure.is_terminal() => {
                    tracing::error!(
                        partition = %partition.id,
                        doc_number,
                        detail = %failure.detail,
                        "session credential rejected; refresh it and rerun"
                    );
                    return Err(EngineError::SessionExpired {
                        partition: partition.id.clone(),
                        detail: failure.detail,
                    });
                }
                ProbeOutcome::TransportError(failure) if attempt < self.config.transport_retries => {
                    attempt += 1;
                    tracing::warn!(
                        partition = %partition.id,
                        doc_number,
                        attempt,
                        error = %failure,
                        "transport failure, retrying"
                    );
                }
                other => return Ok(other),
            }
        }
    }

    /// Probe, parse and insert-if-absent a single document number.
    ///
    /// # Errors
    /// Returns run-level errors only: session expiry or an unavailable store.
    pub fn fetch_one(
        &mut self,
        partition: &Partition,
        doc_number: DocNumber,
    ) -> Result<FetchOutcome, EngineError> {
        let raw = match self.probe_once(partition, doc_number)? {
            ProbeOutcome::Found(raw) => raw,
            ProbeOutcome::NotFound => return Ok(FetchOutcome::NotFound),
            ProbeOutcome::TransportError(failure) => {
                tracing::warn!(
                    partition = %partition.id,
                    doc_number,
                    error = %failure,
                    "giving up on document after retries"
                );
                return Ok(FetchOutcome::TransportFailed { failure });
            }
        };

        let year = self.config.registration_year;
        let Some(mut record) = self.parser.parse(&raw, partition, doc_number, year) else {
            tracing::warn!(partition = %partition.id, doc_number, "document present but unparseable");
            return Ok(FetchOutcome::ParseFailed);
        };
        record.partition_id = partition.id.clone();
        record.doc_number = doc_number;
        record.registration_year = year;
        record.source_hash = Some(source_hash(&raw));

        let outcome = match self.store.upsert_if_absent(&record)? {
            InsertOutcome::Inserted => FetchOutcome::Inserted,
            InsertOutcome::AlreadyPresent => FetchOutcome::AlreadyPresent,
        };
        tracing::info!(partition = %partition.id, doc_number, outcome = ?outcome, "stored");
        Ok(outcome)
    }

    /// Frontier for forward acquisition; cold start defaults to document 1.
    ///
    /// # Errors
    /// Returns an error when the cursor store cannot be read.
    pub fn acquisition_frontier(&self, partition: &PartitionId) -> Result<DocNumber, EngineError> {
        Ok(self.store.get_cursor(partition)?.map_or(1, |cursor| cursor.frontier.max(1)))
    }

    /// Cursor for reconciliation. Absence is a configuration error here.
    ///
    /// # Errors
    /// Returns [`EngineError::MissingCursor`] when no cursor exists.
    pub fn reconciliation_cursor(&self, partition: &PartitionId) -> Result<Cursor, EngineError> {
        self.store
            .get_cursor(partition)?
            .ok_or_else(|| EngineError::MissingCursor(partition.clone()))
    }

    pub(crate) fn commit_frontier(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
    ) -> Result<(), EngineError> {
        self.store.set_cursor(partition, frontier, OffsetDateTime::now_utc())?;
        tracing::debug!(partition = %partition, frontier, "cursor advanced");
        Ok(())
    }

    pub(crate) fn parser(&self) -> &X {
        &self.parser
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::TransportErrorKind;
    use crate::testing::{engine_for, partition, Script};

    #[test]
    fn fetching_the_same_document_twice_persists_one_record() -> Result<(), EngineError> {
        let script = Script::existing(1..=5);
        let mut engine = engine_for(&script);
        let p = partition();

        assert_eq!(engine.fetch_one(&p, 3)?, FetchOutcome::Inserted);
        assert_eq!(engine.fetch_one(&p, 3)?, FetchOutcome::AlreadyPresent);
        assert_eq!(engine.store().records_for(&p.id), vec![3]);
        Ok(())
    }

    #[test]
    fn parse_failure_is_not_inserted() -> Result<(), EngineError> {
        let script = Script::existing(1..=5).unparseable([2]);
        let mut engine = engine_for(&script);
        let p = partition();

        assert_eq!(engine.fetch_one(&p, 2)?, FetchOutcome::ParseFailed);
        assert!(engine.store().records_for(&p.id).is_empty());
        Ok(())
    }

    #[test]
    fn transient_transport_failure_is_retried_then_succeeds() -> Result<(), EngineError> {
        let script = Script::existing(1..=5).transient_failures(4, 2);
        let mut engine = engine_for(&script);
        let p = partition();

        assert_eq!(engine.fetch_one(&p, 4)?, FetchOutcome::Inserted);
        assert_eq!(engine.probes_issued(), 3);
        Ok(())
    }

    #[test]
    fn exhausted_retries_report_transport_failure() -> Result<(), EngineError> {
        let script = Script::existing(1..=5).transient_failures(4, 10);
        let mut engine = engine_for(&script);
        let p = partition();

        let outcome = engine.fetch_one(&p, 4)?;
        assert!(matches!(
            outcome,
            FetchOutcome::TransportFailed { failure } if failure.kind == TransportErrorKind::Timeout
        ));
        assert_eq!(engine.probes_issued(), 1 + u64::from(engine.config().transport_retries));
        assert!(engine.store().records_for(&p.id).is_empty());
        Ok(())
    }

    #[test]
    fn session_expiry_is_terminal_without_retry() {
        let script = Script::existing(1..=5).session_expires_at(2);
        let mut engine = engine_for(&script);
        let p = partition();

        let result = engine.fetch_one(&p, 2);
        assert!(matches!(result, Err(EngineError::SessionExpired { .. })));
        assert_eq!(engine.probes_issued(), 1);
    }

    #[test]
    fn document_zero_is_rejected_before_any_call() {
        let script = Script::existing(1..=5);
        let mut engine = engine_for(&script);
        assert_eq!(engine.fetch_one(&partition(), 0), Err(EngineError::InvalidDocNumber(0)));
        assert_eq!(engine.probes_issued(), 0);
    }

    #[test]
    fn handed_over_throttle_keeps_spacing_across_engines() -> Result<(), EngineError> {
        let script = Script::existing(1..=5);
        let p = partition();
        let mut first = engine_for(&script).with_throttle(Throttle::new(Duration::from_millis(80)));
        first.fetch_one(&p, 1)?;

        let mut second = engine_for(&script).with_throttle(first.throttle().clone());
        let started = Instant::now();
        second.fetch_one(&p, 2)?;
        assert!(started.elapsed() >= Duration::from_millis(40));

        let mut fresh = engine_for(&script).with_throttle(Throttle::new(Duration::from_millis(80)));
        let started = Instant::now();
        fresh.fetch_one(&p, 3)?;
        assert!(started.elapsed() < Duration::from_millis(40));
        Ok(())
    }

    #[test]
    fn cursor_modes_differ_on_absence() -> Result<(), EngineError> {
        let script = Script::existing(1..=5);
        let mut engine = engine_for(&script);
        let p = partition();

        assert_eq!(engine.acquisition_frontier(&p.id)?, 1);
        assert_eq!(
            engine.reconciliation_cursor(&p.id),
            Err(EngineError::MissingCursor(p.id.clone()))
        );

        engine.commit_frontier(&p.id, 7)?;
        assert_eq!(engine.acquisition_frontier(&p.id)?, 7);
        assert_eq!(engine.reconciliation_cursor(&p.id)?.frontier, 7);
        Ok(())
    }
}
