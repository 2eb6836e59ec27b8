use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::model::{DocNumber, Partition, PartitionId};
use crate::probe::{ProbeOutcome, RecordParser, RemoteProbe};
use crate::store::{CursorStore, RecordStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpperBound {
    pub partition_id: PartitionId,
    /// Highest number observed to exist, 0 when none did.
    pub last_valid: DocNumber,
    /// Value written to the cursor: `last_valid + 1`, or the search's lower end
    /// when nothing in the range exists.
    pub frontier: DocNumber,
    pub probes: u64,
}

impl<P, X, S> Engine<P, X, S>
where
    P: RemoteProbe,
    X: RecordParser,
    S: RecordStore + CursorStore,
{
    /// Binary search for the highest existing document number in `[low, high]`.
    ///
    /// Assumes existence is monotonic: every number up to the true bound exists
    /// and none above it does. A number the registry skipped permanently breaks
    /// that assumption and can make the search settle below the real bound, so
    /// the result is an approximation to be refined by forward acquisition.
    ///
    /// The cursor is written only after the search completes. An empty result
    /// says nothing about numbers below `low`, so it leaves the frontier at
    /// `low` rather than 1.
    ///
    /// # Errors
    /// Fails fast on session expiry, on a transport failure that survives the
    /// retry budget, and on cancellation; none of these touch the cursor.
    pub fn find_upper_bound(
        &mut self,
        partition: &Partition,
        low: DocNumber,
        high: DocNumber,
    ) -> Result<UpperBound, EngineError> {
        if low == 0 {
            return Err(EngineError::InvalidDocNumber(low));
        }
        if low > high {
            return Err(EngineError::InvalidRange { start: low, end: high });
        }

        let probes_before = self.probes_issued();
        let floor = low;
        let (mut low, mut high) = (low, high);
        let mut last_valid = 0;

        while low <= high {
            if self.is_cancelled() {
                return Err(EngineError::Cancelled(partition.id.clone()));
            }
            let mid = low + (high - low) / 2;
            if self.exists(partition, mid)? {
                last_valid = mid;
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }

        let frontier = (last_valid + 1).max(floor);
        self.commit_frontier(&partition.id, frontier)?;
        let bound = UpperBound {
            partition_id: partition.id.clone(),
            last_valid,
            frontier,
            probes: self.probes_issued() - probes_before,
        };
        tracing::info!(
            partition = %partition.id,
            last_valid,
            probes = bound.probes,
            "upper bound found"
        );
        Ok(bound)
    }

    /// [`Self::find_upper_bound`] over `[1, max_doc_number]`.
    ///
    /// # Errors
    /// See [`Self::find_upper_bound`].
    pub fn discover_upper_bound(&mut self, partition: &Partition) -> Result<UpperBound, EngineError> {
        let high = self.config().max_doc_number;
        self.find_upper_bound(partition, 1, high)
    }

    /// Existence means a structurally valid payload, not merely the absence of
    /// the not-found sentinel.
    fn exists(&mut self, partition: &Partition, doc_number: DocNumber) -> Result<bool, EngineError> {
        match self.probe_once(partition, doc_number)? {
            ProbeOutcome::Found(raw) => {
                let year = self.config().registration_year;
                Ok(self.parser().parse(&raw, partition, doc_number, year).is_some())
            }
            ProbeOutcome::NotFound => Ok(false),
            ProbeOutcome::TransportError(failure) => Err(EngineError::Transport {
                partition: partition.id.clone(),
                doc_number,
                detail: failure.to_string(),
            }),
        }
    }
}
