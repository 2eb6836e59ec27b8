use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::model::{Cursor, DocNumber, PartitionId, Record};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same `(partition, doc_number)` already existed; nothing was written.
    AlreadyPresent,
}

/// Persisted record set. Implementations must enforce at most one record per
/// `(partition_id, doc_number)` and treat duplicates as a silent no-op.
pub trait RecordStore {
    /// # Errors
    /// Returns an error when the backend cannot be written.
    fn upsert_if_absent(&mut self, record: &Record) -> Result<InsertOutcome, StoreError>;

    /// Persisted document numbers in the closed interval `[start, end]`.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn existing_doc_numbers(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<BTreeSet<DocNumber>, StoreError>;

    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn count_in_range(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<u64, StoreError>;

    /// Smallest and largest persisted document number, or `None` when the
    /// partition has no records.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn doc_number_bounds(
        &self,
        partition: &PartitionId,
    ) -> Result<Option<(DocNumber, DocNumber)>, StoreError>;
}

/// Per-partition cursor persistence. Writes are last-writer-wins.
pub trait CursorStore {
    /// # Errors
    /// Returns an error when the backend cannot be read.
    fn get_cursor(&self, partition: &PartitionId) -> Result<Option<Cursor>, StoreError>;

    /// # Errors
    /// Returns an error when the backend cannot be written.
    fn set_cursor(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
        now: OffsetDateTime,
    ) -> Result<(), StoreError>;
}

impl<T: RecordStore + ?Sized> RecordStore for &mut T {
    fn upsert_if_absent(&mut self, record: &Record) -> Result<InsertOutcome, StoreError> {
        (**self).upsert_if_absent(record)
    }

    fn existing_doc_numbers(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<BTreeSet<DocNumber>, StoreError> {
        (**self).existing_doc_numbers(partition, start, end)
    }

    fn count_in_range(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<u64, StoreError> {
        (**self).count_in_range(partition, start, end)
    }

    fn doc_number_bounds(
        &self,
        partition: &PartitionId,
    ) -> Result<Option<(DocNumber, DocNumber)>, StoreError> {
        (**self).doc_number_bounds(partition)
    }
}

impl<T: CursorStore + ?Sized> CursorStore for &mut T {
    fn get_cursor(&self, partition: &PartitionId) -> Result<Option<Cursor>, StoreError> {
        (**self).get_cursor(partition)
    }

    fn set_cursor(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        (**self).set_cursor(partition, frontier, now)
    }
}
