//! Scripted in-memory collaborators for engine tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use time::OffsetDateTime;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{StoreError, TransportErrorKind, TransportFailure};
use crate::model::{Cursor, DocNumber, Partition, PartitionId, Record};
use crate::probe::{ProbeOutcome, RecordParser, RemoteProbe};
use crate::store::{CursorStore, InsertOutcome, RecordStore};

pub(crate) fn partition() -> Partition {
    Partition {
        id: PartitionId::from("1604"),
        district_code: "16_1".to_string(),
        district: "Hyderabad".to_string(),
        display_name: "BANJARAHILLS (R.O)".to_string(),
        state: "Telangana".to_string(),
    }
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig { request_delay_ms: 0, registration_year: 2025, ..EngineConfig::default() }
}

pub(crate) fn engine_for(script: &Script) -> Engine<&Script, DeedParser, MemoryStore> {
    Engine::new(script, DeedParser, MemoryStore::default(), test_config())
}

/// Remote source whose answers are fixed up front.
#[derive(Debug, Default)]
pub(crate) struct Script {
    existing: BTreeSet<DocNumber>,
    unparseable: BTreeSet<DocNumber>,
    transient: RefCell<HashMap<DocNumber, u32>>,
    session_expires_at: Option<DocNumber>,
    unreachable_from: Option<DocNumber>,
    calls: RefCell<Vec<DocNumber>>,
}

impl Script {
    pub(crate) fn existing(docs: impl IntoIterator<Item = DocNumber>) -> Self {
        Self { existing: docs.into_iter().collect(), ..Self::default() }
    }

    pub(crate) fn unparseable(mut self, docs: impl IntoIterator<Item = DocNumber>) -> Self {
        self.unparseable.extend(docs);
        self
    }

    /// The first `count` lookups of `doc` time out.
    pub(crate) fn transient_failures(self, doc: DocNumber, count: u32) -> Self {
        self.transient.borrow_mut().insert(doc, count);
        self
    }

    /// Every lookup at or above `doc` is rejected as an expired session.
    pub(crate) fn session_expires_at(mut self, doc: DocNumber) -> Self {
        self.session_expires_at = Some(doc);
        self
    }

    /// Every lookup at or above `doc` fails to connect.
    pub(crate) fn unreachable_from(mut self, doc: DocNumber) -> Self {
        self.unreachable_from = Some(doc);
        self
    }

    pub(crate) fn calls(&self) -> Vec<DocNumber> {
        self.calls.borrow().clone()
    }
}

impl RemoteProbe for Script {
    fn probe(&self, _partition: &Partition, doc_number: DocNumber, _year: i32) -> ProbeOutcome {
        self.calls.borrow_mut().push(doc_number);

        if self.session_expires_at.is_some_and(|limit| doc_number >= limit) {
            return ProbeOutcome::TransportError(TransportFailure::new(
                TransportErrorKind::SessionExpired,
                "login page returned",
            ));
        }

        if self.unreachable_from.is_some_and(|first| doc_number >= first) {
            return ProbeOutcome::TransportError(TransportFailure::new(
                TransportErrorKind::Connection,
                "connection refused",
            ));
        }

        if let Some(remaining) = self.transient.borrow_mut().get_mut(&doc_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return ProbeOutcome::TransportError(TransportFailure::new(
                    TransportErrorKind::Timeout,
                    "timed out",
                ));
            }
        }

        if !self.existing.contains(&doc_number) {
            return ProbeOutcome::NotFound;
        }
        if self.unparseable.contains(&doc_number) {
            return ProbeOutcome::Found(format!("<html>broken {doc_number}</html>"));
        }
        ProbeOutcome::Found(format!("deed:{doc_number}"))
    }
}

/// Accepts payloads of the form `deed:<n>`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DeedParser;

impl RecordParser for DeedParser {
    fn parse(
        &self,
        raw: &str,
        partition: &Partition,
        doc_number: DocNumber,
        registration_year: i32,
    ) -> Option<Record> {
        let parsed: DocNumber = raw.strip_prefix("deed:")?.parse().ok()?;
        (parsed == doc_number).then(|| {
            let mut record = Record::bare(partition.id.clone(), doc_number, registration_year);
            record.serial = Some("1".to_string());
            record
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    records: BTreeMap<(PartitionId, DocNumber), Record>,
    cursors: HashMap<PartitionId, Cursor>,
    pub(crate) insert_calls: usize,
    pub(crate) cursor_writes: Vec<DocNumber>,
}

impl MemoryStore {
    pub(crate) fn seed(&mut self, partition: &PartitionId, docs: impl IntoIterator<Item = DocNumber>) {
        for doc in docs {
            let record = Record::bare(partition.clone(), doc, 2025);
            self.records.insert((partition.clone(), doc), record);
        }
    }

    pub(crate) fn records_for(&self, partition: &PartitionId) -> Vec<DocNumber> {
        self.records.keys().filter(|(p, _)| p == partition).map(|(_, doc)| *doc).collect()
    }

    pub(crate) fn frontier(&self, partition: &PartitionId) -> Option<DocNumber> {
        self.cursors.get(partition).map(|cursor| cursor.frontier)
    }
}

impl RecordStore for MemoryStore {
    fn upsert_if_absent(&mut self, record: &Record) -> Result<InsertOutcome, StoreError> {
        self.insert_calls += 1;
        let key = (record.partition_id.clone(), record.doc_number);
        if self.records.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        self.records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn existing_doc_numbers(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<BTreeSet<DocNumber>, StoreError> {
        Ok(self
            .records_for(partition)
            .into_iter()
            .filter(|doc| (start..=end).contains(doc))
            .collect())
    }

    fn count_in_range(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<u64, StoreError> {
        Ok(self.existing_doc_numbers(partition, start, end)?.len() as u64)
    }

    fn doc_number_bounds(
        &self,
        partition: &PartitionId,
    ) -> Result<Option<(DocNumber, DocNumber)>, StoreError> {
        let docs = self.records_for(partition);
        Ok(docs.first().copied().zip(docs.last().copied()))
    }
}

impl CursorStore for MemoryStore {
    fn get_cursor(&self, partition: &PartitionId) -> Result<Option<Cursor>, StoreError> {
        Ok(self.cursors.get(partition).cloned())
    }

    fn set_cursor(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.cursor_writes.push(frontier);
        self.cursors.insert(
            partition.clone(),
            Cursor { partition_id: partition.clone(), frontier, updated_at: now },
        );
        Ok(())
    }
}
