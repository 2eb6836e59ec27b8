use crate::error::TransportFailure;
use crate::model::{DocNumber, Partition, Record};

/// Result of one remote lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The source returned a payload without its "not found" sentinel. Parsing
    /// is a separate, fallible step.
    Found(String),
    /// The source answered with its explicit "record not found" sentinel.
    NotFound,
    TransportError(TransportFailure),
}

impl ProbeOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::TransportError(_) => "transport_error",
        }
    }
}

/// One outbound lookup per call. Implementations must not sleep or retry;
/// the engine owns throttling and retry policy.
pub trait RemoteProbe {
    fn probe(&self, partition: &Partition, doc_number: DocNumber, registration_year: i32)
        -> ProbeOutcome;
}

impl<T: RemoteProbe + ?Sized> RemoteProbe for &T {
    fn probe(
        &self,
        partition: &Partition,
        doc_number: DocNumber,
        registration_year: i32,
    ) -> ProbeOutcome {
        (**self).probe(partition, doc_number, registration_year)
    }
}

/// Turns a raw payload into a [`Record`]. Returns `None` for payloads that are
/// present but structurally unusable; must not panic on malformed input.
pub trait RecordParser {
    fn parse(
        &self,
        raw: &str,
        partition: &Partition,
        doc_number: DocNumber,
        registration_year: i32,
    ) -> Option<Record>;
}

impl<T: RecordParser + ?Sized> RecordParser for &T {
    fn parse(
        &self,
        raw: &str,
        partition: &Partition,
        doc_number: DocNumber,
        registration_year: i32,
    ) -> Option<Record> {
        (**self).parse(raw, partition, doc_number, registration_year)
    }
}
