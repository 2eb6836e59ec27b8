use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::{DocNumber, PartitionId};

/// Classification of a failed remote call. A transport failure carries no
/// information about whether the record exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    HttpStatus(u16),
    /// The shared session credential was rejected. Terminal for the whole run.
    SessionExpired,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connection => f.write_str("connection"),
            Self::HttpStatus(status) => write!(f, "http status {status}"),
            Self::SessionExpired => f.write_str("session expired"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportFailure {
    #[must_use]
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    /// Session expiry cannot be retried per request; everything else can.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind == TransportErrorKind::SessionExpired
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store data is corrupt: {0}")]
    Corrupt(String),
}

/// Run-level failures. Per-document problems are reported as
/// [`crate::FetchOutcome`] values and never surface here.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("session expired while processing partition {partition}: {detail}")]
    SessionExpired { partition: PartitionId, detail: String },
    #[error("transport failure for partition {partition} at document {doc_number}: {detail}")]
    Transport { partition: PartitionId, doc_number: DocNumber, detail: String },
    #[error("no cursor recorded for partition {0}; seed or bound it before reconciling")]
    MissingCursor(PartitionId),
    #[error("invalid range [{start}, {end}]")]
    InvalidRange { start: DocNumber, end: DocNumber },
    #[error("document numbers start at 1, got {0}")]
    InvalidDocNumber(DocNumber),
    #[error("cancelled before partition {0} completed")]
    Cancelled(PartitionId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable short code used in reports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionExpired { .. } => "session_expired",
            Self::Transport { .. } => "transport",
            Self::MissingCursor(_) => "missing_cursor",
            Self::InvalidRange { .. } => "invalid_range",
            Self::InvalidDocNumber(_) => "invalid_doc_number",
            Self::Cancelled(_) => "cancelled",
            Self::Store(_) => "store",
        }
    }
}

/// A run-level error together with the report a pass had accumulated when it
/// stopped. `partial` is `None` when the pass failed before doing any work.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Aborted<R> {
    pub error: EngineError,
    pub partial: Option<R>,
}

impl<R> Aborted<R> {
    #[must_use]
    pub fn new(error: EngineError, partial: R) -> Self {
        Self { error, partial: Some(partial) }
    }

    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Aborted<T> {
        Aborted { error: self.error, partial: self.partial.map(f) }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl<R> From<EngineError> for Aborted<R> {
    fn from(error: EngineError) -> Self {
        Self { error, partial: None }
    }
}

impl<R> From<Aborted<R>> for EngineError {
    fn from(aborted: Aborted<R>) -> Self {
        aborted.error
    }
}

impl<R> Display for Aborted<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.error, f)
    }
}

impl<R: std::fmt::Debug> std::error::Error for Aborted<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_expiry_is_terminal() {
        for kind in [
            TransportErrorKind::Timeout,
            TransportErrorKind::Connection,
            TransportErrorKind::HttpStatus(502),
        ] {
            assert!(!TransportFailure::new(kind, "x").is_terminal());
        }
        assert!(TransportFailure::new(TransportErrorKind::SessionExpired, "x").is_terminal());
    }

    #[test]
    fn transport_failure_display_includes_kind() {
        let failure = TransportFailure::new(TransportErrorKind::HttpStatus(503), "busy");
        assert_eq!(failure.to_string(), "http status 503: busy");
    }

    #[test]
    fn aborted_keeps_partial_and_converts_back() {
        let aborted = Aborted::new(EngineError::MissingCursor(PartitionId::from("1604")), 3_u64);
        assert_eq!(aborted.code(), "missing_cursor");
        assert_eq!(aborted.to_string(), aborted.error.to_string());
        assert_eq!(aborted.clone().map(|count| count * 2).partial, Some(6));

        let error: EngineError = aborted.into();
        assert_eq!(error, EngineError::MissingCursor(PartitionId::from("1604")));
        assert_eq!(Aborted::<u64>::from(error).partial, None);
    }
}
