use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

/// Ordinal identifier of a document within one partition's sequence.
pub type DocNumber = u64;

/// Sub-registrar office code, the key that scopes a document-number sequence.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct PartitionId(pub String);

impl PartitionId {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Reference data for one registration office. Seeded once, never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Partition {
    pub id: PartitionId,
    /// Routing code of the district, sent as `districtCode` on every lookup.
    pub district_code: String,
    pub district: String,
    pub display_name: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Ulid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One parsed deed. Identity is `(partition_id, doc_number, registration_year)`;
/// the store keeps at most one record per `(partition_id, doc_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub partition_id: PartitionId,
    pub doc_number: DocNumber,
    pub registration_year: i32,
    pub serial: Option<String>,
    pub property_description: Option<String>,
    pub dates_text: Option<String>,
    pub nature_and_value: Option<String>,
    pub parties: Option<String>,
    pub doc_info: Option<String>,
    pub market_value: Option<u64>,
    pub consideration_value: Option<u64>,
    pub date_of_execution: Option<String>,
    pub date_of_presentation: Option<String>,
    pub date_of_registration: Option<String>,
    pub village: Option<String>,
    pub extent: Option<String>,
    pub extent_unit: Option<String>,
    pub deed_type: Option<String>,
    pub source_hash: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record {
    /// A record carrying only its identity; parsers fill in whatever fields they find.
    #[must_use]
    pub fn bare(partition_id: PartitionId, doc_number: DocNumber, registration_year: i32) -> Self {
        Self {
            partition_id,
            doc_number,
            registration_year,
            serial: None,
            property_description: None,
            dates_text: None,
            nature_and_value: None,
            parties: None,
            doc_info: None,
            market_value: None,
            consideration_value: None,
            date_of_execution: None,
            date_of_presentation: None,
            date_of_registration: None,
            village: None,
            extent: None,
            extent_unit: None,
            deed_type: None,
            source_hash: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Content digest in the `sha256:<hex>` form stored alongside each record.
#[must_use]
pub fn source_hash(raw: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(raw.as_bytes())))
}

/// Per-partition position in the document-number sequence.
///
/// `frontier` is always the next unexplored document number: every confirmed
/// number is strictly below it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Cursor {
    pub partition_id: PartitionId,
    pub frontier: DocNumber,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Cursor {
    /// Highest document number already explored, if any.
    #[must_use]
    pub fn last_explored(&self) -> Option<DocNumber> {
        self.frontier.checked_sub(1).filter(|value| *value >= 1)
    }
}
