use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const DEFAULT_NOT_FOUND_THRESHOLD: u32 = 10;
pub const DEFAULT_FLOOR_RUN_LENGTH: u32 = 10;
pub const DEFAULT_BACKFILL_CAP: usize = 50;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1_000;
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;
pub const DEFAULT_MAX_DOC_NUMBER: u64 = 100_000;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Tunables for one engine instance. Every field has a default so partial
/// YAML sections deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive NOT_FOUND responses that end a sequential acquisition pass.
    pub not_found_threshold: u32,
    /// Consecutive persisted numbers that mark the start of reliable history.
    pub floor_run_length: u32,
    /// Hard ceiling on fetch attempts per backfill invocation.
    pub backfill_cap: usize,
    /// Minimum spacing between two outbound probes.
    pub request_delay_ms: u64,
    /// Extra attempts for a non-terminal transport failure on the same number.
    pub transport_retries: u32,
    /// Consecutive parse or transport failures, after retries, that abort a
    /// sequential acquisition pass.
    pub max_consecutive_failures: u32,
    /// Upper end of the upper-bound binary search.
    pub max_doc_number: u64,
    pub registration_year: i32,
}

impl EngineConfig {
    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            not_found_threshold: DEFAULT_NOT_FOUND_THRESHOLD,
            floor_run_length: DEFAULT_FLOOR_RUN_LENGTH,
            backfill_cap: DEFAULT_BACKFILL_CAP,
            request_delay_ms: DEFAULT_REQUEST_DELAY_MS,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_doc_number: DEFAULT_MAX_DOC_NUMBER,
            registration_year: OffsetDateTime::now_utc().year(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() -> Result<(), serde_json::Error> {
        let config: EngineConfig =
            serde_json::from_str(r#"{"backfill_cap": 5, "registration_year": 2024}"#)?;
        assert_eq!(config.backfill_cap, 5);
        assert_eq!(config.registration_year, 2024);
        assert_eq!(config.not_found_threshold, DEFAULT_NOT_FOUND_THRESHOLD);
        assert_eq!(config.request_delay(), Duration::from_secs(1));
        assert_eq!(config.max_consecutive_failures, DEFAULT_MAX_CONSECUTIVE_FAILURES);
        Ok(())
    }
}
