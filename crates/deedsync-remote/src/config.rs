use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://registration.telangana.gov.in";
pub const DEFAULT_ENDPOINT: &str = "getDeedDetails.htm";
pub const DEFAULT_NOT_FOUND_SENTINEL: &str =
    "Details of the document not found in the Records, contact SRO";

/// Where and how to reach the registry. Credentials live in
/// [`crate::SessionCredential`], never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub endpoint: String,
    pub session_cookie: String,
    pub user_agent: String,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub timeout_secs: u64,
    /// Exact text the registry returns for a document that does not exist.
    pub not_found_sentinel: String,
    /// Text found only on the login or session-timeout page.
    pub session_expired_markers: Vec<String>,
}

impl RemoteConfig {
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.endpoint.trim_start_matches('/'))
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_cookie: "JSESSIONID".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            origin: Some(DEFAULT_BASE_URL.to_string()),
            referer: Some(format!("{DEFAULT_BASE_URL}/districtList.htm")),
            timeout_secs: 30,
            not_found_sentinel: DEFAULT_NOT_FOUND_SENTINEL.to_string(),
            session_expired_markers: vec![
                "Session Expired".to_string(),
                "session has expired".to_string(),
                "Your session has timed out".to_string(),
            ],
        }
    }
}
