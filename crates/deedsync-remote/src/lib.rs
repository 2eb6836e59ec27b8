//! Registry transport: the HTTP probe, its session credential, and the HTML
//! parser for deed detail pages.

mod config;
mod html;
mod session;
mod transport;

pub use config::{RemoteConfig, DEFAULT_BASE_URL, DEFAULT_ENDPOINT, DEFAULT_NOT_FOUND_SENTINEL};
pub use html::HtmlTableParser;
pub use session::SessionCredential;
pub use transport::{classify_response, HttpProbe};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RemoteError {
    #[error("invalid remote configuration: {0}")]
    InvalidConfig(String),
    #[error("session credential unavailable: {0}")]
    Session(String),
}
