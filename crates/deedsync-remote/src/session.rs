use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::PathBuf;

use crate::RemoteError;

/// Source of the registry session token.
///
/// A file source is re-read on every [`SessionCredential::resolve`], so an
/// operator can drop in a fresh token while a long run is in progress.
#[derive(Clone)]
pub enum SessionCredential {
    Inline(String),
    File(PathBuf),
}

impl SessionCredential {
    /// Current token, trimmed.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or the token is empty.
    pub fn resolve(&self) -> Result<String, RemoteError> {
        let raw = match self {
            Self::Inline(token) => token.clone(),
            Self::File(path) => fs::read_to_string(path).map_err(|err| {
                RemoteError::Session(format!("failed to read {}: {err}", path.display()))
            })?,
        };
        let token = raw.trim();
        if token.is_empty() {
            return Err(RemoteError::Session("session token is empty".to_string()));
        }
        Ok(token.to_string())
    }
}

impl Debug for SessionCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("SessionCredential::Inline(<redacted>)"),
            Self::File(path) => f.debug_tuple("SessionCredential::File").field(path).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn file_credential_is_reread_on_each_resolve() -> Result<(), RemoteError> {
        let path = std::env::temp_dir().join(format!("deedsync-session-{}", Ulid::new()));
        let io = |err: std::io::Error| RemoteError::Session(err.to_string());
        fs::write(&path, "first-token\n").map_err(io)?;
        let credential = SessionCredential::File(path.clone());
        assert_eq!(credential.resolve()?, "first-token");

        fs::write(&path, "second-token").map_err(io)?;
        assert_eq!(credential.resolve()?, "second-token");

        fs::remove_file(&path).map_err(io)?;
        Ok(())
    }

    #[test]
    fn empty_token_is_rejected_and_inline_is_redacted() {
        let credential = SessionCredential::Inline("   ".to_string());
        assert!(matches!(credential.resolve(), Err(RemoteError::Session(_))));

        let secret = SessionCredential::Inline("abc!123".to_string());
        assert!(!format!("{secret:?}").contains("abc"));
    }
}
