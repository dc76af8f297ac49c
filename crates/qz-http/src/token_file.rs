//! Credential persisted on disk

use qz_engagement::CredentialSource;
use std::path::{Path, PathBuf};

/// Reads the bearer token from a file on every load
///
/// A missing, unreadable or blank file means nobody is signed in.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Create source reading `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the token is read from
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for TokenFile {
    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "failed to read token file: {}", err);
                None
            }
        }
    }
}
