//! Error types for the secret store.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Every failure the store can surface.
///
/// The first five variants form the stable taxonomy exposed through
/// [`EngineError::code`]; `Storage` and `Io` carry lower-level failures
/// through unchanged.
#[derive(Debug)]
pub enum EngineError {
    /// An on-disk mode is more permissive than the store requires.
    Security {
        expected: u32,
        actual: u32,
        path: PathBuf,
    },
    /// The metadata file or the integrity seal cannot be trusted.
    Integrity(String),
    /// `get_required` was called for a name that is not stored.
    KeyNotFound(String),
    /// An AEAD open failed: tag mismatch, truncated ciphertext, or
    /// non-UTF-8 plaintext. Carries a truncated key hash for diagnostics,
    /// never the plaintext.
    Decryption {
        key_hash: Option<String>,
        reason: String,
    },
    /// The store directory, keyfile, or master key could not be set up.
    Initialization(String),
    /// A database error, propagated unchanged.
    Storage(rusqlite::Error),
    /// A filesystem error, propagated unchanged.
    Io(std::io::Error),
}

impl EngineError {
    /// Stable machine-readable code for this failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Security { .. } => "SECURITY_ERROR",
            Self::Integrity(_) => "INTEGRITY_ERROR",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::Decryption { .. } => "DECRYPTION_ERROR",
            Self::Initialization(_) => "INITIALIZATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security {
                expected,
                actual,
                path,
            } => write!(
                f,
                "insecure permissions on {}: expected mode {:o}, found {:o}",
                path.display(),
                expected,
                actual
            ),
            Self::Integrity(msg) => write!(f, "integrity check failed: {}", msg),
            Self::KeyNotFound(name) => write!(f, "secret not found: {}", name),
            Self::Decryption { key_hash, reason } => match key_hash {
                Some(hash) => write!(f, "decryption failed for entry {}: {}", hash, reason),
                None => write!(f, "decryption failed: {}", reason),
            },
            Self::Initialization(msg) => write!(f, "initialization failed: {}", msg),
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
