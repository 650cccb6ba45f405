use crate::content_index::IndexError;
use crate::crypto::CryptoError;
use crate::keyring::KeyringError;
use crate::storage::BackendError;

/// Errors surfaced to callers of the orchestrator.
///
/// The first group is what a user can act on. `Keyring`, `Index` and
/// `Crypto` carry infrastructure failures of the local stores and workers.
#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid keyring backup: {0}")]
    ImportFormat(String),
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("keyring error: {0}")]
    Keyring(KeyringError),
    #[error("content index error: {0}")]
    Index(#[from] IndexError),
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<KeyringError> for TesseraError {
    fn from(err: KeyringError) -> Self {
        match err {
            KeyringError::ImportFormat(reason) => TesseraError::ImportFormat(reason),
            other => TesseraError::Keyring(other),
        }
    }
}

impl From<CryptoError> for TesseraError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => TesseraError::DecryptionFailed,
            other => TesseraError::Crypto(other),
        }
    }
}

impl From<BackendError> for TesseraError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(id) => TesseraError::NotFound(id),
            BackendError::Timeout(detail) => TesseraError::Timeout(detail),
            other => TesseraError::BackendUnavailable(other.to_string()),
        }
    }
}
