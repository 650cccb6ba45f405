/**
 * Fingerprint → backend reference cache, used to
 *  skip uploading content that is already stored.
 */
pub mod content_index;
/**
 * Cryptographic types and operations.
 *  - AES-256-GCM content encryption
 *  - PBKDF2 password derived keys
 *  - Plain and blinded content fingerprints
 *  - A worker pool running all of it off the caller's thread
 */
pub mod crypto;
/**
 * Pooled SQLite database shared by the keyring
 *  and the content index.
 */
pub mod database;
pub mod error;
/**
 * Durable, owner scoped custody of per-file key
 *  material, with JSON backup and restore.
 */
pub mod keyring;
/**
 * Upload, download and delete flows tying the
 *  crypto engine, keyring, index and backends together.
 */
pub mod orchestrator;
/**
 * Storage backends behind a single adapter trait,
 *  plus the time bounded download fallback chain.
 */
pub mod storage;
pub mod visibility;

pub mod prelude {
    pub use crate::content_index::{ContentIndex, ContentReference};
    pub use crate::crypto::{CryptoEngine, Digest, KeyMaterial};
    pub use crate::database::Database;
    pub use crate::error::TesseraError;
    pub use crate::keyring::{Keyring, KeyringEntry, KeyringStats};
    pub use crate::orchestrator::{
        AllowList, DownloadRequest, Downloaded, Orchestrator, UploadRequest, UploadState,
    };
    pub use crate::storage::{
        BackendError, BackendKind, FallbackChain, StorageAdapter, UploadMetadata, UploadResult,
    };
    pub use crate::visibility::Visibility;
}
