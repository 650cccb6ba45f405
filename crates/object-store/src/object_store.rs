//! ObjectStore - durable blob store backed by SQLite + object storage.
//!
//! Blobs are addressed by a key. [`ObjectStore::put`] derives the key from the
//! BLAKE3 hash of the content; [`ObjectStore::put_named`] stores bytes under a
//! caller supplied key (used to cache content fetched from another backend
//! under that backend's identifier). Every read is verified against the hash
//! recorded at write time.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{BlobStoreError, Result};
use crate::storage::{ObjectStoreConfig, Storage};

/// Metadata describing a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub key: String,
    /// Hex-encoded BLAKE3 hash of the stored bytes
    pub content_hash: String,
    pub size: u64,
    /// Unix timestamp (seconds) of the first write
    pub created_at: i64,
}

/// Statistics from a recovery operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Objects found in storage
    pub scanned: usize,
    /// Metadata rows that were missing and have been rebuilt
    pub recovered: usize,
}

/// Durable blob store combining SQLite metadata with object storage.
///
/// # Example
///
/// ```rust,no_run
/// use tessera_object_store::ObjectStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = ObjectStore::new_ephemeral().await?;
/// let key = store.put(b"hello".to_vec()).await?;
/// let bytes = store.get(&key).await?.expect("just stored");
/// assert_eq!(bytes.as_ref(), b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ObjectStore {
    db: Database,
    storage: Storage,
}

impl ObjectStore {
    /// Create a new store with a file-based SQLite database.
    pub async fn new(db_path: &Path, config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::new(db_path).await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new store with an in-memory SQLite database.
    pub async fn in_memory(config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new store backed by the local filesystem.
    ///
    /// Metadata lives in `<data_dir>/blobs.db`, objects under `<data_dir>/objects`.
    pub async fn new_local(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("blobs.db");
        let objects_path = data_dir.join("objects");
        let config = ObjectStoreConfig::Local { path: objects_path };
        Self::new(&db_path, config).await
    }

    /// Create a fully ephemeral store (in-memory DB + in-memory object storage).
    pub async fn new_ephemeral() -> Result<Self> {
        let db = Database::in_memory().await?;
        Ok(Self {
            db,
            storage: Storage::memory(),
        })
    }

    /// Store data under its content hash and return the key.
    pub async fn put(&self, data: impl Into<Bytes>) -> Result<String> {
        let data = data.into();
        let key = blake3::hash(&data).to_hex().to_string();
        self.write(&key, data).await?;
        Ok(key)
    }

    /// Store data under an explicit key.
    pub async fn put_named(&self, key: &str, data: impl Into<Bytes>) -> Result<()> {
        validate_key(key)?;
        self.write(key, data.into()).await
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        let size = data.len();
        let content_hash = blake3::hash(&data).to_hex().to_string();

        debug!(key = %key, size = size, "storing blob");

        self.storage.put_data(key, data).await?;
        self.db.upsert_blob(key, &content_hash, size as i64).await?;

        info!(key = %key, size = size, "blob stored successfully");
        Ok(())
    }

    /// Retrieve blob data by key.
    ///
    /// Returns `Ok(None)` when the key is unknown. Bytes whose hash no longer
    /// matches the recorded hash are reported as not found.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let Some(metadata) = self.db.get_blob(key).await? else {
            return Ok(None);
        };

        let Some(data) = self.storage.get_data(key).await? else {
            warn!(key = %key, "blob metadata present but object missing");
            return Ok(None);
        };

        if blake3::hash(&data).to_hex().as_str() != metadata.content_hash {
            warn!(key = %key, "blob content does not match recorded hash");
            return Ok(None);
        }

        Ok(Some(data))
    }

    /// Get metadata for a blob.
    pub async fn stat(&self, key: &str) -> Result<Option<BlobInfo>> {
        validate_key(key)?;
        Ok(self.db.get_blob(key).await?.map(|m| BlobInfo {
            key: m.key,
            content_hash: m.content_hash,
            size: m.size.max(0) as u64,
            created_at: m.created_at,
        }))
    }

    /// Check if a blob exists in the store.
    pub async fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.db.has_blob(key).await
    }

    /// Delete a blob from the store.
    ///
    /// Returns `false` if the blob was not present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        if !self.db.has_blob(key).await? {
            return Ok(false);
        }

        self.storage.delete_data(key).await?;
        self.db.delete_blob(key).await?;

        info!(key = %key, "blob deleted");
        Ok(true)
    }

    /// List all blob keys in the store.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.db.list_blobs().await
    }

    /// Count blobs in the store.
    pub async fn count(&self) -> Result<i64> {
        self.db.count_blobs().await
    }

    /// Total bytes held by the store.
    pub async fn total_size(&self) -> Result<i64> {
        self.db.total_size().await
    }

    /// Rebuild missing SQLite metadata from object storage.
    ///
    /// Objects that already have a metadata row are left untouched.
    pub async fn recover(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();

        for object in self.storage.list_data().await? {
            stats.scanned += 1;
            if self.db.has_blob(&object.key).await? {
                continue;
            }
            let Some(data) = self.storage.get_data(&object.key).await? else {
                continue;
            };
            let content_hash = blake3::hash(&data).to_hex().to_string();
            if self
                .db
                .insert_recovered(&object.key, &content_hash, object.size as i64)
                .await?
            {
                stats.recovered += 1;
            }
        }

        info!(
            scanned = stats.scanned,
            recovered = stats.recovered,
            "object store recovery finished"
        );
        Ok(stats)
    }
}

/// Keys become object paths, so keep them to a conservative character set.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= 256
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && key != "."
        && key != "..";
    if valid {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidKey(key.to_string()))
    }
}
