use async_trait::async_trait;
use bytes::Bytes;
use object_store::{BlobStoreError, ObjectStore};

use super::{BackendError, BackendKind, StorageAdapter, UploadMetadata, UploadResult};

impl From<BlobStoreError> for BackendError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::NotFound(key) => BackendError::NotFound(key),
            BlobStoreError::InvalidKey(key) => BackendError::Rejected(format!("invalid key {}", key)),
            other => BackendError::Unavailable(other.to_string()),
        }
    }
}

/// Device-local backend over the SQLite + object storage blob store.
///
/// Besides being a backend of its own, it caches bytes fetched from or
/// uploaded to other backends under their ids, which makes it the last
/// stage of every download chain.
#[derive(Debug, Clone)]
pub struct LocalCacheAdapter {
    store: ObjectStore,
}

impl LocalCacheAdapter {
    pub fn new(store: ObjectStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn url(id: &str) -> String {
        format!("local://{}", id)
    }

    /// Keep a copy of bytes stored elsewhere under that backend's id.
    pub async fn cache(&self, id: &str, data: Bytes) -> Result<(), BackendError> {
        self.store.put_named(id, data).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalCacheAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError> {
        let size = data.len() as u64;
        let id = self.store.put(data).await?;
        tracing::debug!(id = %id, size, file_name = %metadata.file_name, "stored in local cache");

        Ok(UploadResult {
            backend: BackendKind::Local,
            url: Self::url(&id),
            id,
            locator: None,
            size,
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.store.delete(id).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.store.has(id).await?)
    }
}
