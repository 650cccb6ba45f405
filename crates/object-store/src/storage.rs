//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{BlobStoreError, Result};

/// Configuration for the object storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// A stored object as reported by a listing.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub key: String,
    pub size: u64,
}

/// Wrapper around different object storage backends.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket is missing
                let prefix = ObjectPath::from("");
                let mut stream = store.list(Some(&prefix));
                match stream.try_next().await {
                    Ok(_) => {}
                    Err(object_store::Error::NotFound { .. }) => {
                        return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("NoSuchBucket")
                            || msg.contains("bucket") && msg.contains("not")
                        {
                            return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                        }
                        return Err(e.into());
                    }
                }
                drop(stream);

                store
            }
        };

        Ok(Self { inner })
    }

    /// Create an in-memory storage backend.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    fn blob_path(key: &str) -> ObjectPath {
        ObjectPath::from(format!("blobs/{}", key))
    }

    /// Put blob data into storage.
    pub async fn put_data(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Self::blob_path(key);
        self.inner.put(&path, data.into()).await?;
        Ok(())
    }

    /// Get blob data from storage.
    pub async fn get_data(&self, key: &str) -> Result<Option<Bytes>> {
        let path = Self::blob_path(key);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if blob data exists in storage.
    pub async fn has_data(&self, key: &str) -> Result<bool> {
        let path = Self::blob_path(key);
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete blob data from storage.
    pub async fn delete_data(&self, key: &str) -> Result<()> {
        let path = Self::blob_path(key);
        // The blob may already be gone
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List every blob in storage together with its size.
    pub async fn list_data(&self) -> Result<Vec<StoredObject>> {
        let prefix = ObjectPath::from("blobs/");
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;

        let objects = items
            .into_iter()
            .filter_map(|meta| {
                let size = meta.size as u64;
                meta.location
                    .as_ref()
                    .strip_prefix("blobs/")
                    .map(|key| StoredObject {
                        key: key.to_string(),
                        size,
                    })
            })
            .collect();

        Ok(objects)
    }
}
