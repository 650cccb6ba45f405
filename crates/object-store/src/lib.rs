//! SQLite + Object Storage Backend
//!
//! This crate provides the durable device-local blob store used by Tessera's
//! local cache backend. It keeps metadata in SQLite and blob bytes in pluggable
//! object storage (S3/MinIO/local filesystem/memory).
//!
//! # Features
//!
//! - Content-addressed storage using BLAKE3 hashes
//! - Named entries, so bytes fetched from another backend can be cached under
//!   that backend's identifier
//! - SQLite for fast metadata queries
//! - Recovery support: rebuild metadata from object storage
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera_object_store::ObjectStore;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), tessera_object_store::BlobStoreError> {
//! let store = ObjectStore::new_local(Path::new("/tmp/blobs")).await?;
//! let key = store.put(b"hello".to_vec()).await?;
//! assert!(store.has(&key).await?);
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod object_store;
mod storage;

pub use error::{BlobStoreError, Result};
pub use crate::object_store::{BlobInfo, ObjectStore, RecoveryStats};
pub use storage::ObjectStoreConfig;
