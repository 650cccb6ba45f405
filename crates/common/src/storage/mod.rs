//! Storage backends behind one adapter contract.
//!
//! Every backend implements [`StorageAdapter`]: upload, download, delete and
//! exists, all async and all failing with [`BackendError`]. Backend specific
//! failures (HTTP status codes, iroh request errors, object store errors) are
//! mapped to that shape here at the boundary and nowhere else.
//!
//! Backends:
//! - [`LocalCacheAdapter`]: SQLite metadata + object storage on this device
//! - [`SwarmAdapter`]: iroh-blobs seeding over an iroh endpoint
//! - [`NodeAdapter`]: a content addressed node's HTTP API plus gateways
//! - [`PinningAdapter`]: a remote pinning service
//!
//! Downloads go through a [`FallbackChain`] of time bounded stages.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::visibility::Visibility;

mod fallback;
mod gateway;
mod handle;
mod local;
mod node;
mod pinning;
mod record;
mod swarm;

pub use fallback::{
    race_with_timeout, AdapterStage, FallbackChain, FetchStage, FetchTarget, Fetched, OriginStage,
    SwarmStage,
};
pub use gateway::{GatewayStage, DEFAULT_MIRRORS};
pub use handle::LazyHandle;
pub use local::LocalCacheAdapter;
pub use node::{NodeAdapter, NodeConfig};
pub use pinning::{PinningAdapter, PinningConfig, DEFAULT_PINNING_API, DEFAULT_PINNING_GATEWAY};
pub use record::{normalize, BackendRecord};
pub use swarm::{Locator, SwarmAdapter, SwarmClient, SwarmConfig, SwarmHandle};

/// Which backend a reference lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Swarm,
    Node,
    Pinning,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Swarm => "swarm",
            BackendKind::Node => "node",
            BackendKind::Pinning => "pinning",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown backend: {0}")]
pub struct ParseBackendKindError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "swarm" => Ok(BackendKind::Swarm),
            "node" => Ok(BackendKind::Node),
            "pinning" => Ok(BackendKind::Pinning),
            other => Err(ParseBackendKindError(other.to_string())),
        }
    }
}

/// Failure of a single backend operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered and does not have the object
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// The backend can't be used in this process at all
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The backend answered and refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub(crate) fn timeout(what: impl fmt::Display, after: Duration) -> Self {
        BackendError::Timeout(format!("{} after {:?}", what, after))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(err.to_string())
        } else if err.is_decode() {
            BackendError::Rejected(format!("malformed response: {}", err))
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

/// Map a non-success HTTP status onto the adapter error shape.
pub(crate) async fn check_status(
    what: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", what, status, body.trim());
    Err(match status.as_u16() {
        404 | 410 => BackendError::NotFound(detail),
        408 | 504 => BackendError::Timeout(detail),
        400..=499 => BackendError::Rejected(detail),
        _ => BackendError::Unavailable(detail),
    })
}

/// What the caller knows about a file at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub file_name: String,
    pub mime_type: String,
    pub visibility: Visibility,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub backend: BackendKind,
    /// Backend specific id or content address
    pub id: String,
    pub url: String,
    /// Swarm locator when the content is also seeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub size: u64,
    pub visibility: Visibility,
    /// True when the upload was satisfied from the content index
    pub deduplicated: bool,
}

/// Uniform contract implemented by every storage backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError>;

    async fn download(&self, id: &str) -> Result<Bytes, BackendError>;

    /// Remove the object. Deleting an object that is already gone succeeds.
    async fn delete(&self, id: &str) -> Result<(), BackendError>;

    async fn exists(&self, id: &str) -> Result<bool, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip() {
        for kind in [
            BackendKind::Local,
            BackendKind::Swarm,
            BackendKind::Node,
            BackendKind::Pinning,
        ] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("ftp".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_upload_result_serializes_camel_case() {
        let result = UploadResult {
            backend: BackendKind::Pinning,
            id: "bafy".into(),
            url: "https://gateway/ipfs/bafy".into(),
            locator: None,
            size: 3,
            visibility: Visibility::Public,
            deduplicated: false,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["backend"], "pinning");
        assert_eq!(value["visibility"], "public");
        assert_eq!(value["deduplicated"], false);
        assert!(value.get("locator").is_none());
    }
}
