use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart;
use serde_json::{json, Value};
use url::Url;

use super::fallback::{race_with_timeout, FetchStage, FetchTarget};
use super::gateway::GatewayStage;
use super::record::{normalize, BackendRecord};
use super::{check_status, BackendError, BackendKind, StorageAdapter, UploadMetadata, UploadResult};

pub const DEFAULT_PINNING_API: &str = "https://api.pinata.cloud";
pub const DEFAULT_PINNING_GATEWAY: &str = "https://gateway.pinata.cloud";

#[derive(Debug, Clone)]
pub struct PinningConfig {
    pub api_url: Url,
    pub gateway_url: Url,
    /// Bearer token sent with every API call
    pub jwt: String,
    pub timeout: Duration,
}

/// Remote pinning service backend.
#[derive(Clone)]
pub struct PinningAdapter {
    client: reqwest::Client,
    api_url: Url,
    jwt: String,
    gateway: GatewayStage,
    timeout: Duration,
}

impl std::fmt::Debug for PinningAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinningAdapter")
            .field("api_url", &self.api_url.as_str())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl PinningAdapter {
    pub fn new(client: reqwest::Client, config: PinningConfig) -> Self {
        Self {
            gateway: GatewayStage::new(client.clone(), config.gateway_url, config.timeout),
            client,
            api_url: config.api_url,
            jwt: config.jwt,
            timeout: config.timeout,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    /// Pinned objects whose content id contains `cid`.
    pub async fn pins(&self, cid: &str) -> Result<Vec<BackendRecord>, BackendError> {
        let response = self
            .client
            .get(self.api("data/pinList"))
            .bearer_auth(&self.jwt)
            .query(&[("hashContains", cid), ("status", "pinned")])
            .send()
            .await?;
        let response = check_status("pinList", response).await?;
        let body: Value = response.json().await?;

        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::Rejected("pinList response without rows".into()))?;
        rows.iter().map(normalize).collect()
    }
}

#[async_trait]
impl StorageAdapter for PinningAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Pinning
    }

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError> {
        let size = data.len() as u64;
        let part = multipart::Part::stream_with_length(data, size)
            .file_name(metadata.file_name.clone())
            .mime_str(&metadata.mime_type)
            .map_err(|e| BackendError::Rejected(format!("invalid mime type: {}", e)))?;
        let pin_metadata = json!({
            "name": metadata.file_name,
            "keyvalues": {
                "visibility": metadata.visibility.as_str(),
                "mimeType": metadata.mime_type,
            },
        });
        let form = multipart::Form::new()
            .part("file", part)
            .text("pinataMetadata", pin_metadata.to_string());

        let response = self
            .client
            .post(self.api("pinning/pinFileToIPFS"))
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await?;
        let response = check_status("pinFileToIPFS", response).await?;
        let body: Value = response.json().await?;
        let record = normalize(&body)?;

        tracing::debug!(cid = %record.id, size, "pinned on remote service");
        Ok(UploadResult {
            backend: BackendKind::Pinning,
            url: self.gateway.content_url(&record.id),
            id: record.id,
            locator: None,
            size: record.size.unwrap_or(size),
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        race_with_timeout(
            self.gateway.name(),
            self.timeout,
            self.gateway.fetch(&FetchTarget::new(id)),
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.api(&format!("pinning/unpin/{}", id)))
            .bearer_auth(&self.jwt)
            .send()
            .await?;

        match check_status("unpin", response).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(BackendError::Rejected(detail)) if detail.contains("not pinned") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        let pins = self.pins(id).await?;
        Ok(pins.iter().any(|pin| pin.id == id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::{Multipart, Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;
    use crate::visibility::Visibility;

    const JWT: &str = "test-jwt";

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", JWT))
            .unwrap_or(false)
    }

    fn adapter(base: Url) -> PinningAdapter {
        PinningAdapter::new(
            reqwest::Client::new(),
            PinningConfig {
                api_url: base.clone(),
                gateway_url: base,
                jwt: JWT.into(),
                timeout: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test]
    async fn test_upload_sends_metadata_and_token() {
        let metadata_seen = Arc::new(Mutex::new(None::<Value>));
        let seen = metadata_seen.clone();
        let router = Router::new().route(
            "/pinning/pinFileToIPFS",
            post(move |headers: HeaderMap, mut multipart: Multipart| {
                let seen = seen.clone();
                async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad token" })));
                    }
                    while let Some(field) = multipart.next_field().await.unwrap() {
                        if field.name() == Some("pinataMetadata") {
                            let text = field.text().await.unwrap();
                            *seen.lock() = Some(serde_json::from_str(&text).unwrap());
                        }
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "IpfsHash": "bafyPinned",
                            "PinSize": 3,
                            "Timestamp": "2025-01-01T00:00:00Z"
                        })),
                    )
                }
            }),
        );
        let pinning = adapter(serve(router).await);

        let result = pinning
            .upload(
                Bytes::from_static(b"abc"),
                &UploadMetadata {
                    file_name: "abc.txt".into(),
                    mime_type: "text/plain".into(),
                    visibility: Visibility::Private,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.id, "bafyPinned");
        assert_eq!(result.backend, BackendKind::Pinning);
        assert_eq!(result.size, 3);

        let metadata = metadata_seen.lock().clone().unwrap();
        assert_eq!(metadata["name"], "abc.txt");
        assert_eq!(metadata["keyvalues"]["visibility"], "private");
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let router = Router::new().route(
            "/pinning/pinFileToIPFS",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid token") }),
        );
        let pinning = adapter(serve(router).await);

        let result = pinning
            .upload(
                Bytes::from_static(b"abc"),
                &UploadMetadata {
                    file_name: "abc.txt".into(),
                    mime_type: "text/plain".into(),
                    visibility: Visibility::Public,
                },
            )
            .await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_unpin_missing_is_success() {
        let router = Router::new().route(
            "/pinning/unpin/:cid",
            delete(|Path(cid): Path<String>| async move {
                if cid == "bafyNotPinned" {
                    (StatusCode::BAD_REQUEST, "current user has not pinned the cid".to_string())
                } else {
                    (StatusCode::NOT_FOUND, "unknown".to_string())
                }
            }),
        );
        let pinning = adapter(serve(router).await);

        pinning.delete("bafyNotPinned").await.unwrap();
        pinning.delete("bafyUnknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_exists_uses_pin_list() {
        let router = Router::new()
            .route(
                "/data/pinList",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let rows = if q.get("hashContains").map(String::as_str) == Some("bafyListed") {
                        vec![json!({ "ipfs_pin_hash": "bafyListed", "size": 1, "user_id": "u" })]
                    } else {
                        vec![]
                    };
                    Json(json!({ "count": rows.len(), "rows": rows }))
                }),
            )
            .route("/ipfs/:cid", get(|| async { "gateway bytes" }));
        let pinning = adapter(serve(router).await);

        assert!(pinning.exists("bafyListed").await.unwrap());
        assert!(!pinning.exists("bafyOther").await.unwrap());
        assert_eq!(
            pinning.download("bafyListed").await.unwrap(),
            Bytes::from_static(b"gateway bytes")
        );
    }
}
