use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart;
use url::Url;

use super::fallback::{race_with_timeout, FallbackChain, FetchStage, FetchTarget};
use super::gateway::GatewayStage;
use super::record::normalize;
use super::{check_status, BackendError, BackendKind, StorageAdapter, UploadMetadata, UploadResult};

/// Connection settings for a content addressed node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Base of the node's HTTP API, e.g. `http://127.0.0.1:5001`
    pub api_url: Url,
    /// The node's own gateway, tried before any mirror
    pub gateway_url: Url,
    /// Public mirrors, in the order they are tried
    pub mirrors: Vec<Url>,
    pub timeout: Duration,
}

/// Backend for a node exposing the `/api/v0` HTTP API.
///
/// Uploads are pinned on add. Reads never touch the API: they go through the
/// node's gateway and then the configured mirrors.
#[derive(Debug, Clone)]
pub struct NodeAdapter {
    client: reqwest::Client,
    api_url: Url,
    gateways: Vec<GatewayStage>,
    chain: FallbackChain,
    timeout: Duration,
}

impl NodeAdapter {
    pub fn new(client: reqwest::Client, config: NodeConfig) -> Self {
        let gateways: Vec<GatewayStage> = std::iter::once(config.gateway_url)
            .chain(config.mirrors)
            .map(|base| GatewayStage::new(client.clone(), base, config.timeout))
            .collect();

        let mut chain = FallbackChain::new();
        for gateway in &gateways {
            chain.push(std::sync::Arc::new(gateway.clone()));
        }

        Self {
            client,
            api_url: config.api_url,
            gateways,
            chain,
            timeout: config.timeout,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    /// The node gateway's URL for `cid`.
    pub fn content_url(&self, cid: &str) -> String {
        match self.gateways.first() {
            Some(gateway) => gateway.content_url(cid),
            None => format!("ipfs://{}", cid),
        }
    }

    /// Pin content that is already known to the network.
    pub async fn pin(&self, cid: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.api("pin/add"))
            .query(&[("arg", cid)])
            .send()
            .await?;
        check_status("pin/add", response).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for NodeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Node
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
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.api("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?;
        let response = check_status("add", response).await?;
        let body: serde_json::Value = response.json().await?;
        let record = normalize(&body)?;

        tracing::debug!(cid = %record.id, size, "added to node");
        Ok(UploadResult {
            backend: BackendKind::Node,
            url: self.content_url(&record.id),
            id: record.id,
            locator: None,
            size: record.size.unwrap_or(size),
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        let fetched = self.chain.fetch(&FetchTarget::new(id)).await?;
        Ok(fetched.data)
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.api("pin/rm"))
            .query(&[("arg", id)])
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if body.contains("not pinned") {
            tracing::debug!(cid = id, "already unpinned");
            return Ok(());
        }
        Err(BackendError::Unavailable(format!(
            "pin/rm returned {}: {}",
            status,
            body.trim()
        )))
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        let mut answered_absent = false;
        let mut last_error = None;

        for gateway in &self.gateways {
            match race_with_timeout(gateway.name(), self.timeout, gateway.has(id)).await {
                Ok(true) => return Ok(true),
                Ok(false) => answered_absent = true,
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            Some(err) if !answered_absent => Err(err),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Multipart, Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::visibility::Visibility;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    fn adapter(api: Url, gateway: Url, mirrors: Vec<Url>) -> NodeAdapter {
        NodeAdapter::new(
            reqwest::Client::new(),
            NodeConfig {
                api_url: api,
                gateway_url: gateway,
                mirrors,
                timeout: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test]
    async fn test_add_is_pinned_and_normalized() {
        let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
        let seen_handler = seen.clone();
        let router = Router::new().route(
            "/api/v0/add",
            post(
                move |Query(params): Query<std::collections::HashMap<String, String>>,
                      mut multipart: Multipart| {
                    let seen = seen_handler.clone();
                    async move {
                        while let Some(field) = multipart.next_field().await.unwrap() {
                            let name = field.file_name().unwrap_or_default().to_string();
                            let bytes = field.bytes().await.unwrap();
                            seen.lock().push((name, String::from_utf8_lossy(&bytes).to_string()));
                        }
                        assert_eq!(params.get("pin").map(String::as_str), Some("true"));
                        Json(json!({ "Hash": "QmAdded", "Name": "hello.txt", "Size": "5" }))
                    }
                },
            ),
        );
        let api = serve(router).await;
        let node = adapter(api.clone(), api, vec![]);

        let result = node
            .upload(
                Bytes::from_static(b"hello"),
                &UploadMetadata {
                    file_name: "hello.txt".into(),
                    mime_type: "text/plain".into(),
                    visibility: Visibility::Public,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.id, "QmAdded");
        assert_eq!(result.backend, BackendKind::Node);
        assert_eq!(result.size, 5);
        assert!(result.url.ends_with("/ipfs/QmAdded"));
        assert_eq!(
            seen.lock().as_slice(),
            &[("hello.txt".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_download_falls_back_to_mirror() {
        let broken = serve(Router::new().route(
            "/ipfs/:cid",
            get(|| async { StatusCode::BAD_GATEWAY }),
        ))
        .await;
        let mirror = serve(Router::new().route(
            "/ipfs/:cid",
            get(|Path(cid): Path<String>| async move { format!("content of {}", cid) }),
        ))
        .await;

        let node = adapter(broken.clone(), broken, vec![mirror]);
        let bytes = node.download("QmMirror").await.unwrap();
        assert_eq!(bytes, Bytes::from("content of QmMirror"));
    }

    #[tokio::test]
    async fn test_exists_via_gateways() {
        let gateway = serve(Router::new().route(
            "/ipfs/:cid",
            get(|Path(cid): Path<String>| async move {
                if cid == "QmPresent" {
                    (StatusCode::OK, "yes")
                } else {
                    (StatusCode::NOT_FOUND, "no")
                }
            }),
        ))
        .await;

        let node = adapter(gateway.clone(), gateway, vec![]);
        assert!(node.exists("QmPresent").await.unwrap());
        assert!(!node.exists("QmAbsent").await.unwrap());
    }

    #[tokio::test]
    async fn test_pin_sends_cid() {
        let pinned = Arc::new(Mutex::new(Vec::<String>::new()));
        let pinned_handler = pinned.clone();
        let api = serve(Router::new().route(
            "/api/v0/pin/add",
            post(
                move |Query(params): Query<std::collections::HashMap<String, String>>| {
                    let pinned = pinned_handler.clone();
                    async move {
                        let cid = params.get("arg").cloned().unwrap_or_default();
                        pinned.lock().push(cid.clone());
                        Json(json!({ "Pins": [cid] }))
                    }
                },
            ),
        ))
        .await;

        let node = adapter(api.clone(), api, vec![]);
        node.pin("QmKnown").await.unwrap();
        assert_eq!(pinned.lock().as_slice(), &["QmKnown".to_string()]);
    }

    #[tokio::test]
    async fn test_pin_failure_is_reported() {
        let api = serve(Router::new().route(
            "/api/v0/pin/add",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;

        let node = adapter(api.clone(), api, vec![]);
        assert!(node.pin("QmKnown").await.is_err());
    }

    #[tokio::test]
    async fn test_unpin_not_pinned_is_success() {
        let api = serve(Router::new().route(
            "/api/v0/pin/rm",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "Message": "not pinned or pinned indirectly", "Code": 0 })),
                )
            }),
        ))
        .await;

        let node = adapter(api.clone(), api, vec![]);
        node.delete("QmGone").await.unwrap();
    }
}
