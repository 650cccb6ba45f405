use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::fallback::{FetchStage, FetchTarget};
use super::{check_status, BackendError};

/// Public gateways tried, in this order, after the configured node gateway.
pub const DEFAULT_MIRRORS: &[&str] = &[
    "https://ipfs.io",
    "https://dweb.link",
    "https://gateway.pinata.cloud",
    "https://w3s.link",
];

/// An HTTP gateway serving content addresses at `{base}/ipfs/{cid}`.
#[derive(Debug, Clone)]
pub struct GatewayStage {
    name: String,
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl GatewayStage {
    pub fn new(client: reqwest::Client, base: Url, timeout: Duration) -> Self {
        let name = match base.host_str() {
            Some(host) => format!("gateway:{}", host),
            None => "gateway".to_string(),
        };
        Self {
            name,
            client,
            base,
            timeout,
        }
    }

    /// Stages for the default public mirrors.
    pub fn mirrors(client: &reqwest::Client, timeout: Duration) -> Vec<Self> {
        DEFAULT_MIRRORS
            .iter()
            .filter_map(|m| Url::parse(m).ok())
            .map(|base| Self::new(client.clone(), base, timeout))
            .collect()
    }

    pub fn content_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{}", self.base.as_str().trim_end_matches('/'), cid)
    }

    /// Whether the gateway can serve `cid`, via a HEAD request.
    pub async fn has(&self, cid: &str) -> Result<bool, BackendError> {
        let response = self.client.head(self.content_url(cid)).send().await?;
        match check_status(&self.name, response).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl FetchStage for GatewayStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Bytes, BackendError> {
        let response = self.client.get(self.content_url(&target.id)).send().await?;
        let response = check_status(&self.name, response).await?;
        Ok(response.bytes().await?)
    }
}
