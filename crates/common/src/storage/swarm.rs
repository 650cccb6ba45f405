//! Peer swarm backend over iroh + iroh-blobs.
//!
//! Content is added to an in-memory iroh-blobs store and served to peers on
//! the iroh-blobs ALPN. Seeding holds a named tag on the blob; deleting drops
//! the tag. Peers find us through a [`Locator`], a magnet style URI:
//!
//! ```text
//! magnet:?xt=urn:blake3:<hash>&x.pe=<node id>&tr=<announce>...
//! ```
//!
//! There is one client per process, created lazily by the first swarm
//! operation. If the endpoint can't be bound the failure is remembered and
//! every later operation reports the backend as unsupported.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::protocol::Router;
use iroh::{Endpoint, NodeId};
use iroh_blobs::api::blobs::BlobStatus;
use iroh_blobs::api::downloader::{Downloader, Shuffled};
use iroh_blobs::api::Tag;
use iroh_blobs::store::mem::MemStore;
use iroh_blobs::{BlobsProtocol, Hash};
use parking_lot::Mutex;
use url::form_urlencoded;

use super::handle::LazyHandle;
use super::{BackendError, BackendKind, StorageAdapter, UploadMetadata, UploadResult};
use crate::crypto::random_bytes;

const MAGNET_PREFIX: &str = "magnet:?";
const BLAKE3_URN: &str = "urn:blake3:";

/// Where to find a blob on the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub hash: Hash,
    /// Peers known to seed the blob
    pub peers: Vec<NodeId>,
    /// Announce entries, carried verbatim
    pub announce: Vec<String>,
}

impl Locator {
    pub fn new(hash: Hash) -> Self {
        Self {
            hash,
            peers: Vec::new(),
            announce: Vec::new(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}xt={}{}", MAGNET_PREFIX, BLAKE3_URN, self.hash.to_hex())?;
        for peer in &self.peers {
            write!(f, "&x.pe={}", peer)?;
        }
        for tracker in &self.announce {
            let encoded: String = form_urlencoded::byte_serialize(tracker.as_bytes()).collect();
            write!(f, "&tr={}", encoded)?;
        }
        Ok(())
    }
}

impl FromStr for Locator {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BackendError::Rejected(format!("invalid locator: {}", reason));

        let query = s
            .strip_prefix(MAGNET_PREFIX)
            .ok_or_else(|| invalid("not a magnet uri"))?;

        let mut hash = None;
        let mut peers = Vec::new();
        let mut announce = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "xt" => {
                    let hex = value
                        .strip_prefix(BLAKE3_URN)
                        .ok_or_else(|| invalid("xt is not a blake3 urn"))?;
                    hash = Some(Hash::from_str(hex).map_err(|_| invalid("bad blake3 hash"))?);
                }
                "x.pe" => {
                    peers.push(NodeId::from_str(&value).map_err(|_| invalid("bad peer id"))?);
                }
                "tr" => announce.push(value.into_owned()),
                _ => {}
            }
        }

        Ok(Locator {
            hash: hash.ok_or_else(|| invalid("missing xt"))?,
            peers,
            announce,
        })
    }
}

/// Swarm settings.
#[derive(Debug, Clone, Default)]
pub struct SwarmConfig {
    /// Announce list. Entries that are node ids double as fixed providers.
    pub announce: Vec<String>,
}

impl SwarmConfig {
    fn announce_peers(&self) -> Vec<NodeId> {
        self.announce
            .iter()
            .filter_map(|entry| NodeId::from_str(entry).ok())
            .collect()
    }
}

/// The shared iroh endpoint and blob store behind the swarm backend.
pub struct SwarmClient {
    endpoint: Endpoint,
    blobs: Arc<BlobsProtocol>,
    router: Router,
    seeding: Mutex<HashMap<Hash, Tag>>,
    config: SwarmConfig,
}

impl fmt::Debug for SwarmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmClient")
            .field("node_id", &self.endpoint.node_id())
            .field("seeding", &self.seeding.lock().len())
            .finish()
    }
}

impl SwarmClient {
    /// Bind an endpoint with DHT discovery and start serving blobs.
    pub async fn spawn(config: SwarmConfig) -> anyhow::Result<Self> {
        let secret_key = iroh::SecretKey::from_bytes(&random_bytes::<32>()?);

        let discovery = DhtDiscovery::builder()
            .secret_key(secret_key.clone())
            .build()?;

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .discovery(discovery)
            .bind()
            .await?;

        Ok(Self::with_endpoint(endpoint, config))
    }

    /// Serve blobs on an already bound endpoint.
    pub fn with_endpoint(endpoint: Endpoint, config: SwarmConfig) -> Self {
        let store = MemStore::new();
        let blobs = Arc::new(BlobsProtocol::new(&store, None));
        let router = Router::builder(endpoint.clone())
            .accept(iroh_blobs::ALPN, blobs.clone())
            .spawn();

        tracing::info!(node_id = %endpoint.node_id(), "swarm client started");
        Self {
            endpoint,
            blobs,
            router,
            seeding: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    /// A locator pointing peers at this node for `hash`.
    pub fn locator(&self, hash: Hash) -> Locator {
        Locator {
            hash,
            peers: vec![self.node_id()],
            announce: self.config.announce.clone(),
        }
    }

    /// Add `data` to the store and keep it available until [`unseed`](Self::unseed).
    pub async fn seed(&self, data: Bytes) -> anyhow::Result<Locator> {
        let store = self.blobs.store();
        let temp = store.blobs().add_bytes(data).temp_tag().await?;
        let hash = temp.hash();
        let tag = store.tags().create(temp.hash_and_format()).await?;
        self.seeding.lock().insert(hash, tag);

        tracing::debug!(hash = %hash, "seeding blob");
        Ok(self.locator(hash))
    }

    /// Stop seeding `hash`. Returns whether it was being seeded.
    pub async fn unseed(&self, hash: &Hash) -> anyhow::Result<bool> {
        let tag = self.seeding.lock().remove(hash);
        match tag {
            Some(tag) => {
                self.blobs.store().tags().delete(tag).await?;
                tracing::debug!(hash = %hash, "stopped seeding blob");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn has(&self, hash: &Hash) -> anyhow::Result<bool> {
        let status = self
            .blobs
            .store()
            .blobs()
            .status(*hash)
            .await
            .map_err(|err| anyhow!(err))?;
        Ok(matches!(status, BlobStatus::Complete { .. }))
    }

    /// Fetch the blob named by `locator`, from the local store if complete,
    /// otherwise from the locator's peers and the announce list.
    pub async fn fetch(&self, locator: &Locator) -> Result<Bytes, BackendError> {
        let hash = locator.hash;
        let unavailable = |err: anyhow::Error| BackendError::Unavailable(err.to_string());

        if !self.has(&hash).await.map_err(unavailable)? {
            let mut providers = locator.peers.clone();
            providers.extend(self.config.announce_peers());
            providers.retain(|peer| *peer != self.node_id());
            providers.sort();
            providers.dedup();
            if providers.is_empty() {
                return Err(BackendError::NotFound(hash.to_hex()));
            }

            tracing::debug!(hash = %hash, providers = providers.len(), "downloading from swarm");
            let downloader = Downloader::new(self.blobs.store(), &self.endpoint);
            downloader
                .download(hash, Shuffled::new(providers))
                .await
                .map_err(|err| unavailable(anyhow!(err)))?;
        }

        self.blobs
            .store()
            .blobs()
            .get_bytes(hash)
            .await
            .map_err(|err| unavailable(anyhow!(err)))
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.router.shutdown().await?;
        Ok(())
    }
}

/// The process wide swarm client slot.
pub type SwarmHandle = LazyHandle<SwarmClient>;

static SHARED_SWARM: SwarmHandle = LazyHandle::new("swarm");

/// Storage adapter over the shared [`SwarmClient`].
#[derive(Debug, Clone)]
pub struct SwarmAdapter {
    handle: &'static SwarmHandle,
    config: SwarmConfig,
}

impl SwarmAdapter {
    /// An adapter over the process wide client.
    pub fn shared(config: SwarmConfig) -> Self {
        Self::with_handle(&SHARED_SWARM, config)
    }

    pub fn with_handle(handle: &'static SwarmHandle, config: SwarmConfig) -> Self {
        Self { handle, config }
    }

    pub async fn client(&self) -> Result<Arc<SwarmClient>, BackendError> {
        let config = self.config.clone();
        self.handle.get_or_init(|| SwarmClient::spawn(config)).await
    }

    /// Download using everything the locator knows.
    pub async fn download_from(&self, locator: &Locator) -> Result<Bytes, BackendError> {
        self.client().await?.fetch(locator).await
    }

    /// Seed `data` and return its locator.
    pub async fn seed(&self, data: Bytes) -> Result<Locator, BackendError> {
        self.client()
            .await?
            .seed(data)
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))
    }

    /// Stop the shared client if it was ever started.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        match self.handle.get() {
            Some(client) => client.shutdown().await,
            None => Ok(()),
        }
    }
}

fn parse_hash(id: &str) -> Result<Hash, BackendError> {
    Hash::from_str(id).map_err(|_| BackendError::Rejected(format!("not a blake3 hash: {}", id)))
}

#[async_trait]
impl StorageAdapter for SwarmAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Swarm
    }

    async fn upload(
        &self,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> Result<UploadResult, BackendError> {
        let size = data.len() as u64;
        let locator = self.seed(data).await?;
        let locator_uri = locator.to_string();

        Ok(UploadResult {
            backend: BackendKind::Swarm,
            id: locator.hash.to_hex(),
            url: locator_uri.clone(),
            locator: Some(locator_uri),
            size,
            visibility: metadata.visibility,
            deduplicated: false,
        })
    }

    async fn download(&self, id: &str) -> Result<Bytes, BackendError> {
        let mut locator = Locator::new(parse_hash(id)?);
        locator.announce = self.config.announce.clone();
        self.download_from(&locator).await
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let hash = parse_hash(id)?;
        let client = self.client().await?;
        client
            .unseed(&hash)
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, BackendError> {
        let hash = parse_hash(id)?;
        self.client()
            .await?
            .has(&hash)
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> NodeId {
        iroh::SecretKey::from_bytes(&[9u8; 32]).public()
    }

    #[test]
    fn test_locator_format() {
        let hash = Hash::new(b"swarm content");
        let locator = Locator {
            hash,
            peers: vec![peer()],
            announce: vec!["udp://tracker.example:6969/announce".into()],
        };

        let uri = locator.to_string();
        assert!(uri.starts_with(&format!("magnet:?xt=urn:blake3:{}", hash.to_hex())));
        assert!(uri.contains(&format!("&x.pe={}", peer())));
        assert!(uri.contains("&tr=udp%3A%2F%2Ftracker.example%3A6969%2Fannounce"));

        assert_eq!(uri.parse::<Locator>().unwrap(), locator);
    }

    #[test]
    fn test_locator_rejects_garbage() {
        assert!("https://example.com".parse::<Locator>().is_err());
        assert!("magnet:?xt=urn:btih:abcdef".parse::<Locator>().is_err());
        assert!("magnet:?tr=udp%3A%2F%2Fx".parse::<Locator>().is_err());
        assert!(format!("magnet:?xt=urn:blake3:{}&x.pe=nope", Hash::new(b"x").to_hex())
            .parse::<Locator>()
            .is_err());
    }

    async fn local_client() -> SwarmClient {
        let endpoint = Endpoint::builder()
            .relay_mode(iroh::RelayMode::Disabled)
            .bind()
            .await
            .unwrap();
        SwarmClient::with_endpoint(endpoint, SwarmConfig::default())
    }

    #[tokio::test]
    async fn test_seed_then_fetch_locally() {
        let client = local_client().await;
        let data = Bytes::from_static(b"seeded bytes");

        let locator = client.seed(data.clone()).await.unwrap();
        assert_eq!(locator.hash, Hash::new(&data));
        assert_eq!(locator.peers, vec![client.node_id()]);
        assert!(client.has(&locator.hash).await.unwrap());

        let fetched = client.fetch(&locator).await.unwrap();
        assert_eq!(fetched, data);

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unseed_releases_tag() {
        let client = local_client().await;
        let locator = client.seed(Bytes::from_static(b"short lived")).await.unwrap();
        assert!(client.seeding.lock().contains_key(&locator.hash));

        assert!(client.unseed(&locator.hash).await.unwrap());
        assert!(!client.seeding.lock().contains_key(&locator.hash));
        assert!(!client.unseed(&locator.hash).await.unwrap());

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_absent_blob_without_providers_is_not_found() {
        let client = local_client().await;
        let hash = Hash::new(b"nobody has this");

        // only ourselves as a peer leaves no one to ask
        let locator = client.locator(hash);
        let result = client.fetch(&locator).await;
        assert!(matches!(result, Err(BackendError::NotFound(id)) if id == hash.to_hex()));

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_adapter_upload_exists_delete() {
        static LOCAL: SwarmHandle = LazyHandle::new("swarm-local-test");
        LOCAL
            .get_or_init(|| async { Ok::<_, String>(local_client().await) })
            .await
            .unwrap();
        let adapter = SwarmAdapter::with_handle(&LOCAL, SwarmConfig::default());

        let data = Bytes::from_static(b"adapter bytes");
        let metadata = UploadMetadata {
            file_name: "adapter.bin".into(),
            mime_type: "application/octet-stream".into(),
            visibility: crate::visibility::Visibility::Public,
        };
        let result = adapter.upload(data.clone(), &metadata).await.unwrap();
        assert_eq!(result.backend, BackendKind::Swarm);
        assert_eq!(result.id, Hash::new(&data).to_hex());
        let locator: Locator = result.locator.unwrap().parse().unwrap();
        assert_eq!(locator.hash.to_hex(), result.id);

        assert!(adapter.exists(&result.id).await.unwrap());
        assert_eq!(adapter.download(&result.id).await.unwrap(), data);
        assert!(matches!(
            adapter.exists("not-a-hash").await,
            Err(BackendError::Rejected(_))
        ));

        adapter.delete(&result.id).await.unwrap();
        let client = adapter.client().await.unwrap();
        assert!(!client.seeding.lock().contains_key(&locator.hash));

        adapter.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_swarm_is_cached() {
        static BROKEN: SwarmHandle = LazyHandle::new("swarm-test");
        let _ = BROKEN
            .get_or_init(|| async { Err::<SwarmClient, _>("endpoint bind failed") })
            .await;

        let adapter = SwarmAdapter::with_handle(&BROKEN, SwarmConfig::default());
        let result = adapter.exists(&Hash::new(b"x").to_hex()).await;
        assert!(matches!(result, Err(BackendError::Unsupported(_))));
    }
}
