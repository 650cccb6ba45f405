//! Wiring from [`AppState`] to a ready [`Orchestrator`].

use std::sync::Arc;
use std::time::Duration;

use common::content_index::ContentIndex;
use common::crypto::{CryptoEngine, CryptoError};
use common::database::{Database, DatabaseError};
use common::keyring::Keyring;
use common::orchestrator::Orchestrator;
use common::storage::{
    AdapterStage, FallbackChain, GatewayStage, LocalCacheAdapter, NodeAdapter, NodeConfig,
    OriginStage, PinningAdapter, PinningConfig, StorageAdapter, SwarmAdapter, SwarmConfig,
    SwarmStage,
};
use object_store::{BlobStoreError, ObjectStore, ObjectStoreConfig};

use crate::state::{AppConfig, AppState, CacheStoreConfig, PrimaryBackend, PINNING_JWT_ENV};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("local cache error: {0}")]
    Cache(#[from] BlobStoreError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),
    #[error("the pinning backend needs a token: set {} or pinning.jwt", PINNING_JWT_ENV)]
    MissingPinningToken,
}

/// Everything a command needs, built from the state directory.
#[derive(Debug, Clone)]
pub struct Service {
    pub orchestrator: Orchestrator,
    pub keyring: Keyring,
    pub cache: LocalCacheAdapter,
    swarm: Option<Arc<SwarmAdapter>>,
}

impl Service {
    pub async fn from_state(state: &AppState) -> Result<Self, ServiceError> {
        let config = &state.config;
        let timeouts = &config.timeouts;

        let db = Database::new(&state.db_path).await?;
        let keyring = Keyring::new(db.clone());
        let index = ContentIndex::new(db);
        let engine = CryptoEngine::spawn()?;
        let cache = LocalCacheAdapter::new(open_cache(state).await?);
        let client = reqwest::Client::new();

        let swarm = (config.swarm.enabled || config.primary == PrimaryBackend::Swarm).then(|| {
            Arc::new(SwarmAdapter::shared(SwarmConfig {
                announce: config.swarm.announce.clone(),
            }))
        });

        let primary = primary_adapter(config, &client, &cache, swarm.as_ref())?;
        let chain = download_chain(config, &client, &cache, &primary, swarm.as_ref());

        let mut builder = Orchestrator::builder(engine, keyring.clone(), index, primary.clone())
            .local_cache(cache.clone())
            .chain(chain)
            .allow_list(config.allow_list.clone())
            .fingerprint_secret(state.load_fingerprint_key()?)
            .upload_timeout(secs(timeouts.upload_secs))
            .seed_timeout(secs(timeouts.seed_secs));

        if let Some(swarm) = &swarm {
            if config.primary != PrimaryBackend::Swarm {
                builder = builder.seeder(swarm.clone());
            }
        }

        tracing::debug!(primary = ?config.primary, swarm = swarm.is_some(), "service ready");

        Ok(Self {
            orchestrator: builder.build(),
            keyring,
            cache,
            swarm,
        })
    }

    /// Release network resources held by the swarm client.
    pub async fn shutdown(&self) {
        if let Some(swarm) = &self.swarm {
            if let Err(e) = swarm.shutdown().await {
                tracing::warn!("swarm shutdown failed: {}", e);
            }
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

async fn open_cache(state: &AppState) -> Result<ObjectStore, ServiceError> {
    let store = match &state.config.cache_store {
        CacheStoreConfig::Filesystem => ObjectStore::new_local(&state.objects_path).await?,
        CacheStoreConfig::Directory { path } => ObjectStore::new_local(path).await?,
        CacheStoreConfig::S3 {
            endpoint,
            access_key,
            secret_key,
            bucket,
            region,
        } => {
            let config = ObjectStoreConfig::S3 {
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                bucket: bucket.clone(),
                region: region.clone(),
            };
            ObjectStore::new(&state.objects_path.join("blobs.db"), config).await?
        }
    };
    Ok(store)
}

fn primary_adapter(
    config: &AppConfig,
    client: &reqwest::Client,
    cache: &LocalCacheAdapter,
    swarm: Option<&Arc<SwarmAdapter>>,
) -> Result<Arc<dyn StorageAdapter>, ServiceError> {
    let gateway_timeout = secs(config.timeouts.gateway_secs);

    let adapter: Arc<dyn StorageAdapter> = match config.primary {
        PrimaryBackend::Local => Arc::new(cache.clone()),
        PrimaryBackend::Node => Arc::new(NodeAdapter::new(
            client.clone(),
            NodeConfig {
                api_url: config.node.api_url.clone(),
                gateway_url: config.node.gateway_url.clone(),
                mirrors: config.mirrors.clone(),
                timeout: gateway_timeout,
            },
        )),
        PrimaryBackend::Pinning => {
            let jwt = config
                .pinning_jwt()
                .ok_or(ServiceError::MissingPinningToken)?;
            Arc::new(PinningAdapter::new(
                client.clone(),
                PinningConfig {
                    api_url: config.pinning.api_url.clone(),
                    gateway_url: config.pinning.gateway_url.clone(),
                    jwt,
                    timeout: gateway_timeout,
                },
            ))
        }
        PrimaryBackend::Swarm => match swarm {
            Some(swarm) => swarm.clone(),
            None => Arc::new(SwarmAdapter::shared(SwarmConfig {
                announce: config.swarm.announce.clone(),
            })),
        },
    };
    Ok(adapter)
}

/// Swarm (when a locator is known), primary backend, public mirrors for
/// pinned content, origin, local cache.
fn download_chain(
    config: &AppConfig,
    client: &reqwest::Client,
    cache: &LocalCacheAdapter,
    primary: &Arc<dyn StorageAdapter>,
    swarm: Option<&Arc<SwarmAdapter>>,
) -> FallbackChain {
    let timeouts = &config.timeouts;
    let mut chain = FallbackChain::new();

    if let Some(swarm) = swarm {
        chain.push(Arc::new(SwarmStage::new(swarm.clone(), secs(timeouts.swarm_secs))));
    }

    let primary_timeout = match config.primary {
        PrimaryBackend::Local => secs(timeouts.local_secs),
        PrimaryBackend::Swarm => secs(timeouts.swarm_secs),
        // node and pinning downloads run their own gateway stages
        PrimaryBackend::Node | PrimaryBackend::Pinning => {
            secs(timeouts.gateway_secs * (config.mirrors.len() as u64 + 1))
        }
    };
    chain.push(Arc::new(AdapterStage::new(primary.clone(), primary_timeout)));

    if config.primary == PrimaryBackend::Pinning {
        for mirror in GatewayStage::mirrors(client, secs(timeouts.gateway_secs)) {
            chain.push(Arc::new(mirror));
        }
    }

    if let Some(origin) = &config.origin {
        chain.push(Arc::new(OriginStage::new(
            client.clone(),
            origin.clone(),
            secs(timeouts.origin_secs),
        )));
    }

    if config.primary != PrimaryBackend::Local {
        chain.push(Arc::new(AdapterStage::new(
            Arc::new(cache.clone()),
            secs(timeouts.local_secs),
        )));
    }

    chain
}
