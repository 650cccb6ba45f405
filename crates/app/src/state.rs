use std::{fs, path::PathBuf};

use common::orchestrator::AllowList;
use common::storage::{DEFAULT_MIRRORS, DEFAULT_PINNING_API, DEFAULT_PINNING_GATEWAY};
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "tessera";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const FINGERPRINT_KEY_FILE_NAME: &str = "fingerprint.key";
pub const OBJECTS_DIR_NAME: &str = "objects";
pub const PINNING_JWT_ENV: &str = "TESSERA_PINNING_JWT";

/// Which backend receives every upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryBackend {
    #[default]
    Local,
    Node,
    Pinning,
    Swarm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    pub api_url: Url,
    pub gateway_url: Url,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            api_url: parse_default("http://127.0.0.1:5001"),
            gateway_url: parse_default("http://127.0.0.1:8080"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinningSettings {
    pub api_url: Url,
    pub gateway_url: Url,
    /// Bearer token; `TESSERA_PINNING_JWT` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

impl Default for PinningSettings {
    fn default() -> Self {
        Self {
            api_url: parse_default(DEFAULT_PINNING_API),
            gateway_url: parse_default(DEFAULT_PINNING_GATEWAY),
            jwt: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmSettings {
    /// Seed every upload to the swarm alongside the primary backend
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub announce: Vec<String>,
}

/// Per-operation time limits, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    pub upload_secs: u64,
    pub seed_secs: u64,
    pub swarm_secs: u64,
    pub gateway_secs: u64,
    pub origin_secs: u64,
    pub local_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upload_secs: 120,
            seed_secs: 30,
            swarm_secs: 15,
            gateway_secs: 20,
            origin_secs: 30,
            local_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
    /// Daily rolling log files are written here when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Where the local cache keeps its bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStoreConfig {
    /// `objects/` under the state directory
    #[default]
    Filesystem,
    /// Any other local directory
    Directory {
        path: PathBuf,
    },
    /// S3-compatible object storage
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        region: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub primary: PrimaryBackend,
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub pinning: PinningSettings,
    #[serde(default)]
    pub swarm: SwarmSettings,
    /// Public gateways tried after the primary backend's own gateway
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<Url>,
    /// Origin server answering `GET {origin}/files/{id}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Url>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub allow_list: AllowList,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub cache_store: CacheStoreConfig,
}

fn parse_default(url: &str) -> Url {
    Url::parse(url).expect("hardcoded URL must parse")
}

fn default_mirrors() -> Vec<Url> {
    DEFAULT_MIRRORS.iter().map(|m| parse_default(m)).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryBackend::default(),
            node: NodeSettings::default(),
            pinning: PinningSettings::default(),
            swarm: SwarmSettings::default(),
            mirrors: default_mirrors(),
            origin: None,
            timeouts: Timeouts::default(),
            allow_list: AllowList::default(),
            log: LogSettings::default(),
            cache_store: CacheStoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// The pinning token, from the environment first, then the config file.
    pub fn pinning_jwt(&self) -> Option<String> {
        std::env::var(PINNING_JWT_ENV)
            .ok()
            .filter(|jwt| !jwt.is_empty())
            .or_else(|| self.pinning.jwt.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.tessera)
    pub state_dir: PathBuf,
    /// Path to the SQLite database holding the keyring and content index
    pub db_path: PathBuf,
    /// Path to the hex encoded installation secret
    pub fingerprint_key_path: PathBuf,
    /// Path to the local cache directory
    pub objects_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.tessera)
    pub fn state_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;

        if state_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&state_dir)?;

        let objects_path = state_dir.join(OBJECTS_DIR_NAME);
        fs::create_dir_all(&objects_path)?;

        let mut secret = [0u8; 32];
        getrandom::getrandom(&mut secret).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let fingerprint_key_path = state_dir.join(FINGERPRINT_KEY_FILE_NAME);
        fs::write(&fingerprint_key_path, hex::encode(secret))?;

        let config = config.unwrap_or_default();
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // Schema is created on first open
        let db_path = state_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            state_dir,
            db_path,
            fingerprint_key_path,
            objects_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let state_dir = Self::state_dir(custom_path)?;

        if !state_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = state_dir.join(DB_FILE_NAME);
        let fingerprint_key_path = state_dir.join(FINGERPRINT_KEY_FILE_NAME);
        let objects_path = state_dir.join(OBJECTS_DIR_NAME);
        let config_path = state_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !fingerprint_key_path.exists() {
            return Err(StateError::MissingFile(FINGERPRINT_KEY_FILE_NAME.to_string()));
        }
        if !objects_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", OBJECTS_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            state_dir,
            db_path,
            fingerprint_key_path,
            objects_path,
            config_path,
            config,
        })
    }

    /// Load the installation secret used to blind fingerprints
    pub fn load_fingerprint_key(&self) -> Result<Vec<u8>, StateError> {
        let encoded = fs::read_to_string(&self.fingerprint_key_path)?;
        let secret =
            hex::decode(encoded.trim()).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        if secret.len() != 32 {
            return Err(StateError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                secret.len()
            )));
        }
        Ok(secret)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("tessera directory not initialized. Run 'tessera init' first")]
    NotInitialized,

    #[error("tessera directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid fingerprint key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("state");

        let created = AppState::init(Some(dir.clone()), None).unwrap();
        let loaded = AppState::load(Some(dir.clone())).unwrap();

        assert_eq!(loaded.config, created.config);
        assert_eq!(loaded.load_fingerprint_key().unwrap().len(), 32);
        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_missing_dir() {
        let temp = tempfile::tempdir().unwrap();
        let result = AppState::load(Some(temp.path().join("nope")));
        assert!(matches!(result, Err(StateError::NotInitialized)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            primary = "node"

            [swarm]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.primary, PrimaryBackend::Node);
        assert!(config.swarm.enabled);
        assert_eq!(config.mirrors.len(), DEFAULT_MIRRORS.len());
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.cache_store, CacheStoreConfig::Filesystem);
    }
}
