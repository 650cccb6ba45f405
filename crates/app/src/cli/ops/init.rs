use clap::Args;
use url::Url;

use tessera::state::{AppConfig, AppState, PrimaryBackend};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Backend receiving uploads: local, node, pinning or swarm
    #[arg(long, default_value = "local", value_parser = parse_primary)]
    pub primary: PrimaryBackend,

    /// Also seed uploads to the peer swarm
    #[arg(long)]
    pub swarm: bool,

    /// Origin server consulted when every backend misses
    #[arg(long)]
    pub origin: Option<Url>,
}

fn parse_primary(value: &str) -> Result<PrimaryBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "local" => Ok(PrimaryBackend::Local),
        "node" => Ok(PrimaryBackend::Node),
        "pinning" => Ok(PrimaryBackend::Pinning),
        "swarm" => Ok(PrimaryBackend::Swarm),
        other => Err(format!("unknown backend: {}", other)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] tessera::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            primary: self.primary,
            origin: self.origin.clone(),
            ..Default::default()
        };
        config.swarm.enabled = self.swarm;

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let origin = match &state.config.origin {
            Some(origin) => origin.to_string(),
            None => "none".to_string(),
        };

        let output = format!(
            "Initialized tessera directory at: {}\n\
             - Database: {}\n\
             - Fingerprint key: {}\n\
             - Objects: {}\n\
             - Config: {}\n\
             - Primary backend: {:?}\n\
             - Swarm seeding: {}\n\
             - Origin: {}",
            state.state_dir.display(),
            state.db_path.display(),
            state.fingerprint_key_path.display(),
            state.objects_path.display(),
            state.config_path.display(),
            state.config.primary,
            state.config.swarm.enabled,
            origin
        );

        Ok(output)
    }
}
