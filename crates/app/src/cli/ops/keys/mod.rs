use clap::{Args, Subcommand};

pub mod export;
pub mod import;
pub mod ls;
pub mod stats;

use common::keyring::KeyringError;
use tessera::service::ServiceError;

use crate::cli::op::Op;

crate::command_enum! {
    (Export, export::Export),
    (Import, import::Import),
    (Stats, stats::Stats),
    (Ls, ls::Ls),
}

pub type KeysCommand = Command;

/// Back up, restore and inspect the keyring
#[derive(Args, Debug, Clone)]
pub struct Keys {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[async_trait::async_trait]
impl Op for Keys {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Shared by every keyring command.
#[derive(Debug, thiserror::Error)]
pub enum KeysError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
    #[error("could not access {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
}
