use std::path::PathBuf;

use clap::Args;

use super::KeysError;

/// Write a versioned JSON backup of every key
#[derive(Args, Debug, Clone)]
pub struct Export {
    /// Backup file; printed to stdout when omitted
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Export {
    type Error = KeysError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let backup = service.keyring.export_keyring().await?;

        match &self.out {
            Some(out) => {
                tokio::fs::write(out, &backup)
                    .await
                    .map_err(|e| KeysError::Io(out.clone(), e))?;
                let stats = service.keyring.get_stats().await?;
                Ok(format!("exported {} keys to {}", stats.total, out.display()))
            }
            None => Ok(backup),
        }
    }
}
