use std::path::PathBuf;

use clap::Args;

use super::KeysError;

/// Restore keys from a backup; nothing is written unless every entry is valid
#[derive(Args, Debug, Clone)]
pub struct Import {
    pub path: PathBuf,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Import {
    type Error = KeysError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let backup = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| KeysError::Io(self.path.clone(), e))?;

        let service = ctx.service().await?;
        let imported = service.keyring.import_keyring(&backup).await?;

        Ok(format!("imported {} keys", imported))
    }
}
