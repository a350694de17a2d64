use std::path::PathBuf;

use clap::Args;
use url::Url;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Gateway API base URL (e.g. https://gateway.example.org/api/v1)
    #[arg(long)]
    pub gateway_url: Url,

    /// Gateway key file (default: gateway.key inside the cask directory)
    #[arg(long)]
    pub key_path: Option<PathBuf>,

    /// Pack size ceiling in bytes
    #[arg(long)]
    pub max_pack_size: Option<u64>,

    /// Packs that may wait for upload before producers block
    #[arg(long)]
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::new(self.gateway_url.clone());
        if let Some(key_path) = &self.key_path {
            config.key_path = key_path.clone();
        }
        if let Some(max_pack_size) = self.max_pack_size {
            config.max_pack_size = max_pack_size;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config.queue_capacity = queue_capacity;
        }

        let state = AppState::init(ctx.config_path.clone(), config)?;

        let output = format!(
            "Initialized cask directory at: {}\n\
             - Config: {}\n\
             - Gateway: {}\n\
             - Key file: {}\n\
             - Pack size limit: {} bytes\n\
             - Upload queue capacity: {}",
            state.cask_dir.display(),
            state.config_path.display(),
            state.config.gateway_url,
            state.key_path().display(),
            state.config.max_pack_size,
            state.config.queue_capacity,
        );

        Ok(output)
    }
}
