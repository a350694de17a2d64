use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Version;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("Version operation failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        Ok(format!(
            "cask {} ({}, {} build for {})\n{}\ngateway api v{}",
            env!("CARGO_PKG_VERSION"),
            env!("REPO_VERSION"),
            env!("BUILD_PROFILE"),
            env!("BUILD_TARGET"),
            env!("RUST_VERSION"),
            upload::gateway::API_VERSION,
        ))
    }
}
