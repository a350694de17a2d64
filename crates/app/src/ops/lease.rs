use std::sync::Arc;

use clap::{Args, Subcommand};

use common::prelude::Sha256Digester;
use upload::prelude::{
    GatewayLease, HttpTransport, Lease as _, LeaseCredentials, LeaseError, TransportError,
};

use crate::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Lease {
    #[command(subcommand)]
    pub command: LeaseCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum LeaseCommand {
    /// Acquire a lease and print its session token
    Acquire {
        /// Repository path to lease, e.g. repo.example.org/software
        path: String,
    },
    /// Give back a lease acquired earlier
    Drop {
        /// Session token printed by `cask lease acquire`
        token: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseOpError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),
}

#[async_trait::async_trait]
impl crate::op::Op for Lease {
    type Error = LeaseOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let key = state.load_key()?;
        let transport = Arc::new(HttpTransport::new(state.config.request_timeout())?);
        let digester = Arc::new(Sha256Digester);

        match &self.command {
            LeaseCommand::Acquire { path } => {
                let lease = GatewayLease::acquire(
                    &state.config.gateway_url,
                    &key,
                    path,
                    transport,
                    digester,
                )
                .await?;
                Ok(lease.credentials().session_token.clone())
            }
            LeaseCommand::Drop { token } => {
                let credentials =
                    LeaseCredentials::new(state.config.gateway_url.clone(), token.clone(), &key);
                GatewayLease::new(credentials, transport, digester)
                    .drop_lease()
                    .await?;
                Ok(format!("dropped lease {}", token))
            }
        }
    }
}
