//! Publishing leases
//!
//! A lease is the gateway's time-bounded grant to publish below a repository
//! path. It is acquired before a session starts and dropped when it ends.

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde::Deserialize;
use url::Url;

use common::prelude::Digester;

use super::protocol::{authorization, API_VERSION, AUTHORIZATION};
use super::transport::{GatewayRequest, Transport};
use crate::config::{endpoint, LeaseCredentials};
use crate::error::LeaseError;
use crate::key::GatewayKey;

/// Lease collaborator
#[async_trait]
pub trait Lease: Send + Sync + std::fmt::Debug {
    async fn drop_lease(&self) -> Result<(), LeaseError>;
}

/// For sessions that do not hold a lease of their own
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLease;

#[async_trait]
impl Lease for NoLease {
    async fn drop_lease(&self) -> Result<(), LeaseError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LeaseReply {
    status: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl LeaseReply {
    fn into_result(self) -> Result<Option<String>, LeaseError> {
        if self.status == "ok" {
            return Ok(self.session_token);
        }
        Err(LeaseError::Rejected {
            status: self.status,
            reason: self.reason.unwrap_or_default(),
        })
    }
}

/// A lease held on a gateway
#[derive(Debug, Clone)]
pub struct GatewayLease {
    credentials: LeaseCredentials,
    transport: Arc<dyn Transport>,
    digester: Arc<dyn Digester>,
}

impl GatewayLease {
    /// Wrap a lease acquired elsewhere
    pub fn new(
        credentials: LeaseCredentials,
        transport: Arc<dyn Transport>,
        digester: Arc<dyn Digester>,
    ) -> Self {
        Self {
            credentials,
            transport,
            digester,
        }
    }

    /// Ask the gateway for a lease on `path` (`<repository>/<subpath>`)
    pub async fn acquire(
        api_url: &Url,
        key: &GatewayKey,
        path: &str,
        transport: Arc<dyn Transport>,
        digester: Arc<dyn Digester>,
    ) -> Result<Self, LeaseError> {
        let body = serde_json::to_vec(&serde_json::json!({
            "path": path,
            "api_version": API_VERSION.to_string(),
        }))?;
        let signature = authorization(&key.key_id, &key.secret, &body, digester.as_ref());
        let request = GatewayRequest::new(Method::POST, endpoint(api_url, "leases")?)
            .with_header(AUTHORIZATION, signature)
            .with_header("Content-Type", "application/json")
            .with_body(body);

        let reply: LeaseReply = serde_json::from_str(&transport.send(request).await?)?;
        let session_token = reply.into_result()?.ok_or_else(|| LeaseError::Rejected {
            status: "ok".to_string(),
            reason: "reply carried no session token".to_string(),
        })?;
        tracing::info!("acquired lease on {}", path);

        Ok(Self::new(
            LeaseCredentials::new(api_url.clone(), session_token, key),
            transport,
            digester,
        ))
    }

    pub fn credentials(&self) -> &LeaseCredentials {
        &self.credentials
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn digester(&self) -> Arc<dyn Digester> {
        self.digester.clone()
    }
}

#[async_trait]
impl Lease for GatewayLease {
    async fn drop_lease(&self) -> Result<(), LeaseError> {
        let token = &self.credentials.session_token;
        let signature = authorization(
            &self.credentials.key_id,
            &self.credentials.secret,
            token.as_bytes(),
            self.digester.as_ref(),
        );
        let request = GatewayRequest::new(Method::DELETE, self.credentials.lease_endpoint()?)
            .with_header(AUTHORIZATION, signature);

        let reply: LeaseReply = serde_json::from_str(&self.transport.send(request).await?)?;
        reply.into_result()?;
        tracing::info!("dropped lease {}", token);
        Ok(())
    }
}
