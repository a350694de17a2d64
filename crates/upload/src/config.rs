use std::fmt;

use common::prelude::DEFAULT_PACK_LIMIT;
use url::Url;

use crate::error::SessionError;
use crate::key::GatewayKey;

/// Default number of packs that may wait for the upload worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// size ceiling of a single pack in bytes
    pub max_pack_size: u64,
    /// drop the lease when the session is finalized
    pub drop_lease: bool,
    /// packs that may be queued for upload before
    ///  dispatching blocks the producer
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pack_size: DEFAULT_PACK_LIMIT,
            drop_lease: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_pack_size == 0 {
            return Err(SessionError::InvalidConfig(
                "max_pack_size must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to talk to the gateway on behalf of a lease
#[derive(Clone)]
pub struct LeaseCredentials {
    /// gateway API base, e.g. `https://gw.example.org/api/v1`
    pub api_url: Url,
    pub session_token: String,
    pub key_id: String,
    pub secret: String,
}

impl LeaseCredentials {
    pub fn new(api_url: Url, session_token: impl Into<String>, key: &GatewayKey) -> Self {
        Self {
            api_url,
            session_token: session_token.into(),
            key_id: key.key_id.clone(),
            secret: key.secret.clone(),
        }
    }

    /// `<api_url>/<path>`, regardless of a trailing slash on the base
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        endpoint(&self.api_url, path)
    }

    /// `<api_url>/leases/<session_token>`, with the token as a single
    ///  percent-encoded segment
    pub fn lease_endpoint(&self) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint("leases")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(&self.session_token);
        Ok(url)
    }
}

impl fmt::Debug for LeaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseCredentials")
            .field("api_url", &self.api_url.as_str())
            .field("session_token", &self.session_token)
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub(crate) fn endpoint(api_url: &Url, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        api_url.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}
