//! Gateway key files
//!
//! A key file holds a single line: `plain_text <key id> <secret>`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

const PLAIN_TEXT: &str = "plain_text";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("IO error reading key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported key type: {0}")]
    UnsupportedType(String),
    #[error("malformed key file: expected `{} <key id> <secret>`", PLAIN_TEXT)]
    Malformed,
}

/// Shared secret identifying a publisher to the gateway
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayKey {
    pub key_id: String,
    pub secret: String,
}

impl GatewayKey {
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, KeyError> {
        std::fs::read_to_string(path)?.parse()
    }
}

impl FromStr for GatewayKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let (Some(kind), Some(key_id), Some(secret), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(KeyError::Malformed);
        };
        if kind != PLAIN_TEXT {
            return Err(KeyError::UnsupportedType(kind.to_string()));
        }
        Ok(Self::new(key_id, secret))
    }
}

impl fmt::Debug for GatewayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayKey")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
