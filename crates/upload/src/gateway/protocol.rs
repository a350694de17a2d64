//! Signed payload submission
//!
//! A pack upload is a single POST to `<api_url>/payloads`. Its body is a JSON
//! envelope immediately followed, with no separator, by the base64-encoded
//! pack. The `Message-Size` header carries the envelope length so the
//! gateway can split the two, and `Authorization` carries the key id and an
//! HMAC over the envelope bytes.
//!
//! The envelope is rendered by hand rather than through serde: its exact
//! bytes are signed, so the layout is part of the protocol.

use std::io;

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use base64::Engine;
use http::Method;

use common::prelude::{ContentHash, Digester, HashError, ObjectPack};

use super::transport::GatewayRequest;
use crate::config::LeaseCredentials;

/// Gateway API version announced in every envelope
pub const API_VERSION: u32 = 2;

/// The only reply body accepted as success, byte for byte
pub const OK_REPLY: &str = r#"{"status":"ok"}"#;

pub const AUTHORIZATION: &str = "Authorization";
pub const MESSAGE_SIZE: &str = "Message-Size";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("could not digest pack: {0}")]
    Digest(#[from] HashError),
    #[error("could not encode pack: {0}")]
    Encode(#[from] io::Error),
    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),
}

/// The signed part of a payload submission
pub fn envelope(session_token: &str, payload_digest: &ContentHash) -> String {
    format!(
        "{{\"session_token\" : \"{}\", \"payload_digest\" : \"{}\", \"api_version\" : \"{}\"}}",
        session_token,
        STANDARD.encode(payload_digest.to_hex()),
        API_VERSION
    )
}

/// `<key id> <base64(hex(hmac(secret, message)))>`
pub fn authorization(
    key_id: &str,
    secret: &str,
    message: &[u8],
    digester: &dyn Digester,
) -> String {
    let hmac = digester.hmac(secret.as_bytes(), message);
    format!("{} {}", key_id, STANDARD.encode(hmac.to_hex()))
}

/// Strict success check; whitespace or alternative encodings are failures
pub fn is_ok_reply(reply: &str) -> bool {
    reply == OK_REPLY
}

/// Build the signed POST that uploads `pack`
///
/// The pack is streamed twice, once into the digester and once into the
///  base64 encoder writing the body, and never buffered raw.
pub fn payload_request(
    credentials: &LeaseCredentials,
    pack: &ObjectPack,
    digester: &dyn Digester,
) -> Result<GatewayRequest, ProtocolError> {
    let digest = pack.digest(digester)?;
    let message = envelope(&credentials.session_token, &digest);
    let signature = authorization(
        &credentials.key_id,
        &credentials.secret,
        message.as_bytes(),
        digester,
    );

    let mut reader = pack.reader();
    let mut body = Vec::with_capacity(message.len() + reader.len().div_ceil(3) * 4);
    body.extend_from_slice(message.as_bytes());
    {
        let mut encoder = EncoderWriter::new(&mut body, &STANDARD);
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;
    }

    Ok(
        GatewayRequest::new(Method::POST, credentials.endpoint("payloads")?)
            .with_header(AUTHORIZATION, signature)
            .with_header(MESSAGE_SIZE, message.len().to_string())
            .with_body(body),
    )
}
