//! Storage gateway client
//!
//! Everything that talks to the remote gateway: the signed payload protocol,
//! the HTTP transport, lease management, and the background worker that
//! uploads dispatched packs.

mod dispatcher;
mod lease;
mod protocol;
mod transport;

pub use dispatcher::GatewayDispatcher;
pub use lease::{GatewayLease, Lease, NoLease};
pub use protocol::{
    authorization, envelope, is_ok_reply, payload_request, ProtocolError, API_VERSION, OK_REPLY,
};
pub use transport::{GatewayRequest, HttpTransport, Transport, TransportError};
