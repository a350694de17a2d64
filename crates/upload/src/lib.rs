/**
 * Single-assignment result handles for
 *  dispatched upload jobs.
 */
pub mod completion;
/**
 * Session tuning and gateway credentials.
 */
pub mod config;
/**
 * The seam between session bookkeeping
 *  and pack delivery.
 */
pub mod dispatcher;
pub mod error;
/**
 * Storage gateway client.
 *  - Signed payload protocol
 *  - HTTP transport
 *  - Lease acquisition and release
 *  - Background upload worker
 */
pub mod gateway;
pub mod key;
/**
 * Bounded FIFO between the session
 *  and the upload worker.
 */
pub mod queue;
/**
 * Publish sessions: bucket bookkeeping,
 *  pack rotation and finalization.
 */
pub mod session;

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::gateway::{GatewayDispatcher, GatewayLease};
use crate::session::SessionContext;

/// Session uploading to a gateway under `lease`, ready to initialize
pub fn gateway_session(
    config: SessionConfig,
    lease: GatewayLease,
) -> Result<SessionContext, SessionError> {
    let dispatcher = GatewayDispatcher::with_lease(lease, config.queue_capacity);
    SessionContext::new(config, Arc::new(dispatcher))
}

pub mod prelude {
    pub use crate::completion::{completion, Completion, CompletionSetter};
    pub use crate::config::{LeaseCredentials, SessionConfig, DEFAULT_QUEUE_CAPACITY};
    pub use crate::dispatcher::PackDispatcher;
    pub use crate::error::{LeaseError, SessionError, UploadFailure, UploadResult};
    pub use crate::gateway::{
        GatewayDispatcher, GatewayLease, GatewayRequest, HttpTransport, Lease, NoLease,
        Transport, TransportError,
    };
    pub use crate::gateway_session;
    pub use crate::key::{GatewayKey, KeyError};
    pub use crate::session::{SessionContext, SessionReport};
}
