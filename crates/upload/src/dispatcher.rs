//! The seam between the session's pack bookkeeping and whatever ships packs
//!
//! The session decides *when* a pack is complete; a [`PackDispatcher`]
//! decides *how* it travels. The gateway worker is the production
//! implementation, tests plug in their own.

use async_trait::async_trait;

use common::prelude::ObjectPack;

use crate::completion::Completion;
use crate::error::{LeaseError, SessionError, UploadResult};

#[async_trait]
pub trait PackDispatcher: Send + Sync + std::fmt::Debug {
    /// Start consuming dispatched packs
    async fn initialize(&self) -> Result<(), SessionError>;

    /// Hand a pack off for upload
    ///
    /// May wait for room in a bounded queue, but never for the upload itself.
    /// `job` is the session-wide sequence number of this pack, starting at 1.
    async fn dispatch(
        &self,
        job: u64,
        pack: ObjectPack,
    ) -> Result<Completion<UploadResult>, SessionError>;

    /// Wait until everything dispatched so far has been processed
    async fn wait_for_drain(&self);

    /// Give the publishing lease back
    async fn drop_lease(&self) -> Result<(), LeaseError>;

    /// Stop accepting packs and wait for outstanding work to finish
    async fn finalize(&self) -> Result<(), SessionError>;
}
