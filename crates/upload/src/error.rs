use common::prelude::{BucketHandle, PackError};

/// Why a single upload job did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upload job {job} failed: {reason}")]
pub struct UploadFailure {
    /// Sequence number the job was dispatched with, starting at 1
    pub job: u64,
    pub reason: String,
}

/// What a job's completion handle eventually carries
pub type UploadResult = Result<(), UploadFailure>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("pack error: {0}")]
    Pack(#[from] PackError),
    #[error("no open pack to commit {0} into")]
    NoOpenPack(BucketHandle),
    #[error("commit of {0} failed after rotating to an empty pack")]
    RotationFailed(BucketHandle),
    #[error("session has not been initialized")]
    NotInitialized,
    #[error("session already initialized")]
    AlreadyInitialized,
    #[error("session already finalized")]
    Finalized,
    #[error("upload queue closed")]
    QueueClosed,
    #[error("upload worker failed: {0}")]
    Worker(String),
    #[error("{} upload job(s) failed", .0.len())]
    UploadsFailed(Vec<UploadFailure>),
    #[error("accounting mismatch: {committed} bytes committed, {dispatched} bytes dispatched")]
    AccountingMismatch { committed: u64, dispatched: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("lease request failed: {0}")]
    Transport(#[from] crate::gateway::TransportError),
    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),
    #[error("malformed gateway reply: {0}")]
    Reply(#[from] serde_json::Error),
    #[error("gateway rejected lease request ({status}): {reason}")]
    Rejected { status: String, reason: String },
}
