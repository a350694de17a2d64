use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, ValueEnum};
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use common::prelude::{
    Blake3Digester, BucketKind, ContentHash, Digester, HashError, ObjectSuffix, Sha256Digester,
};
use upload::prelude::{
    gateway_session, GatewayLease, HttpTransport, LeaseCredentials, LeaseError, SessionContext,
    SessionError, TransportError,
};

use crate::state::{AppState, StateError};

/// Name of the listing object committed at the end of every publish
pub const LISTING_NAME: &str = ".cask-listing";

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashChoice {
    #[default]
    Sha256,
    Blake3,
}

impl HashChoice {
    fn digester(self) -> Arc<dyn Digester> {
        match self {
            HashChoice::Sha256 => Arc::new(Sha256Digester),
            HashChoice::Blake3 => Arc::new(Blake3Digester),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct Publish {
    /// Directory to publish
    pub source: PathBuf,

    /// Repository path to lease, e.g. repo.example.org/software
    #[arg(long, group = "lease_source")]
    pub lease_path: Option<String>,

    /// Publish under a lease acquired earlier with `cask lease acquire`
    #[arg(long, group = "lease_source")]
    pub session_token: Option<String>,

    /// Keep the lease once the upload has finished
    #[arg(long)]
    pub keep_lease: bool,

    /// Number of files read concurrently
    #[arg(long, default_value_t = 4)]
    pub producers: usize,

    /// Bytes written into a bucket at a time
    #[arg(long, default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// Hash algorithm for object names and request signatures
    #[arg(long, value_enum, default_value_t = HashChoice::Sha256)]
    pub hash: HashChoice,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("either --lease-path or --session-token must be provided")]
    NoLease,
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait::async_trait]
impl crate::op::Op for Publish {
    type Error = PublishError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        if !self.source.is_dir() {
            return Err(PublishError::NotADirectory(self.source.clone()));
        }

        let state = AppState::load(ctx.config_path.clone())?;
        let key = state.load_key()?;
        let transport = Arc::new(HttpTransport::new(state.config.request_timeout())?);
        let digester = self.hash.digester();

        let lease = match (&self.lease_path, &self.session_token) {
            (_, Some(token)) => GatewayLease::new(
                LeaseCredentials::new(state.config.gateway_url.clone(), token.clone(), &key),
                transport,
                digester.clone(),
            ),
            (Some(path), None) => {
                GatewayLease::acquire(
                    &state.config.gateway_url,
                    &key,
                    path,
                    transport,
                    digester.clone(),
                )
                .await?
            }
            (None, None) => return Err(PublishError::NoLease),
        };
        let token = lease.credentials().session_token.clone();

        let session = Arc::new(gateway_session(
            state.config.session_config(!self.keep_lease),
            lease,
        )?);
        session.initialize().await?;

        let root = self.source.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&root)).await??;
        tracing::info!(
            "publishing {} file(s) from {}",
            files.len(),
            self.source.display()
        );

        let chunk_size = self.chunk_size.max(1);
        let mut entries: Vec<(String, ContentHash)> = futures::stream::iter(files)
            .map(|path| publish_file(&session, &digester, &self.source, path, chunk_size))
            .buffer_unordered(self.producers.max(1))
            .try_collect()
            .await
            .inspect_err(|e| {
                tracing::error!("publish aborted, lease {} is still held: {}", token, e)
            })?;
        entries.sort();

        let listing = render_listing(&entries);
        let listing_hash = digester
            .compute(listing.as_bytes())
            .with_suffix(ObjectSuffix::Catalog);
        let handle = session.new_bucket().await?;
        session.write(handle, listing.as_bytes()).await?;
        session
            .commit_bucket(BucketKind::Named, listing_hash, handle, LISTING_NAME, true)
            .await?;

        let report = session.finalize().await?;
        Ok(format!(
            "published {} file(s) in {} pack(s), {} bytes\nlisting: {}",
            entries.len(),
            report.jobs,
            report.bytes_committed,
            listing_hash
        ))
    }
}

/// Hash a file, then stream it into a fresh bucket and commit it
async fn publish_file(
    session: &SessionContext,
    digester: &Arc<dyn Digester>,
    root: &Path,
    path: PathBuf,
    chunk_size: usize,
) -> Result<(String, ContentHash), PublishError> {
    let hash = {
        let digester = digester.clone();
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<ContentHash, PublishError> {
            let mut file = std::fs::File::open(&path)?;
            Ok(digester.compute_reader(&mut file)?)
        })
        .await??
    };

    let mut file = tokio::fs::File::open(&path).await?;
    let handle = session.new_bucket().await?;
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        session.write(handle, &buffer[..n]).await?;
    }
    session
        .commit_bucket(BucketKind::Cas, hash, handle, "", false)
        .await?;

    let relative = path.strip_prefix(root).unwrap_or(&path);
    tracing::debug!("committed {} as {}", relative.display(), hash);
    Ok((relative.to_string_lossy().into_owned(), hash))
}

/// Every regular file below `root`, sorted; symlinks are not followed
fn collect_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// One `<hash> <path>` line per published file
fn render_listing(entries: &[(String, ContentHash)]) -> String {
    entries
        .iter()
        .map(|(path, hash)| format!("{} {}\n", hash, path))
        .collect()
}
