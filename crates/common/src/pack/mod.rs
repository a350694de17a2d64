//! Object packs
//!
//! An [`ObjectPack`] aggregates many small content-addressed objects into a
//! single upload. Producers open a *bucket*, append bytes to it, and commit it
//! with its final hash; committed buckets count towards the pack's size
//! ceiling. Buckets still open when a pack fills up can be moved, with their
//! partial contents, into the next pack without changing their handle.
//!
//! # Pack lifecycle
//!
//! 1. `new_bucket()` hands out a [`BucketHandle`] for an empty, open bucket
//! 2. `write()` appends to the open bucket
//! 3. `commit_bucket()` seals it, unless the pack would overflow
//! 4. `reader()` / `to_bytes()` serialize the committed buckets for upload

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

use crate::hash::{ContentHash, Digester, HashError};

mod parse;
mod reader;

pub use parse::{ReceivedObject, ReceivedPack};
pub use reader::PackReader;

/// Default size ceiling of a pack: 200 MiB of committed object data
pub const DEFAULT_PACK_LIMIT: u64 = 200 * 1024 * 1024;

/// Handles are unique process-wide so that a bucket keeps its identity when
///  it is transferred between packs
static NEXT_BUCKET_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("no open bucket for {0}")]
    UnknownBucket(BucketHandle),
    #[error("named bucket {0} committed without a name")]
    MissingName(BucketHandle),
    #[error("malformed pack: {0}")]
    Malformed(String),
    #[error("invalid object hash: {0}")]
    InvalidHash(#[from] HashError),
}

/// Opaque identifier of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketHandle(u64);

impl BucketHandle {
    fn next() -> Self {
        Self(NEXT_BUCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BucketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket#{}", self.0)
    }
}

/// How the receiving side stores a committed bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Stored under its content hash
    Cas,
    /// Stored under an explicit name (e.g. a repository manifest)
    Named,
}

impl BucketKind {
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            BucketKind::Cas => "C",
            BucketKind::Named => "N",
        }
    }
}

/// A sealed bucket inside a pack
#[derive(Debug, Clone)]
pub struct CommittedBucket {
    handle: BucketHandle,
    kind: BucketKind,
    hash: ContentHash,
    name: String,
    data: Bytes,
}

impl CommittedBucket {
    pub fn handle(&self) -> BucketHandle {
        self.handle
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A size-bounded batch of buckets
#[derive(Debug)]
pub struct ObjectPack {
    limit: u64,
    /// total bytes of committed buckets
    size: u64,
    open: HashMap<BucketHandle, BytesMut>,
    committed: Vec<CommittedBucket>,
}

impl Default for ObjectPack {
    fn default() -> Self {
        Self::new(DEFAULT_PACK_LIMIT)
    }
}

impl ObjectPack {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            size: 0,
            open: HashMap::new(),
            committed: Vec::new(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Total size of the committed buckets
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn num_objects(&self) -> usize {
        self.committed.len()
    }

    pub fn objects(&self) -> &[CommittedBucket] {
        &self.committed
    }

    /// Handles of buckets that are open in this pack
    pub fn open_handles(&self) -> impl Iterator<Item = BucketHandle> + '_ {
        self.open.keys().copied()
    }

    pub fn is_open(&self, handle: BucketHandle) -> bool {
        self.open.contains_key(&handle)
    }

    /// Bytes written so far to an open bucket
    pub fn bucket_len(&self, handle: BucketHandle) -> Option<usize> {
        self.open.get(&handle).map(|data| data.len())
    }

    /// Contents written so far to an open bucket
    pub fn bucket_data(&self, handle: BucketHandle) -> Option<&[u8]> {
        self.open.get(&handle).map(|data| data.as_ref())
    }

    /// Open a new, empty bucket
    pub fn new_bucket(&mut self) -> BucketHandle {
        let handle = BucketHandle::next();
        self.open.insert(handle, BytesMut::new());
        tracing::trace!("opened {}", handle);
        handle
    }

    /// Append bytes to an open bucket
    pub fn write(&mut self, handle: BucketHandle, data: &[u8]) -> Result<(), PackError> {
        let bucket = self
            .open
            .get_mut(&handle)
            .ok_or(PackError::UnknownBucket(handle))?;
        bucket.extend_from_slice(data);
        Ok(())
    }

    /// Seal an open bucket with its type, hash and name
    ///
    /// Returns `Ok(false)` if the bucket does not fit under the ceiling; the
    ///  bucket then stays open and the caller is expected to move it into a
    ///  fresh pack. A pack without committed buckets accepts any bucket, so an
    ///  object larger than the ceiling ends up alone in its own pack.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not open in this pack, or if a named
    ///  bucket is committed with an empty name.
    pub fn commit_bucket(
        &mut self,
        kind: BucketKind,
        hash: ContentHash,
        handle: BucketHandle,
        name: &str,
    ) -> Result<bool, PackError> {
        let len = self
            .bucket_len(handle)
            .ok_or(PackError::UnknownBucket(handle))? as u64;
        if kind == BucketKind::Named && name.is_empty() {
            return Err(PackError::MissingName(handle));
        }
        if !self.committed.is_empty() && self.size + len > self.limit {
            tracing::debug!(
                "{} ({} bytes) does not fit, pack at {}/{} bytes",
                handle,
                len,
                self.size,
                self.limit
            );
            return Ok(false);
        }

        let data = self
            .open
            .remove(&handle)
            .ok_or(PackError::UnknownBucket(handle))?;
        self.size += len;
        self.committed.push(CommittedBucket {
            handle,
            kind,
            hash,
            name: name.to_string(),
            data: data.freeze(),
        });
        Ok(true)
    }

    /// Move an open bucket, with everything written to it so far, into
    ///  another pack. The handle stays valid against `destination`.
    pub fn transfer_bucket(
        &mut self,
        handle: BucketHandle,
        destination: &mut ObjectPack,
    ) -> Result<(), PackError> {
        let data = self
            .open
            .remove(&handle)
            .ok_or(PackError::UnknownBucket(handle))?;
        tracing::trace!("transferring {} ({} bytes)", handle, data.len());
        destination.open.insert(handle, data);
        Ok(())
    }

    /// Lazy serializer over the committed buckets
    pub fn reader(&self) -> PackReader<'_> {
        PackReader::new(self)
    }

    /// Serialize the whole pack into one buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        self.reader().into_vec()
    }

    /// Digest of the serialized pack, computed while streaming
    pub fn digest(&self, digester: &dyn Digester) -> Result<ContentHash, HashError> {
        digester.compute_reader(&mut self.reader())
    }
}
