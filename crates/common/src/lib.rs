/**
 * Content hashing.
 *  - Fixed-size digests identifying objects
 *  - Pluggable digesters (SHA-256, BLAKE3) with
 *    keyed variants for request signing
 */
pub mod hash;
/**
 * Object packs: size-bounded batches of
 *  content-addressed objects, the unit of
 *  upload to a storage gateway.
 * Handles bucket bookkeeping, transfer of open
 *  buckets across packs, and the pack wire format.
 */
pub mod pack;

pub mod prelude {
    pub use crate::hash::{
        Blake3Digester, ContentHash, Digester, HashAlgorithm, HashError, ObjectSuffix,
        Sha256Digester,
    };
    pub use crate::pack::{
        BucketHandle, BucketKind, ObjectPack, PackError, PackReader, ReceivedObject,
        ReceivedPack, DEFAULT_PACK_LIMIT,
    };
}
