//! Decoding of serialized packs, as done by the receiving gateway

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use super::reader::{HEADER_END, PACK_VERSION};
use super::{BucketKind, PackError};
use crate::hash::ContentHash;

/// One object recovered from a serialized pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedObject {
    pub kind: BucketKind,
    pub hash: ContentHash,
    /// Only set for named objects
    pub name: Option<String>,
    pub data: Bytes,
}

/// A serialized pack split back into its objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPack {
    pub size: u64,
    pub objects: Vec<ReceivedObject>,
}

struct IndexEntry {
    kind: BucketKind,
    hash: ContentHash,
    size: u64,
    name: Option<String>,
}

impl ReceivedPack {
    /// Parse and validate a serialized pack
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Malformed`] if the header is inconsistent or the
    ///  payload length does not match the sizes the header announces.
    pub fn parse(data: &[u8]) -> Result<Self, PackError> {
        let mut pos = 0;

        let version = next_line(data, &mut pos)?;
        if version != PACK_VERSION {
            return Err(malformed(format!("unsupported version {:?}", version)));
        }
        let size: u64 = prefixed_number(next_line(data, &mut pos)?, 'S')?;
        let count: usize = prefixed_number(next_line(data, &mut pos)?, 'N')?;

        // every entry takes at least one header byte
        let mut entries = Vec::with_capacity(count.min(data.len()));
        for _ in 0..count {
            entries.push(parse_entry(next_line(data, &mut pos)?)?);
        }
        if next_line(data, &mut pos)? != HEADER_END {
            return Err(malformed("missing header terminator"));
        }

        let payload = &data[pos..];
        let announced = entries
            .iter()
            .try_fold(0u64, |total, entry| total.checked_add(entry.size))
            .ok_or_else(|| malformed("object sizes overflow"))?;
        if announced != size || payload.len() as u64 != size {
            return Err(malformed(format!(
                "size mismatch: header {}, objects {}, payload {}",
                size,
                announced,
                payload.len()
            )));
        }

        let mut offset = 0usize;
        let objects = entries
            .into_iter()
            .map(|entry| {
                let end = offset + entry.size as usize;
                let object = ReceivedObject {
                    kind: entry.kind,
                    hash: entry.hash,
                    name: entry.name,
                    data: Bytes::copy_from_slice(&payload[offset..end]),
                };
                offset = end;
                object
            })
            .collect();

        Ok(Self { size, objects })
    }
}

fn malformed(reason: impl Into<String>) -> PackError {
    PackError::Malformed(reason.into())
}

fn next_line<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a str, PackError> {
    let rest = &data[*pos..];
    let end = rest
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| malformed("truncated header"))?;
    *pos += end + 1;
    std::str::from_utf8(&rest[..end]).map_err(|_| malformed("header is not utf-8"))
}

fn prefixed_number<T: std::str::FromStr>(line: &str, prefix: char) -> Result<T, PackError> {
    line.strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| malformed(format!("expected {}<number>, got {:?}", prefix, line)))
}

fn parse_entry(line: &str) -> Result<IndexEntry, PackError> {
    let fields: Vec<&str> = line.split(' ').collect();
    let (kind, name) = match (fields.first().copied(), fields.len()) {
        (Some("C"), 3) => (BucketKind::Cas, None),
        (Some("N"), 4) => {
            let name = STANDARD
                .decode(fields[3])
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
                .ok_or_else(|| malformed(format!("bad object name {:?}", fields[3])))?;
            (BucketKind::Named, Some(name))
        }
        _ => return Err(malformed(format!("bad object line {:?}", line))),
    };
    let hash: ContentHash = fields[1].parse()?;
    let size = fields[2]
        .parse()
        .map_err(|_| malformed(format!("bad object size {:?}", fields[2])))?;
    Ok(IndexEntry {
        kind,
        hash,
        size,
        name,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::{Digester, ObjectSuffix, Sha256Digester};
    use crate::pack::ObjectPack;

    #[test]
    fn test_parse_serialized_pack() {
        let mut pack = ObjectPack::new(1024);
        let blobs: [(BucketKind, &[u8], &str); 3] = [
            (BucketKind::Cas, b"object one", ""),
            (BucketKind::Named, b"signed manifest", "repo/.published"),
            (BucketKind::Cas, b"catalog", ""),
        ];
        for (i, (kind, data, name)) in blobs.iter().enumerate() {
            let handle = pack.new_bucket();
            pack.write(handle, data).unwrap();
            let mut hash = Sha256Digester.compute(data);
            if i == 2 {
                hash = hash.with_suffix(ObjectSuffix::Catalog);
            }
            assert!(pack.commit_bucket(*kind, hash, handle, name).unwrap());
        }

        let received = ReceivedPack::parse(&pack.to_bytes()).unwrap();
        assert_eq!(received.size, pack.size());
        assert_eq!(received.objects.len(), 3);
        for (object, bucket) in received.objects.iter().zip(pack.objects()) {
            assert_eq!(object.kind, bucket.kind());
            assert_eq!(&object.hash, bucket.hash());
            assert_eq!(&object.data, bucket.data());
        }
        assert_eq!(received.objects[1].name.as_deref(), Some("repo/.published"));
        assert_eq!(
            received.objects[2].hash.suffix(),
            Some(ObjectSuffix::Catalog)
        );
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let mut pack = ObjectPack::new(1024);
        let handle = pack.new_bucket();
        pack.write(handle, b"0123456789").unwrap();
        pack.commit_bucket(
            BucketKind::Cas,
            Sha256Digester.compute(b"0123456789"),
            handle,
            "",
        )
        .unwrap();

        let mut bytes = pack.to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            ReceivedPack::parse(&bytes),
            Err(PackError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert!(ReceivedPack::parse(b"V1\nS0\nN0\n--\n").is_err());
        assert!(ReceivedPack::parse(b"V2\nS0\nN1\n--\n").is_err());
        assert!(ReceivedPack::parse(b"V2\nS0\nN0\n").is_err());
        assert!(ReceivedPack::parse(b"V2\nS0\nN0\n--\n").is_ok());
    }

    #[test]
    fn test_parse_rejects_hostile_counts() {
        assert!(matches!(
            ReceivedPack::parse(b"V2\nS0\nN18446744073709551615\n--\n"),
            Err(PackError::Malformed(_))
        ));

        let hash = Sha256Digester.compute(b"x");
        let header = format!(
            "V2\nS1\nN2\nC {} {}\nC {} 2\n--\nx",
            hash,
            u64::MAX,
            hash
        );
        assert!(matches!(
            ReceivedPack::parse(header.as_bytes()),
            Err(PackError::Malformed(_))
        ));
    }
}
