//! Pack serialization
//!
//! Layout of a serialized pack:
//!
//! ```text
//! V2
//! S<total committed bytes>
//! N<number of objects>
//! C <hash> <size>                    one line per content-addressed bucket
//! N <hash> <size> <base64(name)>     one line per named bucket
//! --
//! <bucket payloads, concatenated in commit order>
//! ```

use std::io::{self, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{BucketKind, ObjectPack};

pub(crate) const PACK_VERSION: &str = "V2";
pub(crate) const HEADER_END: &str = "--";

/// Restartable byte stream over a pack
///
/// Only the header is materialized; bucket payloads are read directly out of
///  the pack, so streaming a pack into a hasher or a request body does not
///  keep a second copy of it around.
#[derive(Debug)]
pub struct PackReader<'a> {
    pack: &'a ObjectPack,
    header: Vec<u8>,
    /// 0 is the header, `i > 0` is the payload of object `i - 1`
    segment: usize,
    offset: usize,
}

impl<'a> PackReader<'a> {
    pub(crate) fn new(pack: &'a ObjectPack) -> Self {
        Self {
            pack,
            header: build_header(pack),
            segment: 0,
            offset: 0,
        }
    }

    /// Total length of the serialized pack
    pub fn len(&self) -> usize {
        self.header.len() + self.pack.size() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start over from the first header byte
    pub fn rewind(&mut self) {
        self.segment = 0;
        self.offset = 0;
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.rewind();
        while let Some(chunk) = self.current_segment() {
            out.extend_from_slice(&chunk[self.offset..]);
            self.segment += 1;
            self.offset = 0;
        }
        out
    }

    fn current_segment(&self) -> Option<&[u8]> {
        match self.segment {
            0 => Some(&self.header),
            i => self
                .pack
                .objects()
                .get(i - 1)
                .map(|bucket| bucket.data().as_ref()),
        }
    }
}

impl Read for PackReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some(segment) = self.current_segment() else {
                break;
            };
            let remaining = &segment[self.offset..];
            let n = remaining.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&remaining[..n]);
            let exhausted = n == remaining.len();
            written += n;
            self.offset += n;
            if exhausted {
                self.segment += 1;
                self.offset = 0;
            }
        }
        Ok(written)
    }
}

fn build_header(pack: &ObjectPack) -> Vec<u8> {
    let mut header = format!(
        "{}\nS{}\nN{}\n",
        PACK_VERSION,
        pack.size(),
        pack.num_objects()
    );
    for bucket in pack.objects() {
        match bucket.kind() {
            BucketKind::Cas => header.push_str(&format!(
                "{} {} {}\n",
                bucket.kind().tag(),
                bucket.hash(),
                bucket.size()
            )),
            BucketKind::Named => header.push_str(&format!(
                "{} {} {} {}\n",
                bucket.kind().tag(),
                bucket.hash(),
                bucket.size(),
                STANDARD.encode(bucket.name())
            )),
        }
    }
    header.push_str(HEADER_END);
    header.push('\n');
    header.into_bytes()
}
