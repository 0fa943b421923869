//! Datafile format: marker pairs, revision, directory layout.
//!
//! ```text
//! offset 0:          bgn       2 bytes   ("L>"=Adler-32, "L]"=CRC-32, "L)"=none)
//! offset 2:          rev       u8        (currently 1)
//! offset 3:          head_len  u8
//! offset 4:          head      head_len bytes
//! offset 4+head_len: dict_sz   u32
//!           +4:      dict_cksum u32      (present iff checksum != none)
//!           +...:    payload region      (concatenated DEFLATE streams)
//!           +...:    dict      dict_sz bytes (DEFLATE stream)
//! EOF - 2:           end       2 bytes   ("<M"/"[M"/"(M", paired with bgn)
//! ```
//!
//! The marker pair is the sole in-band indicator of the checksum algorithm.
//! All integers are big-endian; names are u8-length-prefixed and therefore
//! capped at 255 bytes.

use std::collections::HashMap;
use std::io::{self, Cursor};

use thiserror::Error;

use crate::checksum::ChecksumKind;
use crate::codec;
use crate::dict::OrderedMap;

/// Implemented datafile revision.
pub const REVISION: u8 = 1;

/// Byte length of the begin and end markers.
pub const MARKER_LEN: usize = 2;

/// Smallest plausible datafile.
pub const MIN_DATAFILE_SIZE: u64 = 36;

pub const BGN_ADLER32: &[u8; 2] = b"L>";
pub const END_ADLER32: &[u8; 2] = b"<M";
pub const BGN_CRC32: &[u8; 2] = b"L]";
pub const END_CRC32: &[u8; 2] = b"[M";
pub const BGN_NOCHKSUM: &[u8; 2] = b"L)";
pub const END_NOCHKSUM: &[u8; 2] = b"(M";

pub fn begin_marker(kind: ChecksumKind) -> &'static [u8; 2] {
    match kind {
        ChecksumKind::Adler32 => BGN_ADLER32,
        ChecksumKind::Crc32 => BGN_CRC32,
        ChecksumKind::None => BGN_NOCHKSUM,
    }
}

pub fn end_marker(kind: ChecksumKind) -> &'static [u8; 2] {
    match kind {
        ChecksumKind::Adler32 => END_ADLER32,
        ChecksumKind::Crc32 => END_CRC32,
        ChecksumKind::None => END_NOCHKSUM,
    }
}

/// Identify the checksum algorithm from a marker pair. Any combination
/// other than the three matched pairs is an unknown format.
pub fn kind_from_markers(bgn: &[u8], end: &[u8]) -> Option<ChecksumKind> {
    if bgn == BGN_ADLER32 && end == END_ADLER32 {
        Some(ChecksumKind::Adler32)
    } else if bgn == BGN_CRC32 && end == END_CRC32 {
        Some(ChecksumKind::Crc32)
    } else if bgn == BGN_NOCHKSUM && end == END_NOCHKSUM {
        Some(ChecksumKind::None)
    } else {
        None
    }
}

/// Directory record for one stored payload.
///
/// `seek_id` is the absolute offset of the compressed payload in the
/// datafile, `size` its compressed byte length, and `checksum` the checksum
/// of the uncompressed bytes (0 when the datafile carries none). Entries
/// that deduplicated to the same source share all three fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DictItem {
    pub seek_id: u64,
    pub size: u64,
    pub checksum: u32,
}

/// Packer-side directory: insertion-ordered, written to disk in order.
pub type PackedDict = OrderedMap<OrderedMap<DictItem>>;

/// Extractor-side directory: lookup only, no order promised between gets.
pub type DictMap = HashMap<String, HashMap<String, DictItem>>;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Truncated or malformed directory: {0}")]
    Malformed(#[from] io::Error),
}

/// Serialize the directory. The per-item checksum field is present iff the
/// datafile carries checksums.
pub fn encode_directory(dict: &PackedDict, kind: ChecksumKind) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::put_u32(&mut buf, dict.len() as u32);
    for (category, items) in dict.iter() {
        codec::put_str(&mut buf, category);
        codec::put_u32(&mut buf, items.len() as u32);
        for (key, item) in items.iter() {
            codec::put_str(&mut buf, key);
            codec::put_u64(&mut buf, item.seek_id);
            codec::put_u64(&mut buf, item.size);
            if kind != ChecksumKind::None {
                codec::put_u32(&mut buf, item.checksum);
            }
        }
    }
    buf
}

/// Parse a directory produced by [`encode_directory`].
pub fn parse_directory(bytes: &[u8], kind: ChecksumKind) -> Result<DictMap, DirectoryError> {
    let mut cursor = Cursor::new(bytes);
    let n_categories = codec::read_u32(&mut cursor)?;
    let mut map = DictMap::new();
    for _ in 0..n_categories {
        let category = codec::read_str(&mut cursor)?;
        let n_items = codec::read_u32(&mut cursor)?;
        let items = map.entry(category).or_default();
        for _ in 0..n_items {
            let key = codec::read_str(&mut cursor)?;
            let seek_id = codec::read_u64(&mut cursor)?;
            let size = codec::read_u64(&mut cursor)?;
            let checksum = if kind != ChecksumKind::None {
                codec::read_u32(&mut cursor)?
            } else {
                0
            };
            items.insert(
                key,
                DictItem {
                    seek_id,
                    size,
                    checksum,
                },
            );
        }
    }
    Ok(map)
}
