//! Selectable streaming checksums.
//!
//! Datafiles carry either Adler-32 or CRC-32 over each uncompressed payload,
//! or no checksum at all. Both states are seeded with 0 the way zlib call
//! sites do it; note the 0 seed makes the Adler-32 value differ from the
//! RFC 1950 one, which starts the low half at 1. The `None` kind is a
//! constant-0 sink so packing and extraction run a single code path.

use adler32::RollingAdler32;
use crc32fast::Hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumKind {
    #[default]
    Adler32,
    Crc32,
    None,
}

pub enum Checksummer {
    Adler32(RollingAdler32),
    Crc32(Hasher),
    None,
}

impl Checksummer {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Adler32 => Self::Adler32(RollingAdler32::from_value(0)),
            ChecksumKind::Crc32 => Self::Crc32(Hasher::new()),
            ChecksumKind::None => Self::None,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Adler32(state) => state.update_buffer(bytes),
            Self::Crc32(state) => state.update(bytes),
            Self::None => {}
        }
    }

    pub fn finalize(self) -> u32 {
        match self {
            Self::Adler32(state) => state.hash(),
            Self::Crc32(state) => state.finalize(),
            Self::None => 0,
        }
    }
}

/// One-call convenience over the streaming API.
pub fn checksum_of(kind: ChecksumKind, bytes: &[u8]) -> u32 {
    let mut state = Checksummer::new(kind);
    state.update(bytes);
    state.finalize()
}
