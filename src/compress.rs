//! DEFLATE pipeline.
//!
//! Every payload in a datafile is a zlib-wrapped DEFLATE stream, written
//! back to back in the payload region. File contents are compressed
//! incrementally so a multi-megabyte asset never has to sit in memory;
//! the dictionary and meta values go through the single-shot path. Levels
//! run 0..=9 where 0 emits stored blocks and 9 is maximum compression.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::checksum::Checksummer;

/// Chunk size used to feed the streaming encoder.
pub const INPUT_CHUNK: usize = 512;
/// Read-side buffer for streaming inflation.
pub const OUTPUT_CHUNK: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Truncated compressed stream")]
    Truncated,
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Compress a whole in-memory buffer in one call.
pub fn compress_vec(data: &[u8], level: u32) -> Result<Vec<u8>, CompressError> {
    // zlib overhead is small; size the buffer for the incompressible case
    let bound = data.len() + data.len() / 10 + 64;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bound), Compression::new(level));
    encoder.write_all(data)?;
    encoder
        .finish()
        .map_err(|e| CompressError::Compression(e.to_string()))
}

struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stream-compress `src` into `dst`, updating `digest` over the
/// uncompressed bytes as they pass through. Returns the number of
/// compressed bytes written.
pub fn compress_stream<R: Read, W: Write>(
    mut src: R,
    dst: W,
    level: u32,
    digest: &mut Checksummer,
) -> Result<u64, CompressError> {
    let counter = CountingWriter {
        inner: dst,
        written: 0,
    };
    let mut encoder = ZlibEncoder::new(counter, Compression::new(level));
    let mut chunk = [0u8; INPUT_CHUNK];
    loop {
        let n = src.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        digest.update(&chunk[..n]);
        encoder.write_all(&chunk[..n])?;
    }
    let counter = encoder.finish()?;
    Ok(counter.written)
}

/// Inflate exactly `compressed_len` bytes of `src` into memory.
///
/// A stream that ends before the encoder finished it maps to
/// [`CompressError::Truncated`]; any other inflate failure surfaces as
/// [`CompressError::Decompression`].
pub fn decompress_stream<R: Read>(src: R, compressed_len: u64) -> Result<Vec<u8>, CompressError> {
    let mut decoder = ZlibDecoder::new(src.take(compressed_len));
    let mut out = Vec::new();
    let mut chunk = [0u8; OUTPUT_CHUNK];
    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CompressError::Truncated)
            }
            Err(e) => return Err(CompressError::Decompression(e.to_string())),
        }
    }
    Ok(out)
}
