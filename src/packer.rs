//! Datafile packer.
//!
//! Packing runs in one pass over the manifest dictionary: verify that every
//! referenced file exists, write the preamble with placeholder directory
//! fields, stream each payload through the DEFLATE encoder while
//! checksumming the uncompressed bytes, append the compressed directory and
//! the end marker, then seek back and patch the placeholders. Entries whose
//! values canonicalize to the same source file are written once; later
//! entries reuse the first entry's directory record.
//!
//! Any failure aborts the pack and removes the partial output file so no
//! corrupted datafile is left behind.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;
use tracing::debug;

use crate::checksum::{checksum_of, ChecksumKind, Checksummer};
use crate::codec;
use crate::compress::{self, CompressError};
use crate::format::{self, DictItem, PackedDict};
use crate::manifest::{ManifestDict, ManifestError, META_PREFIX};

/// Default DEFLATE level.
pub const DEFAULT_LEVEL: u32 = 9;

#[derive(Debug, Clone)]
pub struct PackOptions {
    /// DEFLATE level, 0..=9. 0 emits stored blocks.
    pub level: u32,
    pub checksum: ChecksumKind,
    /// Head identification string, capped at 255 bytes.
    pub head: String,
    /// Lowercase source paths before deduplication, for case-insensitive
    /// filesystems.
    pub case_insensitive_paths: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            checksum: ChecksumKind::Adler32,
            head: String::new(),
            case_insensitive_paths: cfg!(windows),
        }
    }
}

/// What a successful pack produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackSummary {
    /// Directory entries written.
    pub entries: usize,
    /// Payload streams written (deduplicated entries share one).
    pub payloads: usize,
    /// Entries that reused an already-written payload.
    pub dedup_hits: usize,
    /// Final datafile size in bytes.
    pub container_size: u64,
}

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Missing file: {path}")]
    MissingFile { path: String },
    #[error("Unable to open file for writing: {path}")]
    WriteOpen { path: String },
    #[error("Write failed: {path}")]
    WriteFailed { path: String },
    #[error("Unable to read source file: {path}")]
    ReadFailed { path: String },
    #[error("Compressed directory exceeds the u32 header field")]
    DirectoryTooLarge,
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Compress(#[from] CompressError),
}

fn canonical(path: &str, options: &PackOptions) -> String {
    if options.case_insensitive_paths {
        path.to_lowercase()
    } else {
        path.to_owned()
    }
}

fn verify_files(dict: &ManifestDict, options: &PackOptions) -> Result<(), PackError> {
    let mut seen = HashSet::new();
    for (category, items) in dict.iter() {
        if category.starts_with(META_PREFIX) {
            continue;
        }
        for (_, value) in items.iter() {
            if !seen.insert(canonical(value, options)) {
                continue;
            }
            if !Path::new(value).exists() {
                return Err(PackError::MissingFile {
                    path: value.to_owned(),
                });
            }
            debug!(file = value, "verified");
        }
    }
    Ok(())
}

/// Pack `dict` into a datafile at `output`.
pub fn pack<P: AsRef<Path>>(
    dict: &ManifestDict,
    output: P,
    options: &PackOptions,
) -> Result<PackSummary, PackError> {
    let output = output.as_ref();
    verify_files(dict, options)?;
    let result = write_datafile(dict, output, options);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

fn write_datafile(
    dict: &ManifestDict,
    output: &Path,
    options: &PackOptions,
) -> Result<PackSummary, PackError> {
    let out_name = output.display().to_string();
    let file = File::create(output).map_err(|_| PackError::WriteOpen {
        path: out_name.clone(),
    })?;
    let mut out = BufWriter::new(file);
    let wfail = |_: io::Error| PackError::WriteFailed {
        path: out_name.clone(),
    };

    // preamble; the directory size and checksum are patched in at the end
    out.write_all(format::begin_marker(options.checksum))
        .map_err(wfail)?;
    out.write_u8(format::REVISION).map_err(wfail)?;
    let head = options.head.as_bytes();
    let head_len = head.len().min(codec::MAX_STR_LEN);
    out.write_u8(head_len as u8).map_err(wfail)?;
    out.write_all(&head[..head_len]).map_err(wfail)?;

    let patch_offset = out.stream_position().map_err(wfail)?;
    out.write_u32::<BigEndian>(0).map_err(wfail)?;
    if options.checksum != ChecksumKind::None {
        out.write_u32::<BigEndian>(0).map_err(wfail)?;
    }

    // payload region, in manifest order
    let mut packed = PackedDict::new();
    let mut packed_files: HashMap<String, DictItem> = HashMap::new();
    let mut summary = PackSummary::default();

    for (category, items) in dict.iter() {
        let meta = category.starts_with(META_PREFIX);
        let stored_category = category.strip_prefix(META_PREFIX).unwrap_or(category);
        for (key, value) in items.iter() {
            let item = if meta {
                let payload = value.as_bytes();
                let checksum = checksum_of(options.checksum, payload);
                let compressed = compress::compress_vec(payload, options.level)?;
                let seek_id = out.stream_position().map_err(wfail)?;
                out.write_all(&compressed).map_err(wfail)?;
                summary.payloads += 1;
                DictItem {
                    seek_id,
                    size: compressed.len() as u64,
                    checksum,
                }
            } else {
                let source = canonical(value, options);
                match packed_files.get(&source).copied() {
                    Some(item) => {
                        summary.dedup_hits += 1;
                        debug!(file = value, "payload shared");
                        item
                    }
                    None => {
                        let src = File::open(value).map_err(|_| PackError::ReadFailed {
                            path: value.to_owned(),
                        })?;
                        let seek_id = out.stream_position().map_err(wfail)?;
                        let mut digest = Checksummer::new(options.checksum);
                        let size = compress::compress_stream(src, &mut out, options.level, &mut digest)
                            .map_err(|e| match e {
                                CompressError::Io(err) => wfail(err),
                                other => PackError::Compress(other),
                            })?;
                        let item = DictItem {
                            seek_id,
                            size,
                            checksum: digest.finalize(),
                        };
                        packed_files.insert(source, item);
                        summary.payloads += 1;
                        debug!(file = value, size, "payload packed");
                        item
                    }
                }
            };
            summary.entries += 1;
            packed.get_or_default(stored_category).set(key, item);
        }
    }

    // directory, checksummed uncompressed and stored compressed
    let dir_bytes = format::encode_directory(&packed, options.checksum);
    let dict_checksum = checksum_of(options.checksum, &dir_bytes);
    let compressed_dir = compress::compress_vec(&dir_bytes, options.level)?;
    let dict_size =
        u32::try_from(compressed_dir.len()).map_err(|_| PackError::DirectoryTooLarge)?;
    out.write_all(&compressed_dir).map_err(wfail)?;
    out.write_all(format::end_marker(options.checksum))
        .map_err(wfail)?;
    summary.container_size = out.stream_position().map_err(wfail)?;

    // patch the preamble placeholders
    out.seek(SeekFrom::Start(patch_offset)).map_err(wfail)?;
    out.write_u32::<BigEndian>(dict_size).map_err(wfail)?;
    if options.checksum != ChecksumKind::None {
        out.write_u32::<BigEndian>(dict_checksum).map_err(wfail)?;
    }
    out.flush().map_err(wfail)?;

    debug!(
        entries = summary.entries,
        payloads = summary.payloads,
        size = summary.container_size,
        "datafile written"
    );
    Ok(summary)
}
