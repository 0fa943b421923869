//! Resource manifest parser.
//!
//! The manifest is INI-shaped: `[category]` sections, `key = value` entries,
//! `;` comment lines. A category whose name starts with `@` is a
//! meta-section — its values are packed verbatim instead of being read from
//! disk as file contents, so only non-meta values get their path separators
//! normalized to the host convention.
//!
//! The file is read as binary and split on `\n`; `\r` and NUL bytes are
//! discarded. Key/value lines before the first section header are ignored.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::dict::OrderedMap;

/// Parsed manifest: category name → (key → value), both insertion-ordered.
/// Category names keep their `@` prefix; the packer strips it.
pub type ManifestDict = OrderedMap<OrderedMap<String>>;

/// Prefix marking a meta-section.
pub const META_PREFIX: char = '@';

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Unable to open manifest: {path}")]
    Io { path: String },
}

const WHITESPACE: &[char] = &[' ', '\t', '\n', '\r', '\x0c', '\x0b'];

fn trim(text: &str) -> &str {
    text.trim_matches(WHITESPACE)
}

enum Line<'a> {
    Nothing,
    Section(&'a str),
    KeyValue(&'a str, &'a str),
}

fn parse_line(raw: &str) -> Line<'_> {
    let mut line = trim(raw);
    if line.is_empty() || line.starts_with(';') {
        return Line::Nothing;
    }
    if line.starts_with('[') {
        // a trailing comment may follow the closing bracket; the cut stays
        // in effect if the line falls through below
        if let Some(at) = line.find(';') {
            line = &line[..at];
        }
        if let Some(close) = line.rfind(']') {
            return Line::Section(trim(&line[1..close]));
        }
        // no closing bracket: fall through to the key=value check
    }
    if let Some(eq) = line.find('=') {
        return Line::KeyValue(trim(&line[..eq]), trim(&line[eq + 1..]));
    }
    Line::Nothing
}

fn normalize_separators(value: &str) -> String {
    if cfg!(windows) {
        value.replace('/', "\\")
    } else {
        value.replace('\\', "/")
    }
}

/// Parse manifest text already in memory.
pub fn parse_bytes(bytes: &[u8]) -> ManifestDict {
    let cleaned: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|&b| b != b'\r' && b != 0)
        .collect();
    let text = String::from_utf8_lossy(&cleaned);

    let mut dict = ManifestDict::new();
    let mut section: Option<String> = None;
    for raw in text.split('\n') {
        match parse_line(raw) {
            Line::Section(name) => {
                dict.get_or_default(name);
                section = Some(name.to_owned());
            }
            Line::KeyValue(key, value) => {
                if let Some(section) = &section {
                    let value = if section.starts_with(META_PREFIX) {
                        value.to_owned()
                    } else {
                        normalize_separators(value)
                    };
                    dict.get_or_default(section).set(key, value);
                }
            }
            Line::Nothing => {}
        }
    }
    dict
}

/// Read and parse a manifest file.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ManifestDict, ManifestError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|_| ManifestError::Io {
        path: path.display().to_string(),
    })?;
    let dict = parse_bytes(&bytes);
    debug!(
        manifest = %path.display(),
        categories = dict.len(),
        "manifest parsed"
    );
    Ok(dict)
}
