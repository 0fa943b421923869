//! Lime: content-addressable asset bundles.
//!
//! A datafile is a single compressed, integrity-protected container built
//! from an INI-shaped resource manifest. The packer streams every named
//! resource (file contents, or literal strings from `@meta` sections)
//! through DEFLATE, deduplicates entries that reference the same source
//! file, and appends a compressed directory keyed by category and key.
//! The extractor validates the container lazily and serves payloads on
//! demand through scoped handles.
//!
//! # Example
//!
//! ```no_run
//! use lime::{pack, Extractor, ExtractorOptions, PackOptions};
//!
//! // Pack
//! let dict = lime::manifest::parse_file("resources.manifest")?;
//! pack(&dict, "assets.dat", &PackOptions::default())?;
//!
//! // Extract
//! let extractor = Extractor::open("assets.dat", ExtractorOptions::default());
//! let handle = extractor.acquire()?;
//! if let Some(bytes) = handle.get("graphics", "sprite1")? {
//!     // use the payload
//!     assert!(!bytes.is_empty());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod codec;
pub mod compress;
pub mod dict;
pub mod extractor;
pub mod format;
pub mod manifest;
pub mod packer;

pub use checksum::{ChecksumKind, Checksummer};
pub use dict::OrderedMap;
pub use extractor::{ExtractError, Extractor, ExtractorOptions, Handle};
pub use format::DictItem;
pub use manifest::{ManifestDict, ManifestError};
pub use packer::{pack, PackError, PackOptions, PackSummary};
