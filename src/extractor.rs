//! On-demand datafile extraction.
//!
//! An [`Extractor`] binds to a datafile path; construction is cheap and
//! does not touch the filesystem. All file access goes through a scoped
//! [`Handle`]: acquiring the first handle opens the backing file, dropping
//! the last one closes it, and every handle on the same extractor shares
//! one stream. Header validation and the dictionary load are deferred to
//! the first [`Handle::get`]; either both succeed or the extractor reverts
//! to its fresh state so a later call retries from scratch.
//!
//! The extractor is a single-owner, single-threaded object — the shared
//! stream position makes concurrent `get` calls from multiple threads a
//! data race by construction. Open independent extractors over the same
//! path instead.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;
use tracing::debug;

use crate::checksum::{checksum_of, ChecksumKind};
use crate::compress::{self, CompressError};
use crate::format::{self, DictItem, DictMap};

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Verify payloads and the dictionary against their stored checksums.
    /// A no-op when the datafile was packed without checksums.
    pub integrity_check: bool,
    /// Compare the datafile's head string against `head_string`.
    pub check_head_string: bool,
    pub head_string: String,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            integrity_check: true,
            check_head_string: false,
            head_string: String::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unable to open file: {path}")]
    UnableToOpen { path: String },
    #[error("Unknown file format")]
    UnknownFormat,
    #[error("Datafile version mismatch")]
    VersionMismatch,
    #[error("Unknown datafile")]
    UnknownDatafile,
    #[error("Corrupted datafile")]
    Corrupted,
    #[error("Unable to decompress data: {0}")]
    Decompress(String),
}

impl From<CompressError> for ExtractError {
    fn from(err: CompressError) -> Self {
        match err {
            CompressError::Truncated => ExtractError::Corrupted,
            other => ExtractError::Decompress(other.to_string()),
        }
    }
}

#[derive(Default)]
struct ExtractorState {
    file: Option<File>,
    handles: usize,
    validated: bool,
    dict_read: bool,
    chksum: ChecksumKind,
    total_size: u64,
    dict_size: u32,
    dict_checksum: u32,
    dict_offset: u64,
    dict_map: DictMap,
}

pub struct Extractor {
    path: PathBuf,
    options: ExtractorOptions,
    state: RefCell<ExtractorState>,
}

impl Extractor {
    /// Bind to a datafile path. Nothing is opened or read until a handle
    /// is acquired and queried.
    pub fn open<P: AsRef<Path>>(path: P, options: ExtractorOptions) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            options,
            state: RefCell::new(ExtractorState::default()),
        }
    }

    /// Acquire a scoped handle, opening the backing file when this is the
    /// first outstanding handle.
    pub fn acquire(&self) -> Result<Handle<'_>, ExtractError> {
        let mut state = self.state.borrow_mut();
        if state.handles == 0 {
            let file = File::open(&self.path).map_err(|_| self.unable_to_open())?;
            state.file = Some(file);
            debug!(datafile = %self.path.display(), "opened");
        }
        state.handles += 1;
        drop(state);
        Ok(Handle { extractor: self })
    }

    /// Forget the loaded dictionary and return to the fresh state. The next
    /// `get` re-validates the header and reloads the dictionary. Whether
    /// the backing file is open is unaffected; that is owned by the
    /// outstanding handles.
    pub fn drop_dictionary(&mut self) {
        let state = self.state.get_mut();
        state.dict_map.clear();
        state.validated = false;
        state.dict_read = false;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unable_to_open(&self) -> ExtractError {
        ExtractError::UnableToOpen {
            path: self.path.display().to_string(),
        }
    }

    fn ensure_ready(&self, state: &mut ExtractorState) -> Result<(), ExtractError> {
        if state.validated && state.dict_read {
            return Ok(());
        }
        let result = self.validate_and_load(state);
        if result.is_err() {
            state.validated = false;
            state.dict_read = false;
            state.dict_map.clear();
        }
        result
    }

    fn validate_and_load(&self, state: &mut ExtractorState) -> Result<(), ExtractError> {
        if !state.validated {
            self.validate(state)?;
        }
        if !state.dict_read {
            self.load_dict(state)?;
        }
        Ok(())
    }

    /// Parse and check the preamble and end marker.
    fn validate(&self, state: &mut ExtractorState) -> Result<(), ExtractError> {
        let check_head = self.options.check_head_string;
        let head_string = self.options.head_string.as_bytes();

        let file = state.file.as_mut().ok_or_else(|| self.unable_to_open())?;

        let total_size = file
            .seek(SeekFrom::End(0))
            .map_err(|_| ExtractError::UnknownFormat)?;
        if total_size < format::MIN_DATAFILE_SIZE {
            return Err(ExtractError::UnknownFormat);
        }

        let mut bgn = [0u8; format::MARKER_LEN];
        let mut end = [0u8; format::MARKER_LEN];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut bgn))
            .map_err(|_| ExtractError::UnknownFormat)?;
        file.seek(SeekFrom::End(-(format::MARKER_LEN as i64)))
            .and_then(|_| file.read_exact(&mut end))
            .map_err(|_| ExtractError::UnknownFormat)?;
        let kind = format::kind_from_markers(&bgn, &end).ok_or(ExtractError::UnknownFormat)?;

        file.seek(SeekFrom::Start(format::MARKER_LEN as u64))
            .map_err(|_| ExtractError::UnknownFormat)?;
        let revision = file.read_u8().map_err(|_| ExtractError::UnknownFormat)?;
        if revision != format::REVISION {
            return Err(ExtractError::VersionMismatch);
        }

        let head_len = file.read_u8().map_err(|_| ExtractError::UnknownFormat)? as usize;
        if check_head {
            let mut head = vec![0u8; head_len];
            file.read_exact(&mut head)
                .map_err(|_| ExtractError::UnknownFormat)?;
            if head != head_string {
                return Err(ExtractError::UnknownDatafile);
            }
        } else if head_len > 0 {
            file.seek(SeekFrom::Current(head_len as i64))
                .map_err(|_| ExtractError::UnknownFormat)?;
        }

        let dict_size = file
            .read_u32::<BigEndian>()
            .map_err(|_| ExtractError::UnknownFormat)?;
        let dict_checksum = if kind != ChecksumKind::None {
            file.read_u32::<BigEndian>()
                .map_err(|_| ExtractError::UnknownFormat)?
        } else {
            0
        };

        // the compressed dictionary ends just before the end marker
        let dict_offset = total_size
            .checked_sub(dict_size as u64 + format::MARKER_LEN as u64)
            .ok_or(ExtractError::Corrupted)?;

        state.chksum = kind;
        state.total_size = total_size;
        state.dict_size = dict_size;
        state.dict_checksum = dict_checksum;
        state.dict_offset = dict_offset;
        state.validated = true;
        debug!(
            datafile = %self.path.display(),
            ?kind,
            dict_size,
            "header validated"
        );
        Ok(())
    }

    /// Decompress and parse the directory.
    fn load_dict(&self, state: &mut ExtractorState) -> Result<(), ExtractError> {
        let kind = state.chksum;
        let dict_offset = state.dict_offset;
        let dict_size = state.dict_size;
        let dict_checksum = state.dict_checksum;

        let bytes = {
            let file = state.file.as_mut().ok_or_else(|| self.unable_to_open())?;
            file.seek(SeekFrom::Start(dict_offset))
                .map_err(|_| ExtractError::Corrupted)?;
            compress::decompress_stream(&mut *file, dict_size as u64)?
        };

        if self.options.integrity_check
            && kind != ChecksumKind::None
            && checksum_of(kind, &bytes) != dict_checksum
        {
            return Err(ExtractError::Corrupted);
        }

        state.dict_map = format::parse_directory(&bytes, kind).map_err(|_| ExtractError::Corrupted)?;
        state.dict_read = true;
        debug!(categories = state.dict_map.len(), "dictionary loaded");
        Ok(())
    }
}

/// Scoped access to an extractor's backing file.
///
/// Not cloneable: the open/close decision belongs to the handle count and
/// aliasing it silently would break the bookkeeping.
pub struct Handle<'a> {
    extractor: &'a Extractor,
}

impl Handle<'_> {
    /// Fetch the payload stored under `(category, key)`.
    ///
    /// An unknown category or key is `Ok(None)`, distinct from a datafile
    /// error; the payload region is not touched in that case.
    pub fn get(&self, category: &str, key: &str) -> Result<Option<Vec<u8>>, ExtractError> {
        let extractor = self.extractor;
        let mut state = extractor.state.borrow_mut();
        extractor.ensure_ready(&mut state)?;

        let item = match state.dict_map.get(category).and_then(|c| c.get(key)) {
            Some(item) => *item,
            None => return Ok(None),
        };

        let kind = state.chksum;
        let bytes = {
            let file = state
                .file
                .as_mut()
                .ok_or_else(|| extractor.unable_to_open())?;
            file.seek(SeekFrom::Start(item.seek_id))
                .map_err(|_| ExtractError::Corrupted)?;
            compress::decompress_stream(&mut *file, item.size)?
        };

        if extractor.options.integrity_check
            && kind != ChecksumKind::None
            && checksum_of(kind, &bytes) != item.checksum
        {
            return Err(ExtractError::Corrupted);
        }
        Ok(Some(bytes))
    }

    /// Directory record for `(category, key)` without reading the payload.
    pub fn stat(&self, category: &str, key: &str) -> Result<Option<DictItem>, ExtractError> {
        let extractor = self.extractor;
        let mut state = extractor.state.borrow_mut();
        extractor.ensure_ready(&mut state)?;
        Ok(state.dict_map.get(category).and_then(|c| c.get(key)).copied())
    }

    /// Category names present in the datafile, in no particular order.
    pub fn categories(&self) -> Result<Vec<String>, ExtractError> {
        let extractor = self.extractor;
        let mut state = extractor.state.borrow_mut();
        extractor.ensure_ready(&mut state)?;
        Ok(state.dict_map.keys().cloned().collect())
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        let mut state = self.extractor.state.borrow_mut();
        state.handles -= 1;
        if state.handles == 0 {
            state.file = None;
            debug!(datafile = %self.extractor.path.display(), "closed");
        }
    }
}
