//! Decode capabilities, one adapter per format.
//!
//! The planner and the orchestrator only see the two traits defined here:
//! [`StreamDecoder`] for compression layers and [`ArchiveReader`] for
//! containers. Adding a format means writing an adapter and registering it
//! in [`crate::registry::FormatRegistry::builtin`].

pub mod compression;
pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod zip;

use crate::error::UnpackError;
use crate::registry::FormatDescriptor;
use crate::safety::EntryType;
use crate::types::FailureKind;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// A compression layer: wraps exactly one inner byte stream.
pub trait StreamDecoder: Send + Sync {
    /// Wrap `input` in a reader yielding the decoded bytes.
    fn decode<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>>;
}

/// Input handed to a container reader.
pub enum ContainerInput<'a> {
    /// A seekable file on disk
    Path(&'a Path),
    /// A forward-only decoded stream (only offered when [`ArchiveReader::streaming`])
    Stream(Box<dyn Read + 'a>),
}

/// A container layer: holds zero or more named entries.
pub trait ArchiveReader: Send + Sync {
    /// Whether entries can be read from a forward-only stream. Readers that
    /// need random access get decoded layers materialized to a file first.
    fn streaming(&self) -> bool {
        false
    }

    /// Feed every entry, in container order, to `sink`.
    ///
    /// Errors returned from here are fatal for the whole container. Members
    /// that cannot be read are reported through [`EntrySink::reject`].
    fn read_entries(
        &self,
        input: ContainerInput<'_>,
        password: Option<&str>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), UnpackError>;
}

/// One member of a container. Borrowed from the reader; it does not outlive
/// the call to [`EntrySink::accept`].
pub struct Entry<'a> {
    /// Name as stored in the archive
    pub name: String,
    /// Stored (uncompressed) size
    pub size: u64,
    /// Entry type
    pub kind: EntryType,
    /// Unix permission bits, when the archive records them
    pub mode: Option<u32>,
    /// Target of a symbolic or hard link
    pub link_target: Option<PathBuf>,
    content: &'a mut dyn Read,
}

impl<'a> Entry<'a> {
    pub fn new(name: impl Into<String>, kind: EntryType, content: &'a mut dyn Read) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind,
            mode: None,
            link_target: None,
            content,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_mode(mut self, mode: Option<u32>) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_link_target(mut self, target: PathBuf) -> Self {
        self.link_target = Some(target);
        self
    }

    /// Raw content of the entry
    pub fn reader(&mut self) -> &mut dyn Read {
        &mut *self.content
    }
}

/// Receives the entries of a container.
pub trait EntrySink {
    /// Handle one readable entry. An error aborts the container.
    fn accept(&mut self, entry: Entry<'_>) -> Result<(), UnpackError>;

    /// Record a member the reader could not open. An error aborts the container.
    fn reject(&mut self, name: &str, kind: FailureKind, message: String)
        -> Result<(), UnpackError>;

    /// Whether entry contents will be read. Listing sinks return `false` so
    /// readers can skip decompression.
    fn wants_content(&self) -> bool {
        true
    }
}

/// Read up to `limit` bytes into an owned buffer.
pub fn read_prefix<R: Read + ?Sized>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Open `path` and stack the decoders of `layers` on top of it.
///
/// Every layer must be a compression layer.
pub fn decode_chain<'a>(
    path: &Path,
    layers: &[&'a FormatDescriptor],
) -> Result<Box<dyn Read + 'a>, UnpackError> {
    if !path.exists() {
        return Err(UnpackError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let mut reader: Box<dyn Read + 'a> = Box::new(BufReader::new(file));
    for layer in layers {
        let decoder = layer
            .stream_decoder()
            .ok_or_else(|| UnpackError::corrupt(layer.id(), "container used as a stream"))?;
        reader = decoder
            .decode(reader)
            .map_err(|e| UnpackError::corrupt(layer.id(), e))?;
    }
    Ok(reader)
}
