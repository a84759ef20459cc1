//! Format registry: every known format with its signatures, extension hints
//! and decode capability.

use crate::codecs::compression::{self, Bzip2, Gzip, Lzma, Xz, Zstd};
use crate::codecs::rar::Rar;
use crate::codecs::sevenz::SevenZip;
use crate::codecs::tar::{self as tar_codec, Tar};
use crate::codecs::zip::Zip;
use crate::codecs::{ArchiveReader, StreamDecoder};
use crate::error::UnpackError;
use std::collections::HashMap;
use std::fmt;

/// Layer kind of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Wraps exactly one inner stream
    Compression,
    /// Holds zero or more named entries
    Container,
}

/// How a format is recognized from content.
#[derive(Clone, Copy)]
pub enum Signature {
    /// Fixed bytes at a fixed offset
    Magic {
        offset: usize,
        bytes: &'static [u8],
    },
    /// Structural check over the prefix
    Probe {
        name: &'static str,
        /// Relative strength, comparable to a magic length in bytes
        specificity: usize,
        check: fn(&[u8]) -> bool,
    },
}

impl Signature {
    pub fn matches(&self, prefix: &[u8]) -> bool {
        match self {
            Signature::Magic { offset, bytes } => prefix
                .get(*offset..*offset + bytes.len())
                .is_some_and(|window| window == *bytes),
            Signature::Probe { check, .. } => check(prefix),
        }
    }

    pub fn specificity(&self) -> usize {
        match self {
            Signature::Magic { bytes, .. } => bytes.len(),
            Signature::Probe { specificity, .. } => *specificity,
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Magic { offset, bytes } => write!(f, "magic {bytes:02X?} @{offset}"),
            Signature::Probe { name, .. } => write!(f, "probe {name}"),
        }
    }
}

/// File name suffix associated with a format, and what the name becomes
/// once the layer is decoded.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionHint {
    pub suffix: &'static str,
    pub replacement: &'static str,
}

/// Decode capability of a single layer.
pub enum Capability {
    Stream(Box<dyn StreamDecoder>),
    Archive(Box<dyn ArchiveReader>),
}

/// One registered format. Immutable once built.
pub struct FormatDescriptor {
    id: &'static str,
    signatures: Vec<Signature>,
    extensions: Vec<ExtensionHint>,
    extension_fallback: bool,
    capability: Capability,
}

impl FormatDescriptor {
    /// A compression layer decoded by `decoder`.
    pub fn compression(id: &'static str, decoder: impl StreamDecoder + 'static) -> Self {
        Self::new(id, Capability::Stream(Box::new(decoder)))
    }

    /// A container layer read by `reader`.
    pub fn container(id: &'static str, reader: impl ArchiveReader + 'static) -> Self {
        Self::new(id, Capability::Archive(Box::new(reader)))
    }

    fn new(id: &'static str, capability: Capability) -> Self {
        Self {
            id,
            signatures: Vec::new(),
            extensions: Vec::new(),
            extension_fallback: false,
            capability,
        }
    }

    pub fn magic(mut self, offset: usize, bytes: &'static [u8]) -> Self {
        self.signatures.push(Signature::Magic { offset, bytes });
        self
    }

    pub fn probe(mut self, name: &'static str, specificity: usize, check: fn(&[u8]) -> bool) -> Self {
        self.signatures.push(Signature::Probe {
            name,
            specificity,
            check,
        });
        self
    }

    /// Register `suffix`; a decoded payload loses it in favour of `replacement`.
    pub fn extension(mut self, suffix: &'static str, replacement: &'static str) -> Self {
        self.extensions.push(ExtensionHint {
            suffix,
            replacement,
        });
        self
    }

    /// The format has no reliable magic number: trust its extensions when no
    /// signature matches.
    pub fn extension_fallback(mut self) -> Self {
        self.extension_fallback = true;
        self
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        match self.capability {
            Capability::Stream(_) => LayerKind::Compression,
            Capability::Archive(_) => LayerKind::Container,
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn has_extension_fallback(&self) -> bool {
        self.extension_fallback
    }

    pub fn stream_decoder(&self) -> Option<&dyn StreamDecoder> {
        match &self.capability {
            Capability::Stream(d) => Some(d.as_ref()),
            Capability::Archive(_) => None,
        }
    }

    pub fn archive_reader(&self) -> Option<&dyn ArchiveReader> {
        match &self.capability {
            Capability::Archive(r) => Some(r.as_ref()),
            Capability::Stream(_) => None,
        }
    }

    /// Highest specificity among the signatures matching `prefix`.
    pub fn match_strength(&self, prefix: &[u8]) -> Option<usize> {
        self.signatures
            .iter()
            .filter(|s| s.matches(prefix))
            .map(Signature::specificity)
            .max()
    }

    /// Extension hint matching the end of `name` (case-insensitive), longest first.
    pub fn matching_extension(&self, name: &str) -> Option<&ExtensionHint> {
        self.extensions
            .iter()
            .filter(|hint| {
                let Some(cut) = name.len().checked_sub(hint.suffix.len()) else {
                    return false;
                };
                cut > 0
                    && name.is_char_boundary(cut)
                    && name[cut..].eq_ignore_ascii_case(hint.suffix)
            })
            .max_by_key(|hint| hint.suffix.len())
    }

    /// Name of the decoded layer, if `name` carries one of this format's
    /// extensions: `notes.txt.gz` -> `notes.txt`, `src.tgz` -> `src.tar`.
    pub fn strip_extension(&self, name: &str) -> Option<String> {
        self.matching_extension(name).map(|hint| {
            let stem = &name[..name.len() - hint.suffix.len()];
            format!("{stem}{}", hint.replacement)
        })
    }

    fn max_specificity(&self) -> usize {
        self.signatures
            .iter()
            .map(Signature::specificity)
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("signatures", &self.signatures)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// The set of known formats. Built once at startup and shared read-only.
#[derive(Debug)]
pub struct FormatRegistry {
    /// Ordered most specific signature first
    formats: Vec<FormatDescriptor>,
    by_id: HashMap<&'static str, usize>,
}

impl FormatRegistry {
    /// Build a registry from `formats`.
    ///
    /// # Errors
    ///
    /// Returns [`UnpackError::Configuration`] if two descriptors share an identifier.
    pub fn new(mut formats: Vec<FormatDescriptor>) -> Result<Self, UnpackError> {
        // Stable: equally specific formats keep their registration order.
        formats.sort_by_key(|f| std::cmp::Reverse(f.max_specificity()));

        let mut by_id = HashMap::with_capacity(formats.len());
        for (index, format) in formats.iter().enumerate() {
            if by_id.insert(format.id, index).is_some() {
                return Err(UnpackError::Configuration(format!(
                    "format '{}' registered twice",
                    format.id
                )));
            }
        }
        Ok(Self { formats, by_id })
    }

    /// Every format this crate can decode.
    pub fn builtin() -> Result<Self, UnpackError> {
        Self::new(vec![
            FormatDescriptor::compression("gzip", Gzip)
                .magic(0, &[0x1F, 0x8B, 0x08])
                .extension(".gz", "")
                .extension(".tgz", ".tar")
                .extension(".taz", ".tar"),
            FormatDescriptor::compression("bzip2", Bzip2)
                .probe("bzip2 stream header", 4, compression::is_bzip2)
                .extension(".bz2", "")
                .extension(".tbz", ".tar")
                .extension(".tbz2", ".tar")
                .extension(".tb2", ".tar"),
            FormatDescriptor::compression("xz", Xz)
                .magic(0, &[0xFD, b'7', b'z', b'X', b'Z', 0x00])
                .extension(".xz", "")
                .extension(".txz", ".tar"),
            FormatDescriptor::compression("lzma", Lzma)
                .probe("lzma-alone header", 1, compression::is_lzma_alone)
                .extension(".lzma", "")
                .extension(".tlz", ".tar")
                .extension_fallback(),
            FormatDescriptor::compression("zstd", Zstd)
                .magic(0, &[0x28, 0xB5, 0x2F, 0xFD])
                .extension(".zst", "")
                .extension(".tzst", ".tar"),
            FormatDescriptor::container("tar", Tar)
                .probe("tar header checksum", 8, tar_codec::is_tar_header)
                .extension(".tar", "")
                .extension_fallback(),
            FormatDescriptor::container("zip", Zip)
                .magic(0, b"PK\x03\x04")
                .magic(0, b"PK\x05\x06")
                .magic(0, b"PK\x07\x08")
                .extension(".zip", "")
                .extension(".jar", "")
                .extension(".war", "")
                .extension(".apk", "")
                .extension(".xpi", "")
                .extension(".whl", ""),
            FormatDescriptor::container("7z", SevenZip)
                .magic(0, &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C])
                .extension(".7z", ""),
            FormatDescriptor::container("rar", Rar)
                .magic(0, b"Rar!\x1A\x07\x01\x00")
                .magic(0, b"Rar!\x1A\x07\x00")
                .extension(".rar", ""),
        ])
    }

    /// Look a format up by identifier.
    pub fn lookup(&self, id: &str) -> Result<&FormatDescriptor, UnpackError> {
        self.by_id
            .get(id)
            .map(|&i| &self.formats[i])
            .ok_or_else(|| UnpackError::UnknownFormat(id.to_string()))
    }

    /// All formats, most specific signature first.
    pub fn all_matchers(&self) -> &[FormatDescriptor] {
        &self.formats
    }
}
