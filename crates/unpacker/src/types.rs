//! Type definitions for extraction options and reports.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on nested layers, shared by planning and recursive unpacking.
pub const DEFAULT_DEPTH_LIMIT: usize = 10;

/// Individual entry within an archive, as listed by [`crate::probe`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path of the entry as stored in the archive
    pub path: String,

    /// Whether this entry is a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes
    pub size: u64,
}

/// Metadata about a file's layers and contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Layer identifiers outer to inner, e.g. `["gzip", "tar"]`
    pub layers: Vec<String>,

    /// Number of entries in the innermost container (1 for a plain compressed file)
    pub entries: u64,

    /// Size of the input file in bytes
    pub compressed_bytes: Option<u64>,

    /// Sum of the stored entry sizes (if available)
    pub uncompressed_estimate: Option<u64>,

    /// List of all entries
    pub entry_list: Vec<ArchiveEntry>,
}

/// Options for extracting an archive.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// How to handle entries whose destination already exists
    pub collision: CollisionPolicy,

    /// Unpack archives found inside containers
    pub recursive: bool,

    /// Maximum number of nested layers
    pub depth_limit: usize,

    /// Maximum total extracted size in bytes (default: 20 GB)
    pub size_limit_bytes: Option<u64>,

    /// Number of leading path components to strip from extracted entries
    pub strip_components: u32,

    /// Whether to create symbolic links that stay inside the target
    pub allow_symlinks: bool,

    /// Whether to create hard links to already extracted entries
    pub allow_hardlinks: bool,

    /// Password for encrypted archives
    pub password: Option<String>,

    /// Wall-clock limit for one input, nested archives included
    pub timeout: Option<Duration>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            collision: CollisionPolicy::Skip,
            recursive: false,
            depth_limit: DEFAULT_DEPTH_LIMIT,
            size_limit_bytes: Some(20 * 1024 * 1024 * 1024), // 20 GB
            strip_components: 0,
            allow_symlinks: true,
            allow_hardlinks: true,
            password: None,
            timeout: None,
        }
    }
}

/// How to handle file conflicts during extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Keep the existing file and record the entry as skipped
    #[default]
    Skip,

    /// Replace existing files
    Overwrite,

    /// Write new files under a disambiguated name: (1), (2), etc.
    Rename,
}

/// Where the contents of one input end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Extract into exactly this directory
    Exact(PathBuf),

    /// Extract containers into a directory named after the input, created
    /// under this base; plain compressed payloads land in the base itself
    Derived(PathBuf),
}

impl Destination {
    /// The directory the destination is anchored at
    pub fn base(&self) -> &Path {
        match self {
            Destination::Exact(p) | Destination::Derived(p) => p,
        }
    }
}

/// Classification of a per-entry failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by the path safety guard
    UnsafePath,
    /// Entry type or feature that cannot be extracted (device, encrypted, ...)
    Unsupported,
    /// Entry data could not be decoded
    Corrupt,
    /// Writing to disk failed
    Write,
    /// A nested archive could not be unpacked
    Nested,
}

/// One entry that could not be extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFailure {
    /// Entry name as stored in the archive
    pub entry: String,
    /// What went wrong
    pub kind: FailureKind,
    /// Human readable details
    pub message: String,
}

/// Outcome of unpacking one input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// The unpacked input
    pub source: PathBuf,

    /// Directory the input was unpacked into
    pub target_dir: PathBuf,

    /// Layer identifiers, outer to inner
    pub plan: Vec<String>,

    /// Files, links and payloads written
    pub written: Vec<PathBuf>,

    /// Destinations left untouched because they already existed
    pub skipped: Vec<PathBuf>,

    /// Entries that could not be extracted
    pub failures: Vec<EntryFailure>,

    /// Nested archives unpacked by recursive extraction
    pub nested: Vec<PathBuf>,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Duration of the extraction operation (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExtractionReport {
    pub(crate) fn new(source: &Path, target_dir: &Path, plan: Vec<String>) -> Self {
        Self {
            source: source.to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            plan,
            ..Self::default()
        }
    }

    pub(crate) fn fail(&mut self, entry: &str, kind: FailureKind, message: impl ToString) {
        let message = message.to_string();
        tracing::warn!(entry, ?kind, %message, "entry not extracted");
        self.failures.push(EntryFailure {
            entry: entry.to_string(),
            kind,
            message,
        });
    }

    /// Fold the report of a nested archive into this one.
    pub(crate) fn absorb(&mut self, nested: ExtractionReport) {
        self.nested.push(nested.source);
        self.nested.extend(nested.nested);
        self.written.extend(nested.written);
        self.skipped.extend(nested.skipped);
        self.failures.extend(nested.failures);
        self.bytes_written += nested.bytes_written;
    }

    /// One line summary: counts of extracted, skipped and failed entries.
    pub fn summary(&self) -> String {
        format!(
            "{} extracted, {} skipped, {} failed",
            self.written.len(),
            self.skipped.len(),
            self.failures.len()
        )
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
