//! # Unpacker
//!
//! A generic archive unpacker: give it any file and it works out which
//! compression and archive formats were used, in which order, and extracts
//! the contents with one uniform set of policies.
//!
//! Formats are recognized by content, not by file name. Layered files such as
//! `.tar.gz` are planned as a chain (`gzip` then `tar`) and decoded as
//! streams, without writing the intermediate layers to disk where the inner
//! format allows it.
//!
//! ## Supported Formats
//!
//! - gzip, bzip2, xz, lzma, zstd (compression layers)
//! - TAR, ZIP, 7-Zip, RAR (read-only) containers
//!
//! ## Safety
//!
//! - Entry paths are validated to prevent zip-slip (path traversal)
//! - Links must resolve inside the target directory
//! - Permission bits never grant more than the user's default
//! - Total size limit, timeout and cancellation
//! - Files appear atomically: nothing is left half written
//!
//! ## Example
//!
//! ```rust,no_run
//! use unpacker::{unpack, Destination, ExtractOptions, FormatRegistry};
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = FormatRegistry::builtin()?;
//! let options = ExtractOptions::default();
//! let cancel_flag = Arc::new(AtomicBool::new(false));
//! let progress_cb = |entry: &str, bytes: u64, _size: Option<u64>| {
//!     println!("Extracting: {} ({} bytes so far)", entry, bytes);
//!     true // Continue extraction
//! };
//!
//! let report = unpack(
//!     Path::new("release.tar.gz"),
//!     &Destination::Exact(PathBuf::from("output")),
//!     &registry,
//!     &options,
//!     &progress_cb,
//!     cancel_flag,
//! )?;
//!
//! println!("{}: {}", report.plan.join("+"), report.summary());
//! # Ok(())
//! # }
//! ```

pub mod codecs;
pub mod error;
pub mod extract;
pub mod plan;
pub mod probe;
pub mod registry;
pub mod safety;
pub mod sniff;
pub mod types;

// Re-export main types
pub use error::{SecurityError, UnpackError};
pub use plan::{DecodePlan, LayerPlanner};
pub use registry::{FormatDescriptor, FormatRegistry, LayerKind};
pub use safety::EntryType;
pub use sniff::Sniffer;
pub use types::{
    ArchiveEntry, ArchiveInfo, CollisionPolicy, Destination, EntryFailure, ExtractOptions,
    ExtractionReport, FailureKind, DEFAULT_DEPTH_LIMIT,
};

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Type alias for progress callback functions.
///
/// The callback receives:
/// - `entry`: The entry just processed
/// - `bytes_written`: Number of bytes written so far for this input
/// - `entry_size`: Stored size of the entry, when known
///
/// Returns `true` to continue extraction, `false` to cancel.
pub type ProgressCallback = dyn Fn(&str, u64, Option<u64>) -> bool + Send + Sync;

/// Compute the decode plan for a file.
///
/// An unrecognized file yields an empty plan rather than an error.
pub fn plan<'r>(
    path: &Path,
    registry: &'r FormatRegistry,
    options: &ExtractOptions,
) -> Result<DecodePlan<'r>, UnpackError> {
    tracing::debug!(path = %path.display(), "Sniffing");
    LayerPlanner::new(registry, options.depth_limit).plan_for(path)
}

/// Probe a file to list its layers and entries without extracting.
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist
/// - No format is recognized
/// - A layer is corrupted or needs a password
/// - The size limit or timeout is exceeded, or `cancel_flag` is set
pub fn probe(
    path: &Path,
    registry: &FormatRegistry,
    options: &ExtractOptions,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ArchiveInfo, UnpackError> {
    probe::probe_archive(path, registry, options, &cancel_flag)
}

/// Plan and extract one input file.
///
/// # Arguments
///
/// * `path` - Path to the input file
/// * `destination` - Exact target directory, or a base to derive one from
/// * `registry` - Known formats
/// * `options` - Extraction options (collision policy, limits, recursion, etc.)
/// * `progress_cb` - Callback function for progress updates
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Errors
///
/// Returns an error if:
/// - The input doesn't exist or no format is recognized
/// - The outer layer is corrupted, or a password is required or wrong
/// - Nesting exceeds the depth limit
/// - The size limit or timeout is exceeded
/// - Extraction is cancelled
///
/// Problems with single entries do not fail the call; they are listed in
/// [`ExtractionReport::failures`].
pub fn unpack(
    path: &Path,
    destination: &Destination,
    registry: &FormatRegistry,
    options: &ExtractOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractionReport, UnpackError> {
    let plan = plan(path, registry, options)?;
    tracing::debug!(path = %path.display(), plan = ?plan.ids(), "Planning");
    if plan.is_empty() {
        return Err(UnpackError::UnrecognizedFormat(path.to_path_buf()));
    }
    extract::execute(&plan, destination, registry, options, progress_cb, cancel_flag)
}

/// [`unpack`] on the blocking thread pool, for use from async code.
pub async fn unpack_async(
    path: PathBuf,
    destination: Destination,
    registry: Arc<FormatRegistry>,
    options: ExtractOptions,
    progress_cb: Arc<ProgressCallback>,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractionReport, UnpackError> {
    tokio::task::spawn_blocking(move || {
        unpack(
            &path,
            &destination,
            &registry,
            &options,
            progress_cb.as_ref(),
            cancel_flag,
        )
    })
    .await
    .map_err(|e| UnpackError::Io(std::io::Error::other(e)))?
}
