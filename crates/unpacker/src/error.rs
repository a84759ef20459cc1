//! Error types for planning and extraction.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type. Every variant is fatal for the input it was raised for;
/// per-entry problems are recorded in the report instead.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// Input file not found at the specified path.
    #[error("Input not found: {0}")]
    NotFound(PathBuf),

    /// Sniffing found no format at the outer layer.
    #[error("Not an archive: {0}")]
    UnrecognizedFormat(PathBuf),

    /// More nested layers than the configured limit.
    #[error("Too deeply nested: {path} exceeds the depth limit of {limit}")]
    TooDeeplyNested {
        /// File at which the limit was hit
        path: PathBuf,
        /// Configured depth limit
        limit: usize,
    },

    /// A compression or container layer could not be decoded.
    #[error("Corrupt {format} layer: {reason}")]
    CorruptLayer {
        /// Format identifier of the failing layer
        format: String,
        /// Decoder message
        reason: String,
    },

    /// No descriptor registered under this identifier.
    #[error("Unknown format identifier: {0}")]
    UnknownFormat(String),

    /// Invalid registry contents or option combination, detected before any work.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The archive requires a password but none was provided.
    #[error("Password required")]
    PasswordRequired,

    /// The provided password is incorrect.
    #[error("Invalid password")]
    InvalidPassword,

    /// The extraction size limit was exceeded.
    #[error("Size limit exceeded: {current} bytes > {limit} bytes")]
    SizeLimitExceeded {
        /// Bytes that would have been written
        current: u64,
        /// Configured size limit in bytes
        limit: u64,
    },

    /// The configured timeout elapsed.
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    /// An I/O error occurred outside of any single entry.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The extraction was cancelled by the user.
    #[error("Cancelled by user")]
    Cancelled,
}

impl UnpackError {
    /// Create a corrupt layer error
    pub fn corrupt(format: &str, reason: impl ToString) -> Self {
        Self::CorruptLayer {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that stop the whole run, not only the archive being unpacked,
    /// when raised from inside a nested archive.
    pub fn aborts_recursion(&self) -> bool {
        matches!(
            self,
            Self::TooDeeplyNested { .. }
                | Self::SizeLimitExceeded { .. }
                | Self::TimedOut(_)
                | Self::Cancelled
        )
    }
}

/// Path safety violations. These reject a single entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// Path traversal attempt detected (e.g., "../../../etc/passwd").
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Absolute path not allowed in archive entries.
    #[error("Absolute path not allowed: {0}")]
    AbsolutePath(String),

    /// Unsafe entry type detected (e.g., device node, or symlink when not allowed).
    #[error("Unsafe entry type: {0}")]
    UnsafeEntryType(String),

    /// Link target resolves outside of the target directory.
    #[error("Link target escapes the target directory: {link} -> {target}")]
    LinkEscape {
        /// Entry name of the link
        link: String,
        /// Stored link target
        target: String,
    },
}
