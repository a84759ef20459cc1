//! Archive probing: layers and entries of a file, without writing anything.

use crate::codecs::{decode_chain, ContainerInput, Entry, EntrySink};
use crate::error::UnpackError;
use crate::extract::{materialize, Limits};
use crate::plan::LayerPlanner;
use crate::registry::FormatRegistry;
use crate::safety::EntryType;
use crate::types::{ArchiveEntry, ArchiveInfo, ExtractOptions, FailureKind};
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Probe a file to retrieve its decode plan and entry listing.
///
/// Containers are listed without decompressing their members where the
/// format allows it. A compressed plain payload is decoded once to learn its
/// size, without keeping any of it.
///
/// Decoding is bounded like extraction: bytes decoded count against the size
/// limit, and the timeout and `cancel_flag` are checked on every chunk.
///
/// # Arguments
///
/// * `path` - Path to the file
/// * `registry` - Known formats
/// * `options` - Depth limit, password, size limit and timeout are used
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist
/// - No format is recognized
/// - A layer is corrupted or needs a password
/// - The size limit or timeout is exceeded, or the probe is cancelled
pub fn probe_archive(
    path: &Path,
    registry: &FormatRegistry,
    options: &ExtractOptions,
    cancel_flag: &AtomicBool,
) -> Result<ArchiveInfo, UnpackError> {
    let limits = Limits::new(options, cancel_flag);
    if !path.exists() {
        return Err(UnpackError::NotFound(path.to_path_buf()));
    }
    let compressed_bytes = Some(std::fs::metadata(path)?.len());

    let plan = LayerPlanner::new(registry, options.depth_limit).plan_for(path)?;
    let Some(terminal) = plan.terminal() else {
        return Err(UnpackError::UnrecognizedFormat(path.to_path_buf()));
    };
    limits.check()?;

    let layers = plan.layers();
    let entry_list = match terminal.archive_reader() {
        None => {
            let mut decoded = limits.interruptible(decode_chain(path, layers)?);
            let size = limits.copy_layer(terminal.id(), &mut decoded, &mut io::sink())?;
            vec![ArchiveEntry {
                path: plan.output_name(),
                is_directory: false,
                size,
            }]
        }
        Some(reader) => {
            let streams = &layers[..layers.len() - 1];
            let password = options.password.as_deref();
            let mut sink = ListingSink::default();

            let listed = if streams.is_empty() {
                reader.read_entries(ContainerInput::Path(path), password, &mut sink)
            } else if reader.streaming() {
                let chain = limits.interruptible(decode_chain(path, streams)?);
                reader.read_entries(ContainerInput::Stream(Box::new(chain)), password, &mut sink)
            } else {
                let temp = materialize(path, streams, &limits)?;
                reader.read_entries(ContainerInput::Path(temp.path()), password, &mut sink)
            };
            listed.map_err(|e| limits.halted_or(e))?;
            sink.entries
        }
    };

    // Calculate statistics from entries
    let entries = entry_list.len() as u64;
    let uncompressed_estimate = if !entry_list.is_empty() {
        Some(entry_list.iter().map(|e| e.size).sum())
    } else {
        None
    };

    Ok(ArchiveInfo {
        layers: plan.ids(),
        entries,
        compressed_bytes,
        uncompressed_estimate,
        entry_list,
    })
}

/// Collects entry metadata and never reads content.
#[derive(Default)]
struct ListingSink {
    entries: Vec<ArchiveEntry>,
}

impl EntrySink for ListingSink {
    fn accept(&mut self, entry: Entry<'_>) -> Result<(), UnpackError> {
        self.entries.push(ArchiveEntry {
            is_directory: entry.kind == EntryType::Directory,
            size: entry.size,
            path: entry.name,
        });
        Ok(())
    }

    fn reject(&mut self, name: &str, kind: FailureKind, message: String) -> Result<(), UnpackError> {
        tracing::debug!(entry = name, ?kind, %message, "unreadable entry while listing");
        Ok(())
    }

    fn wants_content(&self) -> bool {
        false
    }
}
