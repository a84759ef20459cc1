//! Layer planning: which decoders to apply to a file, outer to inner.

use crate::codecs::{decode_chain, read_prefix};
use crate::error::UnpackError;
use crate::registry::{FormatDescriptor, FormatRegistry, LayerKind};
use crate::sniff::{Sniffer, SNIFF_LEN};
use std::path::{Path, PathBuf};

/// Ordered layers of one input, outer to inner.
///
/// Every layer but the last is a compression layer. The last one is either a
/// container or a compression layer whose payload is plain data.
#[derive(Debug, Clone)]
pub struct DecodePlan<'r> {
    source: PathBuf,
    layers: Vec<&'r FormatDescriptor>,
    derived_name: Option<String>,
    depth: usize,
}

impl<'r> DecodePlan<'r> {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn layers(&self) -> &[&'r FormatDescriptor] {
        &self.layers
    }

    pub fn ids(&self) -> Vec<String> {
        self.layers.iter().map(|f| f.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn terminal(&self) -> Option<&'r FormatDescriptor> {
        self.layers.last().copied()
    }

    pub fn is_container(&self) -> bool {
        self.terminal()
            .is_some_and(|f| f.kind() == LayerKind::Container)
    }

    /// Nesting depth consumed before this plan, by the archives it was found in.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Name of what the plan produces: the payload file of a compression-only
    /// plan, or the directory a container unpacks into.
    ///
    /// Format extensions are stripped from the input name (`src.tar.gz` ->
    /// `src`, `notes.txt.gz` -> `notes.txt`). When none could be stripped the
    /// input name gets an `.unpacked` suffix.
    pub fn output_name(&self) -> String {
        match &self.derived_name {
            Some(name) => name.clone(),
            None => format!("{}.unpacked", file_name(&self.source)),
        }
    }
}

/// Builds [`DecodePlan`]s by sniffing each layer through the decoders of the
/// layers before it.
pub struct LayerPlanner<'r> {
    registry: &'r FormatRegistry,
    depth_limit: usize,
}

impl<'r> LayerPlanner<'r> {
    pub fn new(registry: &'r FormatRegistry, depth_limit: usize) -> Self {
        Self {
            registry,
            depth_limit,
        }
    }

    /// Plan a top-level input. An unrecognized file yields an empty plan.
    pub fn plan_for(&self, path: &Path) -> Result<DecodePlan<'r>, UnpackError> {
        self.plan_at_depth(path, 0)
    }

    /// Plan a file found `depth` layers deep inside other archives.
    ///
    /// # Errors
    ///
    /// - [`UnpackError::NotFound`] if `path` does not exist
    /// - [`UnpackError::TooDeeplyNested`] if the layers found would exceed the depth limit
    /// - [`UnpackError::CorruptLayer`] if a compression layer fails while its prefix is decoded
    pub fn plan_at_depth(&self, path: &Path, depth: usize) -> Result<DecodePlan<'r>, UnpackError> {
        let sniffer = Sniffer::new(self.registry);
        let mut layers: Vec<&'r FormatDescriptor> = Vec::new();
        let mut name = file_name(path);
        let mut derived_name = None;

        loop {
            // Only the prefix of each virtual layer is decoded.
            let mut reader = decode_chain(path, &layers)?;
            let prefix = read_prefix(&mut reader, SNIFF_LEN).map_err(|e| match layers.last() {
                Some(layer) => UnpackError::corrupt(layer.id(), e),
                None => UnpackError::Io(e),
            })?;

            let Some(format) = sniffer.best(&prefix, &name) else {
                break;
            };
            if depth + layers.len() + 1 > self.depth_limit {
                return Err(UnpackError::TooDeeplyNested {
                    path: path.to_path_buf(),
                    limit: self.depth_limit,
                });
            }

            tracing::trace!(path = %path.display(), layer = format.id(), "layer recognized");
            layers.push(format);
            if let Some(stripped) = format.strip_extension(&name) {
                name = stripped.clone();
                derived_name = Some(stripped);
            }
            if format.kind() == LayerKind::Container {
                break;
            }
        }

        Ok(DecodePlan {
            source: path.to_path_buf(),
            layers,
            derived_name,
            depth,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
