//! Extraction orchestrator: runs a [`DecodePlan`] and writes the result to disk.
//!
//! Security features:
//! - Every entry name passes the path safety guard before a byte is written
//! - Files land in a temporary sibling first and are moved into place, so an
//!   interrupted run never leaves a partial file behind
//! - Size limit, timeout and cancellation are enforced while bytes are copied
//! - Links are only created when they stay inside the target directory

use crate::codecs::{decode_chain, ArchiveReader, ContainerInput, Entry, EntrySink};
use crate::error::{SecurityError, UnpackError};
use crate::plan::{DecodePlan, LayerPlanner};
use crate::registry::{FormatDescriptor, FormatRegistry};
use crate::safety::{self, EntryType};
use crate::types::{CollisionPolicy, Destination, ExtractOptions, ExtractionReport, FailureKind};
use crate::ProgressCallback;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const COPY_BUFFER: usize = 64 * 1024;

/// Prefix of in-flight files; they are renamed into place once complete.
const TEMP_PREFIX: &str = ".unpack-";

/// Execute `plan`, writing into `destination`.
///
/// Compression layers are decoded as a chain of streaming readers. A
/// container at the end of the chain has its entries extracted one by one in
/// container order; a compression layer at the end has its payload written as
/// a single file named after the input.
///
/// # Arguments
///
/// * `plan` - Non-empty decode plan for the input
/// * `destination` - Where the contents go
/// * `registry` - Formats used to plan nested archives
/// * `options` - Extraction options (collision policy, limits, recursion, etc.)
/// * `progress_cb` - Called after each entry; returning `false` cancels
/// * `cancel_flag` - Atomic flag to signal cancellation
///
/// # Errors
///
/// Entry-level problems are recorded in the returned report. Errors are
/// reserved for what stops the whole input: an undecodable outer layer, the
/// depth or size limit, a timeout, cancellation, or failing to create the
/// target directory.
pub fn execute(
    plan: &DecodePlan<'_>,
    destination: &Destination,
    registry: &FormatRegistry,
    options: &ExtractOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<ExtractionReport, UnpackError> {
    let mut run = Run {
        registry,
        options,
        progress_cb,
        limits: Limits::new(options, cancel_flag.as_ref()),
        total_bytes: 0,
    };
    run.unpack(plan, destination)
}

/// State shared by one input and every archive nested in it.
struct Run<'a> {
    registry: &'a FormatRegistry,
    options: &'a ExtractOptions,
    progress_cb: &'a ProgressCallback,
    limits: Limits<'a>,
    /// Bytes written so far, nested archives included
    total_bytes: u64,
}

/// Stop conditions of one input: cancellation, deadline and size limit.
#[derive(Clone, Copy)]
pub(crate) struct Limits<'a> {
    cancel_flag: &'a AtomicBool,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    size_limit: Option<u64>,
}

impl<'a> Limits<'a> {
    /// Start the clock for `options.timeout` now.
    pub(crate) fn new(options: &ExtractOptions, cancel_flag: &'a AtomicBool) -> Self {
        Self {
            cancel_flag,
            deadline: options.timeout.map(|t| Instant::now() + t),
            timeout: options.timeout,
            size_limit: options.size_limit_bytes,
        }
    }

    pub(crate) fn check(&self) -> Result<(), UnpackError> {
        if self.cancel_flag.load(Ordering::Relaxed) {
            return Err(UnpackError::Cancelled);
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout) {
            if Instant::now() >= deadline {
                return Err(UnpackError::TimedOut(timeout));
            }
        }
        Ok(())
    }

    /// A stopped run surfaces as read errors; report the stop instead.
    pub(crate) fn halted_or(&self, error: UnpackError) -> UnpackError {
        self.check().err().unwrap_or(error)
    }

    /// Wrap `inner` so its reads fail once the run is stopped.
    pub(crate) fn interruptible<R>(&self, inner: R) -> Interruptible<'a, R> {
        Interruptible::new(inner, self.cancel_flag, self.deadline)
    }

    /// Copy `reader` into `writer`, checking the stop conditions and the size
    /// limit (counted from `already`) on every chunk.
    pub(crate) fn copy_bounded(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        already: u64,
    ) -> Result<u64, EntryError> {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut copied = 0u64;
        loop {
            self.check().map_err(EntryError::Halt)?;
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(copied),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EntryError::Read(e)),
            };
            copied += n as u64;
            safety::check_size_limits(already + copied, self.size_limit)
                .map_err(EntryError::Halt)?;
            writer.write_all(&buf[..n]).map_err(EntryError::Write)?;
        }
    }

    /// Decode a whole layer into `writer`; any failure stops the input.
    pub(crate) fn copy_layer(
        &self,
        layer: &str,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<u64, UnpackError> {
        match self.copy_bounded(reader, writer, 0) {
            Ok(copied) => Ok(copied),
            Err(EntryError::Read(e)) => Err(self.halted_or(UnpackError::corrupt(layer, e))),
            Err(EntryError::Write(e)) => Err(UnpackError::Io(e)),
            Err(EntryError::Halt(e)) => Err(e),
            Err(other) => Err(UnpackError::corrupt(layer, other.into_failure()?.1)),
        }
    }
}

/// What happened to one entry that reached the disk stage.
enum Placement {
    Written { path: PathBuf, bytes: u64 },
    Skipped(PathBuf),
}

/// Why one entry could not be written.
pub(crate) enum EntryError {
    Unsafe(SecurityError),
    Unsupported(String),
    Invalid(String),
    Read(io::Error),
    Write(io::Error),
    /// Stops the whole input
    Halt(UnpackError),
}

impl EntryError {
    fn into_failure(self) -> Result<(FailureKind, String), UnpackError> {
        match self {
            EntryError::Unsafe(e) => Ok((FailureKind::UnsafePath, e.to_string())),
            EntryError::Unsupported(message) => Ok((FailureKind::Unsupported, message)),
            EntryError::Invalid(message) => Ok((FailureKind::Corrupt, message)),
            EntryError::Read(e) => Ok((FailureKind::Corrupt, e.to_string())),
            EntryError::Write(e) => Ok((FailureKind::Write, e.to_string())),
            EntryError::Halt(e) => Err(e),
        }
    }
}

impl<'a> Run<'a> {
    fn check(&self) -> Result<(), UnpackError> {
        self.limits.check()
    }

    fn halted_or(&self, error: UnpackError) -> UnpackError {
        self.limits.halted_or(error)
    }

    fn unpack(
        &mut self,
        plan: &DecodePlan<'_>,
        destination: &Destination,
    ) -> Result<ExtractionReport, UnpackError> {
        let start = Instant::now();
        let Some(terminal) = plan.terminal() else {
            return Err(UnpackError::UnrecognizedFormat(plan.source().to_path_buf()));
        };
        self.check()?;

        let target = target_dir(plan, destination);
        fs::create_dir_all(&target)?;
        let root = fs::canonicalize(&target)?;
        let mut report = ExtractionReport::new(plan.source(), &root, plan.ids());
        tracing::debug!(
            source = %plan.source().display(),
            target = %root.display(),
            plan = ?report.plan,
            "Extracting"
        );

        let mut fresh = Vec::new();
        match terminal.archive_reader() {
            Some(reader) => self.read_container(plan, reader, &root, &mut report, &mut fresh)?,
            None => self.write_payload(plan, terminal, &root, &mut report, &mut fresh)?,
        }

        if self.options.recursive {
            self.recurse(plan, &root, &fresh, &mut report)?;
        }

        report.duration = start.elapsed();
        tracing::debug!(source = %plan.source().display(), summary = %report.summary(), "Done");
        Ok(report)
    }

    fn read_container(
        &mut self,
        plan: &DecodePlan<'_>,
        reader: &dyn ArchiveReader,
        root: &Path,
        report: &mut ExtractionReport,
        fresh: &mut Vec<PathBuf>,
    ) -> Result<(), UnpackError> {
        let layers = plan.layers();
        let streams = &layers[..layers.len() - 1];
        let options = self.options;
        let password = options.password.as_deref();
        let limits = self.limits;

        // Keeps a materialized layer alive until the reader is done with it.
        let materialized = if !reader.streaming() && !streams.is_empty() {
            Some(materialize(plan.source(), streams, &limits)?)
        } else {
            None
        };

        let mut sink = ContainerSink {
            run: self,
            root,
            report,
            fresh,
            links: Vec::new(),
        };
        let result = match &materialized {
            Some(temp) => reader.read_entries(ContainerInput::Path(temp.path()), password, &mut sink),
            None if reader.streaming() => {
                let chain = decode_chain(plan.source(), streams)?;
                let input = limits.interruptible(chain);
                reader.read_entries(ContainerInput::Stream(Box::new(input)), password, &mut sink)
            }
            None => reader.read_entries(ContainerInput::Path(plan.source()), password, &mut sink),
        };
        sink.verify_links();

        result.map_err(|e| self.halted_or(e))
    }

    fn write_payload(
        &mut self,
        plan: &DecodePlan<'_>,
        terminal: &FormatDescriptor,
        root: &Path,
        report: &mut ExtractionReport,
        fresh: &mut Vec<PathBuf>,
    ) -> Result<(), UnpackError> {
        let name = plan.output_name();
        let dest = match safety::validate(&name, root) {
            Ok(dest) => dest,
            Err(e) => {
                report.fail(&name, FailureKind::UnsafePath, e);
                return Ok(());
            }
        };

        let chain = decode_chain(plan.source(), plan.layers())?;
        let mut input = self.limits.interruptible(chain);
        match self.write_file(root, &dest, &mut input, None) {
            Ok(placement) => {
                if let Some(path) = record(report, placement) {
                    fresh.push(path);
                }
            }
            // The payload is the whole layer: failing to decode it is fatal.
            Err(EntryError::Read(e)) => {
                return Err(self.halted_or(UnpackError::corrupt(terminal.id(), e)))
            }
            Err(other) => {
                let (kind, message) = other.into_failure()?;
                report.fail(&name, kind, message);
            }
        }

        if !(self.progress_cb)(&name, self.total_bytes, None) {
            return Err(UnpackError::Cancelled);
        }
        Ok(())
    }

    /// Unpack freshly written files that are archives themselves.
    fn recurse(
        &mut self,
        plan: &DecodePlan<'_>,
        root: &Path,
        fresh: &[PathBuf],
        report: &mut ExtractionReport,
    ) -> Result<(), UnpackError> {
        let depth = plan.depth() + plan.layers().len();
        let planner = LayerPlanner::new(self.registry, self.options.depth_limit);

        for file in fresh {
            self.check()?;
            let shown = file.strip_prefix(root).unwrap_or(file).display().to_string();
            let nested = match planner.plan_at_depth(file, depth) {
                Ok(inner) if inner.is_empty() => continue,
                Ok(inner) => {
                    tracing::debug!(archive = %file.display(), depth, "unpacking nested archive");
                    let parent = file.parent().unwrap_or(root).to_path_buf();
                    self.unpack(&inner, &Destination::Derived(parent))
                }
                Err(e) => Err(e),
            };
            match nested {
                Ok(nested) => report.absorb(nested),
                Err(e) if e.aborts_recursion() => return Err(e),
                Err(e) => report.fail(&shown, FailureKind::Nested, e),
            }
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        root: &Path,
        dest: &Path,
        reader: &mut dyn Read,
        mode: Option<u32>,
    ) -> Result<Placement, EntryError> {
        let parent = dest.parent().unwrap_or(root);
        fs::create_dir_all(parent).map_err(EntryError::Write)?;
        let Some(dest) = resolve_collision(dest, self.options.collision).map_err(EntryError::Write)?
        else {
            return Ok(Placement::Skipped(dest.to_path_buf()));
        };

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(EntryError::Write)?;
        let bytes = self
            .limits
            .copy_bounded(reader, temp.as_file_mut(), self.total_bytes)?;
        set_mode(temp.path(), safety::sanitize_mode(mode, default_permissions()))
            .map_err(EntryError::Write)?;

        let placement = self.place(temp, dest, bytes).map_err(EntryError::Write)?;
        if let Placement::Written { bytes, .. } = placement {
            self.total_bytes += bytes;
        }
        Ok(placement)
    }

    #[cfg(unix)]
    fn write_symlink(
        &mut self,
        root: &Path,
        dest: &Path,
        target: Option<&Path>,
    ) -> Result<Placement, EntryError> {
        let target =
            target.ok_or_else(|| EntryError::Invalid("symbolic link without a target".into()))?;
        let parent = dest.parent().unwrap_or(root);
        fs::create_dir_all(parent).map_err(EntryError::Write)?;

        // Resolve the target from where the link physically lives.
        let real_parent = fs::canonicalize(parent).map_err(EntryError::Write)?;
        let link = real_parent
            .strip_prefix(root)
            .map_err(|_| {
                EntryError::Unsafe(SecurityError::PathTraversal(dest.display().to_string()))
            })?
            .join(dest.file_name().unwrap_or_default());
        safety::validate_symlink_target(&link, target).map_err(EntryError::Unsafe)?;

        let Some(dest) = resolve_collision(dest, self.options.collision).map_err(EntryError::Write)?
        else {
            return Ok(Placement::Skipped(dest.to_path_buf()));
        };
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .make_in(parent, |path| std::os::unix::fs::symlink(target, path))
            .map_err(EntryError::Write)?;
        self.place(temp, dest, 0).map_err(EntryError::Write)
    }

    #[cfg(not(unix))]
    fn write_symlink(
        &mut self,
        _root: &Path,
        _dest: &Path,
        _target: Option<&Path>,
    ) -> Result<Placement, EntryError> {
        Err(EntryError::Unsupported(
            "symbolic links are not supported on this platform".into(),
        ))
    }

    fn write_hardlink(
        &mut self,
        root: &Path,
        dest: &Path,
        target: Option<&Path>,
    ) -> Result<Placement, EntryError> {
        let target = target.ok_or_else(|| EntryError::Invalid("hard link without a target".into()))?;
        let name = target.to_string_lossy();
        let relative = safety::validate_entry_path(&name).map_err(EntryError::Unsafe)?;
        let relative = strip_path_components(&relative, self.options.strip_components);
        let source = safety::resolve_within(root, &relative, &name).map_err(EntryError::Unsafe)?;

        // Only already extracted files can be linked to.
        let source = fs::canonicalize(&source)
            .map_err(|_| EntryError::Invalid(format!("link source {name} was not extracted")))?;
        if !source.starts_with(root) {
            return Err(EntryError::Unsafe(SecurityError::LinkEscape {
                link: dest.display().to_string(),
                target: name.into_owned(),
            }));
        }
        if !source.is_file() {
            return Err(EntryError::Invalid(format!("link source {name} is not a regular file")));
        }

        let parent = dest.parent().unwrap_or(root);
        fs::create_dir_all(parent).map_err(EntryError::Write)?;
        let Some(dest) = resolve_collision(dest, self.options.collision).map_err(EntryError::Write)?
        else {
            return Ok(Placement::Skipped(dest.to_path_buf()));
        };
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .make_in(parent, |path| fs::hard_link(&source, path))
            .map_err(EntryError::Write)?;
        self.place(temp, dest, 0).map_err(EntryError::Write)
    }

    /// Move a completed temporary file into place.
    fn place<F>(&self, temp: NamedTempFile<F>, dest: PathBuf, bytes: u64) -> io::Result<Placement> {
        let persisted = match self.options.collision {
            CollisionPolicy::Overwrite => temp.persist(&dest).map(drop),
            CollisionPolicy::Skip | CollisionPolicy::Rename => {
                temp.persist_noclobber(&dest).map(drop)
            }
        };
        match persisted {
            Ok(()) => Ok(Placement::Written { path: dest, bytes }),
            // The name was taken after we looked.
            Err(e)
                if e.error.kind() == io::ErrorKind::AlreadyExists
                    && self.options.collision == CollisionPolicy::Skip =>
            {
                Ok(Placement::Skipped(dest))
            }
            Err(e) => Err(e.error),
        }
    }
}

/// Writes the entries of one container below `root`.
struct ContainerSink<'s, 'a> {
    run: &'s mut Run<'a>,
    root: &'s Path,
    report: &'s mut ExtractionReport,
    fresh: &'s mut Vec<PathBuf>,
    links: Vec<PathBuf>,
}

impl ContainerSink<'_, '_> {
    fn extract(&mut self, entry: &mut Entry<'_>) -> Result<Option<Placement>, EntryError> {
        let options = self.run.options;
        if entry.kind == EntryType::Directory && safety::is_root_entry(&entry.name) {
            return Ok(None);
        }
        let relative = safety::validate_entry_path(&entry.name).map_err(EntryError::Unsafe)?;
        let relative = strip_path_components(&relative, options.strip_components);
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        let dest =
            safety::resolve_within(self.root, &relative, &entry.name).map_err(EntryError::Unsafe)?;
        safety::confine(self.root, &relative).map_err(EntryError::Unsafe)?;

        if !safety::is_safe_entry_type(entry.kind, options) {
            return Err(EntryError::Unsupported(
                SecurityError::UnsafeEntryType(format!("{:?} entry {}", entry.kind, entry.name))
                    .to_string(),
            ));
        }

        match entry.kind {
            EntryType::Directory => {
                fs::create_dir_all(&dest).map_err(EntryError::Write)?;
                Ok(None)
            }
            EntryType::File => {
                let mode = entry.mode;
                self.run
                    .write_file(self.root, &dest, entry.reader(), mode)
                    .map(Some)
            }
            EntryType::Symlink => self
                .run
                .write_symlink(self.root, &dest, entry.link_target.as_deref())
                .map(Some),
            EntryType::Hardlink => self
                .run
                .write_hardlink(self.root, &dest, entry.link_target.as_deref())
                .map(Some),
            EntryType::Other => Err(EntryError::Unsupported(format!(
                "special file {}",
                entry.name
            ))),
        }
    }

    /// Remove links that escape the target through links created after them.
    fn verify_links(&mut self) {
        for link in std::mem::take(&mut self.links) {
            // Dangling links point nowhere yet.
            let Ok(resolved) = fs::canonicalize(&link) else {
                continue;
            };
            if resolved.starts_with(self.root) {
                continue;
            }
            if let Err(e) = fs::remove_file(&link) {
                tracing::warn!(link = %link.display(), error = %e, "could not remove escaping link");
            }
            self.report.written.retain(|p| p != &link);
            let shown = link.strip_prefix(self.root).unwrap_or(&link).display().to_string();
            let error = SecurityError::LinkEscape {
                link: shown.clone(),
                target: resolved.display().to_string(),
            };
            self.report.fail(&shown, FailureKind::UnsafePath, error);
        }
    }
}

impl EntrySink for ContainerSink<'_, '_> {
    fn accept(&mut self, mut entry: Entry<'_>) -> Result<(), UnpackError> {
        self.run.check()?;
        tracing::trace!(entry = %entry.name, kind = ?entry.kind, "entry");

        match self.extract(&mut entry) {
            Ok(None) => {}
            Ok(Some(placement)) => {
                if let Some(path) = record(self.report, placement) {
                    match entry.kind {
                        EntryType::File => self.fresh.push(path),
                        EntryType::Symlink => self.links.push(path),
                        _ => {}
                    }
                }
            }
            Err(e) => {
                let (kind, message) = e.into_failure()?;
                // Read errors may just be the stop flag showing through the stream.
                self.run.check()?;
                self.report.fail(&entry.name, kind, message);
            }
        }

        if !(self.run.progress_cb)(&entry.name, self.run.total_bytes, Some(entry.size)) {
            return Err(UnpackError::Cancelled);
        }
        Ok(())
    }

    fn reject(&mut self, name: &str, kind: FailureKind, message: String) -> Result<(), UnpackError> {
        self.run.check()?;
        self.report.fail(name, kind, message);
        Ok(())
    }
}

/// Add a placement to the report; returns the path when something was written.
fn record(report: &mut ExtractionReport, placement: Placement) -> Option<PathBuf> {
    match placement {
        Placement::Written { path, bytes } => {
            report.bytes_written += bytes;
            report.written.push(path.clone());
            Some(path)
        }
        Placement::Skipped(path) => {
            report.skipped.push(path);
            None
        }
    }
}

/// Decode `streams` into a temporary file for readers that need to seek.
pub(crate) fn materialize(
    source: &Path,
    streams: &[&FormatDescriptor],
    limits: &Limits<'_>,
) -> Result<NamedTempFile, UnpackError> {
    let layer = streams.last().map_or("stream", |f| f.id());
    let chain = decode_chain(source, streams)?;
    let mut input = limits.interruptible(chain);
    let mut temp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile()?;
    tracing::debug!(layer, "materializing decoded layer");
    limits.copy_layer(layer, &mut input, temp.as_file_mut())?;
    Ok(temp)
}

/// Directory the contents of `plan` are written to.
fn target_dir(plan: &DecodePlan<'_>, destination: &Destination) -> PathBuf {
    match destination {
        Destination::Exact(dir) => dir.clone(),
        Destination::Derived(base) if plan.is_container() => {
            let name = plan.output_name();
            let dir = base.join(&name);
            if dir.exists() && !dir.is_dir() {
                base.join(format!("{name}.unpacked"))
            } else {
                dir
            }
        }
        Destination::Derived(base) => base.clone(),
    }
}

/// Reader that fails once the run is cancelled or past its deadline.
pub(crate) struct Interruptible<'f, R> {
    inner: R,
    cancel_flag: &'f AtomicBool,
    deadline: Option<Instant>,
}

impl<'f, R> Interruptible<'f, R> {
    fn new(inner: R, cancel_flag: &'f AtomicBool, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            cancel_flag,
            deadline,
        }
    }
}

impl<R: Read> Read for Interruptible<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if expired || self.cancel_flag.load(Ordering::Relaxed) {
            return Err(io::Error::other("extraction stopped"));
        }
        self.inner.read(buf)
    }
}

/// Strip leading path components from a path.
fn strip_path_components(path: &Path, count: u32) -> PathBuf {
    if count == 0 {
        return path.to_path_buf();
    }

    let components: Vec<_> = path.components().collect();
    let skip = count as usize;

    if skip >= components.len() {
        return PathBuf::new();
    }

    components[skip..].iter().collect()
}

/// Whether anything, a dangling link included, occupies `path`.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Destination for an entry under the collision policy; `None` means skip.
fn resolve_collision(path: &Path, policy: CollisionPolicy) -> io::Result<Option<PathBuf>> {
    match policy {
        CollisionPolicy::Overwrite => Ok(Some(path.to_path_buf())),
        CollisionPolicy::Skip => {
            if occupied(path) {
                Ok(None)
            } else {
                Ok(Some(path.to_path_buf()))
            }
        }
        CollisionPolicy::Rename => {
            if !occupied(path) {
                return Ok(Some(path.to_path_buf()));
            }

            let parent = path.parent().unwrap_or(Path::new(""));
            let file_stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let extension = path.extension().map(|s| s.to_string_lossy().into_owned());

            // Try appending (1), (2), etc.
            for i in 1..1000 {
                let new_name = match &extension {
                    Some(ext) => format!("{} ({}).{}", file_stem, i, ext),
                    None => format!("{} ({})", file_stem, i),
                };

                let new_path = parent.join(new_name);
                if !occupied(&new_path) {
                    return Ok(Some(new_path));
                }
            }

            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Could not find unique filename",
            ))
        }
    }
}

/// Permission bits the invoking user gets for new files, learned once by
/// creating a file that asks for everything.
fn default_permissions() -> u32 {
    static PERMISSIONS: OnceLock<u32> = OnceLock::new();
    *PERMISSIONS.get_or_init(|| probe_permissions().unwrap_or(0o755))
}

#[cfg(unix)]
fn probe_permissions() -> io::Result<u32> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o777)
        .open(dir.path().join("mask"))?;
    Ok(file.metadata()?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn probe_permissions() -> io::Result<u32> {
    Ok(0o755)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
