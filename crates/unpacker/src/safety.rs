//! Security and safety checks for archive extraction.
//!
//! This module validates archive entry paths and link targets to prevent
//! attacks like zip-slip (path traversal), and decides which entry types and
//! permission bits may reach the disk.

use crate::error::{SecurityError, UnpackError};
use crate::types::ExtractOptions;
use std::path::{Component, Path, PathBuf};

/// Entry type for filtering special file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Hard link
    Hardlink,
    /// Other special file types (device, socket, etc.)
    Other,
}

/// Validates and normalizes an archive entry name to prevent security vulnerabilities.
///
/// This function performs the following checks:
/// - Treats `\` as a separator, so Windows-style names cannot smuggle `..`
/// - Rejects absolute paths and drive prefixes
/// - Rejects paths containing ".." components (path traversal)
/// - Rejects NUL bytes
/// - Normalizes the path to remove redundant separators and "." components
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use unpacker::safety::validate_entry_path;
///
/// // Valid relative path
/// let safe_path = validate_entry_path("dir/file.txt").unwrap();
/// assert_eq!(safe_path, Path::new("dir/file.txt"));
///
/// // Path traversal attempt - rejected
/// assert!(validate_entry_path("../../etc/passwd").is_err());
///
/// // Absolute path - rejected
/// assert!(validate_entry_path("/etc/passwd").is_err());
/// ```
pub fn validate_entry_path(name: &str) -> Result<PathBuf, SecurityError> {
    if name.contains('\0') {
        return Err(SecurityError::PathTraversal(format!(
            "Path contains a NUL byte: {}",
            name.escape_debug()
        )));
    }

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(SecurityError::AbsolutePath(name.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => continue,
            Component::ParentDir => {
                return Err(SecurityError::PathTraversal(format!(
                    "Path contains '..' component: {}",
                    name
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SecurityError::AbsolutePath(name.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(SecurityError::PathTraversal(
            "Path normalizes to empty".to_string(),
        ));
    }

    Ok(normalized)
}

/// `C:` style prefixes, meaningful to Windows even when we run elsewhere.
fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Whether `name` denotes the archive root itself (`.`, `./`, `./.`).
///
/// `tar -C dir .` stores such an entry first. It names the target directory,
/// so there is nothing to create for it.
pub fn is_root_entry(name: &str) -> bool {
    let unified = name.replace('\\', "/");
    !unified.is_empty()
        && !unified.starts_with('/')
        && unified.split('/').all(|part| part.is_empty() || part == ".")
}

/// Resolve an entry name against `target_dir`.
///
/// Returns the absolute destination, guaranteed to lie under `target_dir`.
pub fn validate(name: &str, target_dir: &Path) -> Result<PathBuf, SecurityError> {
    let relative = validate_entry_path(name)?;
    resolve_within(target_dir, &relative, name)
}

/// Join an already validated relative path to `root` and check the lexical result.
pub fn resolve_within(root: &Path, relative: &Path, name: &str) -> Result<PathBuf, SecurityError> {
    let joined = normalize(&root.join(relative));
    if !joined.starts_with(normalize(root)) || joined == normalize(root) {
        return Err(SecurityError::PathTraversal(format!(
            "Path resolves outside the target directory: {}",
            name
        )));
    }
    Ok(joined)
}

/// Validate a symbolic link target. `link` is the link's own validated path
/// relative to the target root; the target is resolved from the link's parent.
pub fn validate_symlink_target(link: &Path, target: &Path) -> Result<(), SecurityError> {
    let escape = || SecurityError::LinkEscape {
        link: link.display().to_string(),
        target: target.display().to_string(),
    };

    let unified = target.to_string_lossy().replace('\\', "/");
    if unified.is_empty() || unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(escape());
    }

    // Walk from the link's directory, never rising above the root.
    let mut depth: Vec<&std::ffi::OsStr> = link
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => depth.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth.pop().is_none() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(())
}

/// Check that every existing ancestor of `root/relative` resolves inside `root`.
///
/// Lexical checks cannot see symlinks already present on disk; this one
/// follows them before any directory is created through them.
pub fn confine(root: &Path, relative: &Path) -> Result<(), SecurityError> {
    let mut current = root.to_path_buf();
    let parents: Vec<_> = relative
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();

    for component in parents {
        current.push(component);
        match std::fs::canonicalize(&current) {
            Ok(real) if real.starts_with(root) => continue,
            Ok(_) => {
                return Err(SecurityError::PathTraversal(format!(
                    "Parent directory escapes the target through a link: {}",
                    current.display()
                )))
            }
            // Nothing exists from here on, so nothing can redirect us.
            Err(_) => break,
        }
    }
    Ok(())
}

/// Checks if the current extracted size exceeds the configured limit.
///
/// # Examples
///
/// ```
/// use unpacker::safety::check_size_limits;
///
/// // Within limit
/// assert!(check_size_limits(1000, Some(2000)).is_ok());
///
/// // Exceeds limit
/// assert!(check_size_limits(3000, Some(2000)).is_err());
///
/// // No limit
/// assert!(check_size_limits(999_999_999, None).is_ok());
/// ```
pub fn check_size_limits(current_bytes: u64, limit: Option<u64>) -> Result<(), UnpackError> {
    if let Some(max_bytes) = limit {
        if current_bytes > max_bytes {
            return Err(UnpackError::SizeLimitExceeded {
                current: current_bytes,
                limit: max_bytes,
            });
        }
    }
    Ok(())
}

/// Determines if an entry type may be extracted under the given options.
///
/// Other special file types (devices, sockets, etc.) are always blocked.
///
/// # Examples
///
/// ```
/// use unpacker::safety::{is_safe_entry_type, EntryType};
/// use unpacker::ExtractOptions;
///
/// let options = ExtractOptions::default();
/// assert!(is_safe_entry_type(EntryType::File, &options));
/// assert!(is_safe_entry_type(EntryType::Symlink, &options));
/// assert!(!is_safe_entry_type(EntryType::Other, &options));
///
/// let mut no_links = ExtractOptions::default();
/// no_links.allow_symlinks = false;
/// assert!(!is_safe_entry_type(EntryType::Symlink, &no_links));
/// ```
pub fn is_safe_entry_type(entry_type: EntryType, options: &ExtractOptions) -> bool {
    match entry_type {
        EntryType::File | EntryType::Directory => true,
        EntryType::Symlink => options.allow_symlinks,
        EntryType::Hardlink => options.allow_hardlinks,
        EntryType::Other => false, // Always block special files
    }
}

/// Permission bits for an extracted file.
///
/// Stored bits are limited to `0o777` (no setuid, setgid or sticky) and to
/// what the user's creation mask allows; owner read is always kept. Without
/// stored bits the user's default for new files applies.
pub fn sanitize_mode(stored: Option<u32>, creation_mask: u32) -> u32 {
    let allowed = 0o777 & creation_mask;
    match stored {
        Some(mode) => (mode & allowed) | 0o400,
        None => (0o666 & allowed) | 0o400,
    }
}

/// Lexically normalize a path: drop "." and fold "..".
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}
