//! RAR containers through the unrar library (read-only).
//!
//! unrar can only write members to a path, so each file is staged in a
//! private temporary directory and handed to the sink from there.

use super::{ArchiveReader, ContainerInput, Entry, EntrySink};
use crate::error::UnpackError;
use crate::safety::EntryType;
use crate::types::FailureKind;
use std::fs::{self, File};
use std::io;
use unrar::Archive;

pub struct Rar;

impl ArchiveReader for Rar {
    fn read_entries(
        &self,
        input: ContainerInput<'_>,
        password: Option<&str>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), UnpackError> {
        let ContainerInput::Path(path) = input else {
            return Err(UnpackError::corrupt("rar", "rar needs a seekable input"));
        };

        let archive = match password {
            Some(pw) => Archive::with_password(path, pw.as_bytes()),
            None => Archive::new(path),
        };
        let open_archive = archive
            .open_for_processing()
            .map_err(|e| map_error(e, password.is_some()))?;

        let staging = tempfile::Builder::new().prefix("unpack-rar-").tempdir()?;
        let mut current = Some(open_archive);
        let mut index = 0usize;

        while let Some(arch) = current.take() {
            let header = match arch.read_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => return Err(map_error(e, password.is_some())),
            };
            let entry = header.entry();
            let name = entry.filename.to_string_lossy().to_string();
            let size = entry.unpacked_size;

            if entry.is_directory() || !sink.wants_content() {
                let kind = if entry.is_directory() {
                    EntryType::Directory
                } else {
                    EntryType::File
                };
                current = Some(
                    header
                        .skip()
                        .map_err(|e| map_error(e, password.is_some()))?,
                );
                let mut empty = io::empty();
                sink.accept(Entry::new(name, kind, &mut empty).with_size(size))?;
                continue;
            }

            index += 1;
            let staged = staging.path().join(index.to_string());
            match header.extract_to(&staged) {
                Ok(next) => current = Some(next),
                Err(e) => {
                    // The cursor is consumed on failure; nothing after this member is reachable.
                    sink.reject(&name, FailureKind::Corrupt, e.to_string())?;
                    break;
                }
            }

            let mut file = File::open(&staged)?;
            sink.accept(Entry::new(name, EntryType::File, &mut file).with_size(size))?;
            drop(file);
            fs::remove_file(&staged)?;
        }
        Ok(())
    }
}

/// Map unrar errors to UnpackError with password detection.
fn map_error(e: unrar::error::UnrarError, has_password: bool) -> UnpackError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypted") {
        if has_password {
            UnpackError::InvalidPassword
        } else {
            UnpackError::PasswordRequired
        }
    } else {
        UnpackError::corrupt("rar", message)
    }
}
