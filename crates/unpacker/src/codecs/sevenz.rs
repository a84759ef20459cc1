//! 7-Zip containers.

use super::{ArchiveReader, ContainerInput, Entry, EntrySink};
use crate::error::UnpackError;
use crate::safety::EntryType;
use crate::types::FailureKind;
use sevenz_rust2::{Password, SevenZReader};
use std::io::{self, Read};

pub struct SevenZip;

impl ArchiveReader for SevenZip {
    fn read_entries(
        &self,
        input: ContainerInput<'_>,
        password: Option<&str>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), UnpackError> {
        let ContainerInput::Path(path) = input else {
            return Err(UnpackError::corrupt("7z", "7z needs a seekable input"));
        };
        let pw = password.map(Password::from).unwrap_or_else(Password::empty);
        let mut archive =
            SevenZReader::open(path, pw).map_err(|e| map_error(e, password.is_some()))?;

        // The closure can only hand back the reader's own error type, so a
        // fatal sink error is parked here and the walk is stopped.
        let mut aborted: Option<UnpackError> = None;
        let walked = archive.for_each_entries(|entry, reader| {
            // Later folders are still offered after the walk was stopped.
            if aborted.is_some() {
                return Ok(false);
            }
            if entry.is_anti_item {
                return Ok(true);
            }
            let kind = if entry.is_directory() {
                EntryType::Directory
            } else {
                EntryType::File
            };
            let mut content = Watched::new(reader);
            let result = sink.accept(
                Entry::new(entry.name().to_string(), kind, &mut content).with_size(entry.size()),
            );
            if let Err(e) = result {
                aborted = Some(e);
                return Ok(false);
            }
            // Solid blocks are decoded sequentially; skipped entries must still be read.
            let seen_failure = content.failed;
            if let Err(e) = io::copy(&mut content, &mut io::sink()) {
                // A broken member is an entry failure; its siblings stay readable.
                if !seen_failure {
                    if let Err(e) = sink.reject(entry.name(), FailureKind::Corrupt, e.to_string()) {
                        aborted = Some(e);
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        });

        if let Some(e) = aborted {
            return Err(e);
        }
        walked.map_err(|e| map_error(e, password.is_some()))
    }
}

/// Remembers whether a read failed, so a broken member is reported once.
struct Watched<'r> {
    inner: &'r mut dyn Read,
    failed: bool,
}

impl<'r> Watched<'r> {
    fn new(inner: &'r mut dyn Read) -> Self {
        Self {
            inner,
            failed: false,
        }
    }
}

impl Read for Watched<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf);
        self.failed |= read.is_err();
        read
    }
}

/// Map sevenz errors to UnpackError with password detection.
fn map_error(e: sevenz_rust2::Error, has_password: bool) -> UnpackError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypted") {
        if has_password {
            UnpackError::InvalidPassword
        } else {
            UnpackError::PasswordRequired
        }
    } else {
        UnpackError::corrupt("7z", message)
    }
}
