//! zip containers (and zip-based formats such as jar, apk, whl).

use super::{ArchiveReader, ContainerInput, Entry, EntrySink};
use crate::error::UnpackError;
use crate::safety::EntryType;
use crate::types::FailureKind;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Symlink targets are stored as entry content; anything longer is not a path.
const MAX_LINK_TARGET: u64 = 4096;

pub struct Zip;

impl ArchiveReader for Zip {
    fn read_entries(
        &self,
        input: ContainerInput<'_>,
        password: Option<&str>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), UnpackError> {
        let ContainerInput::Path(path) = input else {
            return Err(UnpackError::corrupt("zip", "zip needs a seekable input"));
        };
        let file = BufReader::new(File::open(path)?);
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| UnpackError::corrupt("zip", e))?;

        for i in 0..archive.len() {
            // Metadata first, without decrypting or decompressing anything.
            let (name, is_dir, mode, size) = match archive.by_index_raw(i) {
                Ok(raw) => (
                    raw.name().to_string(),
                    raw.is_dir(),
                    raw.unix_mode(),
                    raw.size(),
                ),
                Err(e) => {
                    sink.reject(&format!("#{i}"), FailureKind::Corrupt, e.to_string())?;
                    continue;
                }
            };
            let is_symlink = mode.is_some_and(|m| m & S_IFMT == S_IFLNK);

            if is_dir {
                let mut empty = io::empty();
                sink.accept(Entry::new(name, EntryType::Directory, &mut empty).with_mode(mode))?;
                continue;
            }

            if !sink.wants_content() {
                let mut empty = io::empty();
                let kind = if is_symlink { EntryType::Symlink } else { EntryType::File };
                sink.accept(Entry::new(name, kind, &mut empty).with_size(size))?;
                continue;
            }

            let opened = match password {
                Some(pw) => archive.by_index_decrypt(i, pw.as_bytes()),
                None => archive.by_index(i),
            };
            let mut member = match opened {
                Ok(member) => member,
                Err(e) => {
                    let message = e.to_string();
                    let kind = classify(&message);
                    sink.reject(&name, kind, message)?;
                    continue;
                }
            };

            if is_symlink {
                let mut target = String::new();
                if let Err(e) = (&mut member).take(MAX_LINK_TARGET).read_to_string(&mut target) {
                    sink.reject(&name, FailureKind::Corrupt, e.to_string())?;
                    continue;
                }
                let mut empty = io::empty();
                sink.accept(
                    Entry::new(name, EntryType::Symlink, &mut empty)
                        .with_link_target(PathBuf::from(target)),
                )?;
                continue;
            }

            sink.accept(
                Entry::new(name, EntryType::File, &mut member)
                    .with_size(size)
                    .with_mode(mode),
            )?;
        }
        Ok(())
    }
}

/// Map a zip error message to a failure kind.
fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if lower.contains("password")
        || lower.contains("encrypted")
        || lower.contains("unsupported")
    {
        FailureKind::Unsupported
    } else {
        FailureKind::Corrupt
    }
}
