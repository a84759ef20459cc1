//! tar containers, read straight from the decoded stream.

use super::{ArchiveReader, ContainerInput, Entry, EntrySink};
use crate::error::UnpackError;
use crate::safety::EntryType;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tar::EntryType as TarType;

pub struct Tar;

impl ArchiveReader for Tar {
    fn streaming(&self) -> bool {
        true
    }

    fn read_entries(
        &self,
        input: ContainerInput<'_>,
        _password: Option<&str>,
        sink: &mut dyn EntrySink,
    ) -> Result<(), UnpackError> {
        let reader: Box<dyn Read + '_> = match input {
            ContainerInput::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            ContainerInput::Stream(stream) => stream,
        };
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| UnpackError::corrupt("tar", e))?;

        for entry in entries {
            // A broken header leaves no way to find the next member.
            let mut entry = entry.map_err(|e| UnpackError::corrupt("tar", e))?;
            let header = entry.header();
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let mode = header.mode().ok();
            let size = entry.size();

            let kind = match header.entry_type() {
                TarType::Regular | TarType::Continuous => EntryType::File,
                TarType::Directory => EntryType::Directory,
                TarType::Symlink => EntryType::Symlink,
                TarType::Link => EntryType::Hardlink,
                _ => EntryType::Other,
            };
            let link_target = entry
                .link_name_bytes()
                .map(|b| PathBuf::from(String::from_utf8_lossy(&b).into_owned()));

            let mut out = Entry::new(name, kind, &mut entry)
                .with_size(size)
                .with_mode(mode);
            if let Some(target) = link_target {
                out = out.with_link_target(target);
            }
            sink.accept(out)?;
        }
        Ok(())
    }
}

/// A 512-byte block that parses as a tar header: stored checksum matches
/// and the name field is not empty.
pub(crate) fn is_tar_header(prefix: &[u8]) -> bool {
    if prefix.len() < 512 || prefix[0] == 0 {
        return false;
    }
    let field = &prefix[148..156];
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| (b'0'..=b'7').contains(b))
        .collect();
    if digits.is_empty() {
        return false;
    }
    let stored = digits
        .iter()
        .fold(0u32, |acc, d| acc.wrapping_mul(8).wrapping_add(u32::from(d - b'0')));

    let computed: u32 = prefix[..512]
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if (148..156).contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum();
    stored == computed
}
