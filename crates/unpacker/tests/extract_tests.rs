use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use unpacker::{
    unpack, CollisionPolicy, Destination, ExtractOptions, ExtractionReport, FailureKind,
    FormatRegistry, UnpackError,
};
use walkdir::WalkDir;

/// Helper to create a ZIP archive from in-memory files
fn create_test_zip(path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    use zip::write::{SimpleFileOptions, ZipWriter};

    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    for (name, content) in files {
        zip.start_file(*name, SimpleFileOptions::default())?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

/// Helper to create a TAR.GZ archive from in-memory files
fn create_test_tar_gz(path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let file = File::create(path)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, name, &content[..])?;
    }
    tar.into_inner()?.finish()?;
    Ok(())
}

/// A raw tar member. Names and link targets are written as-is, so unsafe
/// ones survive (the tar builder would refuse them).
struct RawEntry<'a> {
    name: &'a str,
    kind: tar::EntryType,
    link: Option<&'a str>,
    mode: u32,
    data: &'a [u8],
}

impl<'a> RawEntry<'a> {
    fn file(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            kind: tar::EntryType::Regular,
            link: None,
            mode: 0o644,
            data,
        }
    }

    fn link(name: &'a str, kind: tar::EntryType, target: &'a str) -> Self {
        Self {
            name,
            kind,
            link: Some(target),
            mode: 0o777,
            data: b"",
        }
    }
}

fn create_raw_tar(path: &Path, entries: &[RawEntry<'_>]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    for entry in entries {
        let mut header = tar::Header::new_old();
        {
            let old = header.as_old_mut();
            old.name[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
            if let Some(link) = entry.link {
                old.linkname[..link.len()].copy_from_slice(link.as_bytes());
            }
        }
        header.set_entry_type(entry.kind);
        header.set_size(entry.data.len() as u64);
        header.set_mode(entry.mode);
        header.set_cksum();
        builder.append(&header, entry.data).unwrap();
    }
    builder.finish().unwrap();
}

fn run(archive: &Path, destination: &Destination, options: &ExtractOptions) -> Result<ExtractionReport, UnpackError> {
    let registry = FormatRegistry::builtin().unwrap();
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let progress_cb = |_entry: &str, _bytes: u64, _size: Option<u64>| true;
    unpack(archive, destination, &registry, options, &progress_cb, cancel_flag)
}

fn run_into(archive: &Path, out: &Path, options: &ExtractOptions) -> Result<ExtractionReport, UnpackError> {
    run(archive, &Destination::Exact(out.to_path_buf()), options)
}

/// Relative path -> content for every regular file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn no_temp_leftovers(root: &Path) -> bool {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .all(|e| !e.file_name().to_string_lossy().starts_with(".unpack-"))
}

const SAMPLE: &[(&str, &[u8])] = &[
    ("test.txt", b"Hello, World!"),
    ("subdir/nested.txt", b"Nested content"),
    ("data.json", b"{\"key\": \"value\"}"),
];

#[test]
fn test_roundtrip_zip() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert_eq!(report.plan, ["zip"]);
    assert_eq!(report.written.len(), 3);
    assert!(report.failures.is_empty());
    let expected: BTreeMap<PathBuf, Vec<u8>> = SAMPLE
        .iter()
        .map(|(name, content)| (PathBuf::from(name), content.to_vec()))
        .collect();
    assert_eq!(snapshot(&output_dir), expected);
}

#[test]
fn test_roundtrip_tar_gz_many_entries() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("many.tar.gz");
    let output_dir = temp_dir.path().join("output");

    let contents: Vec<(String, Vec<u8>)> = (0..50)
        .map(|i| (format!("dir{}/file{}.bin", i % 5, i), vec![i as u8; 1000 + i * 37]))
        .collect();
    let files: Vec<(&str, &[u8])> = contents
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_slice()))
        .collect();
    create_test_tar_gz(&archive_path, &files).unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert_eq!(report.plan, ["gzip", "tar"]);
    assert_eq!(report.written.len(), 50);
    let total: u64 = contents.iter().map(|(_, c)| c.len() as u64).sum();
    assert_eq!(report.bytes_written, total);
    let expected: BTreeMap<PathBuf, Vec<u8>> = contents
        .into_iter()
        .map(|(n, c)| (PathBuf::from(n), c))
        .collect();
    assert_eq!(snapshot(&output_dir), expected);
}

#[test]
fn test_roundtrip_7z() {
    use sevenz_rust2::SevenZWriter;

    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.7z");
    let output_dir = temp_dir.path().join("output");

    let mut sz = SevenZWriter::new(File::create(&archive_path).unwrap()).unwrap();
    for (name, content) in SAMPLE {
        sz.push_archive_entry(
            sevenz_rust2::SevenZArchiveEntry::from_path(Path::new(name), name.to_string()),
            Some(std::io::Cursor::new(content)),
        )
        .unwrap();
    }
    sz.finish().unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(report.plan, ["7z"]);
    assert_eq!(
        fs::read(output_dir.join("subdir/nested.txt")).unwrap(),
        b"Nested content"
    );
}

#[test]
fn test_compressed_zip_is_materialized() {
    let temp_dir = TempDir::new().unwrap();
    let zip_path = temp_dir.path().join("inner.zip");
    create_test_zip(&zip_path, SAMPLE).unwrap();

    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&fs::read(&zip_path).unwrap()).unwrap();
    let archive_path = temp_dir.path().join("bundle.zip.xz");
    fs::write(&archive_path, encoder.finish().unwrap()).unwrap();

    let output_dir = temp_dir.path().join("output");
    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(report.plan, ["xz", "zip"]);
    assert_eq!(fs::read(output_dir.join("test.txt")).unwrap(), b"Hello, World!");
}

#[test]
fn test_second_run_skips_everything() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.tar.gz");
    let output_dir = temp_dir.path().join("output");
    create_test_tar_gz(&archive_path, SAMPLE).unwrap();

    let first = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(first.written.len(), 3);
    let before = snapshot(&output_dir);

    let second = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert!(second.written.is_empty());
    assert_eq!(second.skipped.len(), 3);
    assert_eq!(second.bytes_written, 0);
    assert_eq!(snapshot(&output_dir), before);
    assert_eq!(second.summary(), "0 extracted, 3 skipped, 0 failed");
}

#[test]
fn test_skip_keeps_existing_content() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    fs::create_dir_all(&output_dir).unwrap();
    fs::write(output_dir.join("test.txt"), "mine").unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(fs::read_to_string(output_dir.join("test.txt")).unwrap(), "mine");
}

#[test]
fn test_overwrite_replaces() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    fs::create_dir_all(&output_dir).unwrap();
    fs::write(output_dir.join("test.txt"), "mine").unwrap();

    let options = ExtractOptions {
        collision: CollisionPolicy::Overwrite,
        ..Default::default()
    };
    let report = run_into(&archive_path, &output_dir, &options).unwrap();
    assert_eq!(report.written.len(), 3);
    assert!(report.skipped.is_empty());
    assert_eq!(
        fs::read_to_string(output_dir.join("test.txt")).unwrap(),
        "Hello, World!"
    );
}

#[test]
fn test_rename_disambiguates() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let options = ExtractOptions {
        collision: CollisionPolicy::Rename,
        ..Default::default()
    };
    run_into(&archive_path, &output_dir, &options).unwrap();
    let report = run_into(&archive_path, &output_dir, &options).unwrap();

    assert_eq!(report.written.len(), 3);
    assert_eq!(
        fs::read_to_string(output_dir.join("test (1).txt")).unwrap(),
        "Hello, World!"
    );
    assert!(output_dir.join("subdir/nested (1).txt").exists());
    assert_eq!(
        fs::read_to_string(output_dir.join("test.txt")).unwrap(),
        "Hello, World!"
    );
}

#[test]
fn test_traversal_rejected_under_every_policy() {
    for collision in [
        CollisionPolicy::Skip,
        CollisionPolicy::Overwrite,
        CollisionPolicy::Rename,
    ] {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("evil.tar");
        let output_dir = temp_dir.path().join("a/b/output");
        create_raw_tar(
            &archive_path,
            &[
                RawEntry::file("../../etc/passwd", b"root::0:0"),
                RawEntry::file("/etc/passwd", b"root::0:0"),
                RawEntry::file("ok/../../escape.txt", b"nope"),
                RawEntry::file("good.txt", b"fine"),
            ],
        );

        let options = ExtractOptions {
            collision,
            ..Default::default()
        };
        let report = run_into(&archive_path, &output_dir, &options).unwrap();

        assert_eq!(report.written.len(), 1, "{collision:?}");
        assert_eq!(report.failures.len(), 3, "{collision:?}");
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::UnsafePath));
        assert_eq!(fs::read(output_dir.join("good.txt")).unwrap(), b"fine");
        assert!(!temp_dir.path().join("a/etc/passwd").exists());
        assert!(!temp_dir.path().join("a/escape.txt").exists());
        assert!(!temp_dir.path().join("a/b/escape.txt").exists());
    }
}

#[test]
fn test_zip_slip_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("slip.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(
        &archive_path,
        &[
            ("../evil.txt", b"evil"),
            ("..\\windows.txt", b"evil"),
            ("safe.txt", b"safe"),
        ],
    )
    .unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert!(!temp_dir.path().join("evil.txt").exists());
    assert!(!temp_dir.path().join("windows.txt").exists());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.written.len(), 1);
}

#[cfg(unix)]
#[test]
fn test_symlink_escape_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("links.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry::file("lib/real.txt", b"real"),
            RawEntry::link("bin/inside", tar::EntryType::Symlink, "../lib/real.txt"),
            RawEntry::link("outside", tar::EntryType::Symlink, "../../etc/passwd"),
            RawEntry::link("absolute", tar::EntryType::Symlink, "/etc/passwd"),
        ],
    );

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    let inside = output_dir.join("bin/inside");
    assert!(fs::symlink_metadata(&inside).unwrap().file_type().is_symlink());
    assert_eq!(fs::read(&inside).unwrap(), b"real");
    assert!(fs::symlink_metadata(output_dir.join("outside")).is_err());
    assert!(fs::symlink_metadata(output_dir.join("absolute")).is_err());
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::UnsafePath));
}

#[cfg(unix)]
#[test]
fn test_link_chain_escape_removed() {
    // "d" points at the target root itself, so "d/.." is its parent.
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("chain.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry::link("sneaky", tar::EntryType::Symlink, "d/.."),
            RawEntry::link("d", tar::EntryType::Symlink, "."),
        ],
    );

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert!(fs::symlink_metadata(output_dir.join("sneaky")).is_err());
    assert!(report
        .failures
        .iter()
        .any(|f| f.entry == "sneaky" && f.kind == FailureKind::UnsafePath));
}

#[cfg(unix)]
#[test]
fn test_existing_symlink_not_followed() {
    let temp_dir = TempDir::new().unwrap();
    let outside = temp_dir.path().join("outside");
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(&outside).unwrap();
    fs::create_dir_all(&output_dir).unwrap();
    std::os::unix::fs::symlink(&outside, output_dir.join("dir")).unwrap();

    let archive_path = temp_dir.path().join("test.zip");
    create_test_zip(&archive_path, &[("dir/planted.txt", b"x")]).unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert!(!outside.join("planted.txt").exists());
    assert_eq!(report.failures[0].kind, FailureKind::UnsafePath);
}

#[test]
fn test_hardlinks() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("hard.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry::file("a.txt", b"shared"),
            RawEntry::link("b.txt", tar::EntryType::Link, "a.txt"),
            RawEntry::link("c.txt", tar::EntryType::Link, "../../etc/passwd"),
            RawEntry::link("d.txt", tar::EntryType::Link, "missing.txt"),
        ],
    );

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(fs::read(output_dir.join("b.txt")).unwrap(), b"shared");
    assert!(!output_dir.join("c.txt").exists());
    assert!(!output_dir.join("d.txt").exists());

    let kinds: Vec<_> = report.failures.iter().map(|f| (f.entry.as_str(), f.kind)).collect();
    assert_eq!(
        kinds,
        [("c.txt", FailureKind::UnsafePath), ("d.txt", FailureKind::Corrupt)]
    );
}

#[test]
fn test_links_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("links.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry::file("a.txt", b"a"),
            RawEntry::link("b.txt", tar::EntryType::Link, "a.txt"),
            RawEntry::link("c.txt", tar::EntryType::Symlink, "a.txt"),
        ],
    );

    let options = ExtractOptions {
        allow_symlinks: false,
        allow_hardlinks: false,
        ..Default::default()
    };
    let report = run_into(&archive_path, &output_dir, &options).unwrap();
    assert_eq!(report.written.len(), 1);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::Unsupported));
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn test_special_files_refused() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("dev.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry {
                name: "dev/null",
                kind: tar::EntryType::Char,
                link: None,
                mode: 0o666,
                data: b"",
            },
            RawEntry::file("regular.txt", b"ok"),
        ],
    );

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Unsupported);
    assert!(!output_dir.join("dev/null").exists());
    assert!(output_dir.join("regular.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_permissions_sanitized() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("modes.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[
            RawEntry {
                mode: 0o4755,
                ..RawEntry::file("setuid-tool", b"#!/bin/sh\n")
            },
            RawEntry {
                mode: 0o000,
                ..RawEntry::file("locked.txt", b"locked")
            },
            RawEntry {
                mode: 0o755,
                ..RawEntry::file("script.sh", b"#!/bin/sh\n")
            },
        ],
    );

    run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    let mode = |name: &str| {
        fs::metadata(output_dir.join(name))
            .unwrap()
            .permissions()
            .mode()
            & 0o7777
    };
    assert_eq!(mode("setuid-tool") & 0o7000, 0);
    assert_ne!(mode("setuid-tool") & 0o100, 0);
    // Owner can always read what was extracted.
    assert_eq!(mode("locked.txt") & 0o777, 0o400);
    assert_ne!(mode("script.sh") & 0o100, 0);
}

#[test]
fn test_corrupt_member_is_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("damaged.zip");
    let output_dir = temp_dir.path().join("output");

    {
        use zip::write::{SimpleFileOptions, ZipWriter};
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut zip = ZipWriter::new(File::create(&archive_path).unwrap());
        for (name, fill) in [("a.txt", b'A'), ("b.txt", b'B'), ("c.txt", b'C')] {
            zip.start_file(name, stored).unwrap();
            zip.write_all(&[fill; 64]).unwrap();
        }
        zip.finish().unwrap();
    }

    // Flip one byte of b.txt's stored data so its checksum fails.
    let mut bytes = fs::read(&archive_path).unwrap();
    let at = bytes
        .windows(64)
        .position(|w| w == [b'B'; 64])
        .unwrap();
    bytes[at + 10] = b'X';
    fs::write(&archive_path, bytes).unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert_eq!(report.written.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry, "b.txt");
    assert_eq!(report.failures[0].kind, FailureKind::Corrupt);
    assert!(output_dir.join("a.txt").exists());
    assert!(output_dir.join("c.txt").exists());
    assert!(!output_dir.join("b.txt").exists());
    assert!(no_temp_leftovers(&output_dir));
}

#[test]
fn test_corrupt_outer_layer_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("broken.tar.gz");
    let output_dir = temp_dir.path().join("output");

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&vec![7u8; 100_000]).unwrap();
    let mut data = encoder.finish().unwrap();
    let len = data.len();
    data.truncate(len / 2);
    fs::write(&archive_path, data).unwrap();

    let result = run_into(&archive_path, &output_dir, &ExtractOptions::default());
    assert!(matches!(result, Err(UnpackError::CorruptLayer { .. })));
}

#[test]
fn test_plain_compressed_payload() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("notes.txt.gz");

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"remember the milk\n").unwrap();
    fs::write(&archive_path, encoder.finish().unwrap()).unwrap();

    let report = run(
        &archive_path,
        &Destination::Derived(temp_dir.path().to_path_buf()),
        &ExtractOptions::default(),
    )
    .unwrap();

    assert_eq!(report.plan, ["gzip"]);
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("notes.txt")).unwrap(),
        "remember the milk\n"
    );
    assert_eq!(report.written.len(), 1);
}

#[test]
fn test_derived_destination_for_containers() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("release-1.0.tar.gz");
    create_test_tar_gz(&archive_path, SAMPLE).unwrap();

    let base = temp_dir.path().join("downloads");
    run(&archive_path, &Destination::Derived(base.clone()), &ExtractOptions::default()).unwrap();
    assert!(base.join("release-1.0/subdir/nested.txt").exists());

    // A file already holding that name pushes the output aside.
    let other = temp_dir.path().join("other");
    fs::create_dir_all(&other).unwrap();
    fs::write(other.join("release-1.0"), "occupied").unwrap();
    run(&archive_path, &Destination::Derived(other.clone()), &ExtractOptions::default()).unwrap();
    assert!(other.join("release-1.0.unpacked/test.txt").exists());
}

#[test]
fn test_strip_components() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("project.tar.gz");
    let output_dir = temp_dir.path().join("output");
    create_test_tar_gz(
        &archive_path,
        &[
            ("project-1.0/src/lib.rs", b"// lib"),
            ("project-1.0/README", b"readme"),
        ],
    )
    .unwrap();

    let options = ExtractOptions {
        strip_components: 1,
        ..Default::default()
    };
    run_into(&archive_path, &output_dir, &options).unwrap();
    assert!(output_dir.join("src/lib.rs").exists());
    assert!(output_dir.join("README").exists());
    assert!(!output_dir.join("project-1.0").exists());
}

fn nested_zip_bytes(levels: usize) -> Vec<u8> {
    let mut inner = {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("payload.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"deepest").unwrap();
        zip.finish().unwrap().into_inner()
    };
    for _ in 1..levels {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("nest.zip", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&inner).unwrap();
        inner = zip.finish().unwrap().into_inner();
    }
    inner
}

#[test]
fn test_recursive_unpacks_nested_archives() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("outer.zip");
    let output_dir = temp_dir.path().join("output");
    fs::write(&archive_path, nested_zip_bytes(3)).unwrap();

    let options = ExtractOptions {
        recursive: true,
        ..Default::default()
    };
    let report = run_into(&archive_path, &output_dir, &options).unwrap();

    assert_eq!(
        fs::read(output_dir.join("nest/nest/payload.txt")).unwrap(),
        b"deepest"
    );
    assert_eq!(report.nested.len(), 2);
    // Nested archives themselves are kept next to what they held.
    assert!(output_dir.join("nest.zip").exists());
}

#[test]
fn test_non_recursive_leaves_nested_archives() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("outer.zip");
    let output_dir = temp_dir.path().join("output");
    fs::write(&archive_path, nested_zip_bytes(3)).unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert!(report.nested.is_empty());
    assert!(output_dir.join("nest.zip").exists());
    assert!(!output_dir.join("nest").exists());
}

#[test]
fn test_self_nesting_stops_at_depth_limit() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("bomb.zip");
    let output_dir = temp_dir.path().join("output");
    fs::write(&archive_path, nested_zip_bytes(8)).unwrap();

    let options = ExtractOptions {
        recursive: true,
        depth_limit: 4,
        ..Default::default()
    };
    let result = run_into(&archive_path, &output_dir, &options);
    assert!(matches!(
        result,
        Err(UnpackError::TooDeeplyNested { limit: 4, .. })
    ));
}

#[test]
fn test_unrecognized_nested_file_is_left_alone() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("mixed.tar.gz");
    let output_dir = temp_dir.path().join("output");
    create_test_tar_gz(&archive_path, &[("notes.txt", b"plain text")]).unwrap();

    let options = ExtractOptions {
        recursive: true,
        ..Default::default()
    };
    let report = run_into(&archive_path, &output_dir, &options).unwrap();
    assert!(report.nested.is_empty());
    assert!(report.failures.is_empty());
}

#[test]
fn test_all_zero_input() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("zeros");
    fs::write(&input, vec![0u8; 4096]).unwrap();

    let result = run_into(&input, &temp_dir.path().join("output"), &ExtractOptions::default());
    assert!(matches!(result, Err(UnpackError::UnrecognizedFormat(_))));
}

#[test]
fn test_missing_input() {
    let temp_dir = TempDir::new().unwrap();
    let result = run_into(
        &temp_dir.path().join("nope.zip"),
        &temp_dir.path().join("output"),
        &ExtractOptions::default(),
    );
    assert!(matches!(result, Err(UnpackError::NotFound(_))));
}

#[test]
fn test_cancellation_via_flag() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    let output_dir = temp_dir.path().join("output");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let registry = FormatRegistry::builtin().unwrap();
    let cancel_flag = Arc::new(AtomicBool::new(true));
    let progress_cb = |_entry: &str, _bytes: u64, _size: Option<u64>| true;
    let result = unpack(
        &archive_path,
        &Destination::Exact(output_dir.clone()),
        &registry,
        &ExtractOptions::default(),
        &progress_cb,
        cancel_flag,
    );
    assert!(matches!(result, Err(UnpackError::Cancelled)));
    assert!(!output_dir.join("test.txt").exists());
}

#[test]
fn test_cancellation_via_progress_callback() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.tar.gz");
    let output_dir = temp_dir.path().join("output");
    create_test_tar_gz(&archive_path, SAMPLE).unwrap();

    let registry = FormatRegistry::builtin().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = Arc::clone(&calls);
    // Stop after the first entry.
    let progress_cb = move |_entry: &str, _bytes: u64, _size: Option<u64>| {
        calls_cb.fetch_add(1, Ordering::SeqCst);
        false
    };
    let result = unpack(
        &archive_path,
        &Destination::Exact(output_dir.clone()),
        &registry,
        &ExtractOptions::default(),
        &progress_cb,
        Arc::new(AtomicBool::new(false)),
    );

    assert!(matches!(result, Err(UnpackError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(output_dir.join("test.txt").exists());
    assert!(!output_dir.join("subdir/nested.txt").exists());
    assert!(no_temp_leftovers(&output_dir));
}

#[test]
fn test_size_limit_leaves_no_partial_file() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("big.zip");
    let output_dir = temp_dir.path().join("output");
    let big = vec![42u8; 256 * 1024];
    create_test_zip(&archive_path, &[("small.txt", b"tiny"), ("big.bin", &big)]).unwrap();

    let options = ExtractOptions {
        size_limit_bytes: Some(100 * 1024),
        ..Default::default()
    };
    let result = run_into(&archive_path, &output_dir, &options);

    assert!(matches!(result, Err(UnpackError::SizeLimitExceeded { .. })));
    assert!(output_dir.join("small.txt").exists());
    assert!(!output_dir.join("big.bin").exists());
    assert!(no_temp_leftovers(&output_dir));
}

#[test]
fn test_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let options = ExtractOptions {
        timeout: Some(Duration::ZERO),
        ..Default::default()
    };
    let result = run_into(&archive_path, &temp_dir.path().join("output"), &options);
    assert!(matches!(result, Err(UnpackError::TimedOut(_))));
}

#[test]
fn test_concurrent_matches_sequential() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("shared.tar.gz");
    let contents: Vec<(String, Vec<u8>)> = (0..20)
        .map(|i| (format!("f{i}.txt"), format!("file number {i}").into_bytes()))
        .collect();
    let files: Vec<(&str, &[u8])> = contents
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_slice()))
        .collect();
    create_test_tar_gz(&archive_path, &files).unwrap();

    let sequential = temp_dir.path().join("sequential");
    run_into(&archive_path, &sequential, &ExtractOptions::default()).unwrap();
    let expected = snapshot(&sequential);

    let registry = FormatRegistry::builtin().unwrap();
    let targets: Vec<PathBuf> = (0..4)
        .map(|i| temp_dir.path().join(format!("parallel-{i}")))
        .collect();
    std::thread::scope(|scope| {
        for target in &targets {
            let registry = &registry;
            let archive_path = &archive_path;
            scope.spawn(move || {
                let progress_cb = |_: &str, _: u64, _: Option<u64>| true;
                unpack(
                    archive_path,
                    &Destination::Exact(target.clone()),
                    registry,
                    &ExtractOptions::default(),
                    &progress_cb,
                    Arc::new(AtomicBool::new(false)),
                )
                .unwrap();
            });
        }
    });

    for target in &targets {
        assert_eq!(snapshot(target), expected);
    }
}

#[tokio::test]
async fn test_unpack_async() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let registry = Arc::new(FormatRegistry::builtin().unwrap());
    let report = unpacker::unpack_async(
        archive_path,
        Destination::Derived(temp_dir.path().to_path_buf()),
        registry,
        ExtractOptions::default(),
        Arc::new(|_: &str, _: u64, _: Option<u64>| true),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(report.written.len(), 3);
    assert!(temp_dir.path().join("test/data.json").exists());
}

#[test]
fn test_report_serializes() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("test.zip");
    create_test_zip(&archive_path, SAMPLE).unwrap();

    let report = run_into(&archive_path, &temp_dir.path().join("out"), &ExtractOptions::default())
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["plan"][0], "zip");
    assert_eq!(json["written"].as_array().unwrap().len(), 3);
    assert!(json["duration"].is_f64());
}

#[test]
fn test_dot_rooted_tar() {
    // `tar -C dir .` layout: a "./" directory entry, then "./name" members.
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("src");
    fs::create_dir_all(src.join("docs")).unwrap();
    fs::write(src.join("a.txt"), "alpha").unwrap();
    fs::write(src.join("docs/b.txt"), "beta").unwrap();

    let archive_path = temp_dir.path().join("dotted.tar");
    let mut builder = tar::Builder::new(File::create(&archive_path).unwrap());
    builder.append_dir_all(".", &src).unwrap();
    builder.finish().unwrap();
    drop(builder);

    let output_dir = temp_dir.path().join("output");
    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.written.len(), 2);
    assert_eq!(fs::read_to_string(output_dir.join("a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(output_dir.join("docs/b.txt")).unwrap(), "beta");
}

#[test]
fn test_empty_file_name_still_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = temp_dir.path().join("odd.tar");
    let output_dir = temp_dir.path().join("output");
    create_raw_tar(
        &archive_path,
        &[RawEntry::file("./", b"data"), RawEntry::file("ok.txt", b"ok")],
    );

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::UnsafePath);
}

/// 7z archive whose members are stored uncompressed, one folder each.
fn create_stored_7z(path: &Path, files: &[(&str, &[u8])]) {
    use sevenz_rust2::{SevenZArchiveEntry, SevenZMethod, SevenZWriter};

    let mut sz = SevenZWriter::new(File::create(path).unwrap()).unwrap();
    sz.set_content_methods(vec![SevenZMethod::COPY.into()]);
    for (name, content) in files {
        sz.push_archive_entry(
            SevenZArchiveEntry::from_path(Path::new(name), name.to_string()),
            Some(std::io::Cursor::new(content)),
        )
        .unwrap();
    }
    sz.finish().unwrap();
}

fn damaged_7z(dir: &Path) -> PathBuf {
    let archive_path = dir.join("damaged.7z");
    create_stored_7z(
        &archive_path,
        &[("a.txt", &[b'A'; 64]), ("b.txt", &[b'B'; 64]), ("c.txt", &[b'C'; 64])],
    );
    let mut bytes = fs::read(&archive_path).unwrap();
    let at = bytes.windows(64).position(|w| w == [b'B'; 64]).unwrap();
    bytes[at + 10] = b'X';
    fs::write(&archive_path, bytes).unwrap();
    archive_path
}

#[test]
fn test_corrupt_7z_member_is_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let archive_path = damaged_7z(temp_dir.path());
    let output_dir = temp_dir.path().join("output");

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry, "b.txt");
    assert_eq!(report.failures[0].kind, FailureKind::Corrupt);
    assert!(!output_dir.join("b.txt").exists());
    assert_eq!(fs::read(output_dir.join("c.txt")).unwrap(), [b'C'; 64]);
}

#[test]
fn test_unread_corrupt_7z_member_does_not_stop_siblings() {
    // A skipped member is only drained, and the damage shows up there.
    let temp_dir = TempDir::new().unwrap();
    let archive_path = damaged_7z(temp_dir.path());
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(&output_dir).unwrap();
    fs::write(output_dir.join("b.txt"), "mine").unwrap();

    let report = run_into(&archive_path, &output_dir, &ExtractOptions::default()).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Corrupt);
    assert_eq!(fs::read_to_string(output_dir.join("b.txt")).unwrap(), "mine");
    assert_eq!(fs::read(output_dir.join("c.txt")).unwrap(), [b'C'; 64]);
}
