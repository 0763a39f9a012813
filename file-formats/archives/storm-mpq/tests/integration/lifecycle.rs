//! Opening, creating, flushing and closing archives

use crate::common::{create_test_archive, generate_noise, temp_dir};
use pretty_assertions::assert_eq;
use std::fs;
use storm_mpq::flags::{MPQ_CREATE_ARCHIVE_V2, MPQ_CREATE_LISTFILE, MPQ_OPEN_READ_ONLY};
use storm_mpq::{
    AddFileOptions, Archive, CreateOptions, Error, FormatVersion, OpenOptions,
};

#[test]
fn test_open_missing_path() {
    let dir = temp_dir();
    let result = Archive::open(dir.path().join("missing.mpq"));
    assert!(matches!(result, Err(Error::ArchiveNotFound(_))));
}

#[test]
fn test_open_non_archive() {
    let dir = temp_dir();
    let path = dir.path().join("noise.bin");
    fs::write(&path, generate_noise(3000, 1)).unwrap();
    assert!(matches!(Archive::open(&path), Err(Error::NotAnArchive(_))));
}

#[test]
fn test_header_search_finds_appended_archive() {
    let dir = temp_dir();
    let inner = create_test_archive(&dir, "inner.mpq", &[("war3map.j", b"main")]);

    // an archive glued to the end of another file, e.g. a map or installer
    let mut glued = generate_noise(1024, 2);
    glued.extend(fs::read(&inner).unwrap());
    let path = dir.path().join("glued.w3x");
    fs::write(&path, glued).unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.archive_info().unwrap().archive_offset, 1024);
    assert_eq!(archive.read_file("war3map.j").unwrap(), b"main");
    drop(archive);

    let strict = OpenOptions::new().header_search(false).open(&path);
    assert!(matches!(strict, Err(Error::NotAnArchive(_))));
}

#[test]
fn test_create_rounds_hash_table_up() {
    let dir = temp_dir();
    let archive = Archive::create(dir.path().join("a.mpq"), 100).unwrap();
    assert_eq!(archive.max_file_count().unwrap(), 128);

    let zero = Archive::create(dir.path().join("b.mpq"), 0);
    assert!(matches!(zero, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_create_from_raw_flags() {
    let dir = temp_dir();
    let path = dir.path().join("raw.mpq");
    let options = CreateOptions::from_raw(MPQ_CREATE_ARCHIVE_V2 | MPQ_CREATE_LISTFILE, 50).unwrap();
    let mut archive = options.create(&path).unwrap();
    archive
        .add_file_data(b"x", "x.txt", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();

    let archive = OpenOptions::from_raw(MPQ_OPEN_READ_ONLY).open(&path).unwrap();
    let info = archive.archive_info().unwrap();
    assert_eq!(info.format_version, FormatVersion::V2);
    assert_eq!(info.hash_table_size, 64);
    assert!(info.read_only);
    assert!(info.has_listfile);
}

#[test]
fn test_every_version_round_trips() {
    let dir = temp_dir();
    for version in [
        FormatVersion::V1,
        FormatVersion::V2,
        FormatVersion::V3,
        FormatVersion::V4,
    ] {
        let path = dir.path().join(format!("{version:?}.mpq"));
        let mut archive = CreateOptions::new().version(version).create(&path).unwrap();
        archive
            .add_file_data(b"versioned", "v.txt", AddFileOptions::new().encrypt())
            .unwrap();
        archive.close().unwrap();

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.archive_info().unwrap().format_version, version);
        assert_eq!(archive.read_file("v.txt").unwrap(), b"versioned");
    }
}

#[test]
fn test_close_is_idempotent() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("close.mpq"), 16).unwrap();
    assert!(archive.is_open());
    assert!(archive.close().unwrap());
    for _ in 0..3 {
        assert!(!archive.close().unwrap());
    }
    assert!(!archive.is_open());
}

#[test]
fn test_closed_archive_reports_closed() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("closed.mpq"), 16).unwrap();
    archive.close().unwrap();

    assert!(matches!(archive.has_file("x"), Err(Error::ArchiveClosed)));
    assert!(matches!(archive.flush(), Err(Error::ArchiveClosed)));
    let err = archive
        .add_file_data(b"x", "x", AddFileOptions::new())
        .unwrap_err();
    assert!(err.is_closed());
    assert!(!matches!(err, Error::FileNotFound(_)));
}

#[test]
fn test_read_only_rejects_writes() {
    let dir = temp_dir();
    let path = create_test_archive(&dir, "ro.mpq", &[("a.txt", b"a")]);
    let mut archive = OpenOptions::new().read_only(true).open(&path).unwrap();
    assert!(archive.is_read_only().unwrap());

    assert!(matches!(
        archive.add_file_data(b"b", "b.txt", AddFileOptions::new()),
        Err(Error::ReadOnly)
    ));
    assert!(matches!(archive.remove_file("a.txt"), Err(Error::ReadOnly)));
    assert!(matches!(
        archive.rename_file("a.txt", "c.txt"),
        Err(Error::ReadOnly)
    ));
    assert!(matches!(archive.compact(), Err(Error::ReadOnly)));
    assert!(matches!(
        archive.create_file("d.txt", 1, AddFileOptions::new()),
        Err(Error::ReadOnly)
    ));

    // reads still work
    assert_eq!(archive.read_file("a.txt").unwrap(), b"a");
    assert!(archive.close().unwrap());
}

#[test]
fn test_flush_truncates_and_persists() {
    let dir = temp_dir();
    let path = dir.path().join("flush.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(&generate_noise(20_000, 3), "big.bin", AddFileOptions::new())
        .unwrap();
    archive.flush().unwrap();
    let with_big = fs::metadata(&path).unwrap().len();

    archive.remove_file("big.bin").unwrap();
    archive
        .add_file_data(b"small", "small.txt", AddFileOptions::new())
        .unwrap();
    archive.flush().unwrap();
    assert!(fs::metadata(&path).unwrap().len() <= with_big);

    let reopened = Archive::open(&path).unwrap();
    assert!(!reopened.has_file("big.bin").unwrap());
    assert_eq!(reopened.read_file("small.txt").unwrap(), b"small");
}

#[test]
fn test_locale_is_per_archive() {
    let dir = temp_dir();
    let mut first = Archive::create(dir.path().join("first.mpq"), 16).unwrap();
    let second = Archive::create(dir.path().join("second.mpq"), 16).unwrap();

    first.set_locale(0x407).unwrap();
    first
        .add_file_data(b"hallo", "greeting.txt", AddFileOptions::new())
        .unwrap();

    assert_eq!(first.locale().unwrap(), 0x407);
    assert_eq!(second.locale().unwrap(), 0);
    assert_eq!(first.file_info("greeting.txt").unwrap().locale, 0x407);
}

#[test]
fn test_open_rejects_oversized_sector_shift() {
    let dir = temp_dir();
    let path = create_test_archive(&dir, "shift.mpq", &[("a.txt", b"alpha")]);

    // 512 << 23 no longer fits the 32-bit sector size
    let mut raw = fs::read(&path).unwrap();
    raw[0x0E..0x10].copy_from_slice(&23u16.to_le_bytes());
    fs::write(&path, &raw).unwrap();
    assert!(matches!(Archive::open(&path), Err(Error::InvalidFormat(_))));

    raw[0x0E..0x10].copy_from_slice(&u16::MAX.to_le_bytes());
    fs::write(&path, &raw).unwrap();
    assert!(matches!(Archive::open(&path), Err(Error::InvalidFormat(_))));
}
