//! Member and archive verification, including damaged archives

use crate::common::{corrupt_byte, generate_repetitive_data, temp_dir};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use storm_mpq::flags::{SFILE_VERIFY_ALL, VERIFY_FILE_ERROR_MASK};
use storm_mpq::{
    AddFileOptions, Archive, CreateOptions, Error, FormatVersion, OpenOptions, VerifyFlags,
    VerifyResult,
};
use tempfile::TempDir;

/// Archive with one member carrying sector checksums; returns its path
fn checked_archive(dir: &TempDir, version: FormatVersion) -> PathBuf {
    let path = dir.path().join("checked.mpq");
    let mut archive = CreateOptions::new().version(version).create(&path).unwrap();
    archive
        .add_file_data(
            &generate_repetitive_data(b"verify me ", 3000),
            "checked.bin",
            AddFileOptions::new().sector_crc(),
        )
        .unwrap();
    archive
        .add_file_data(b"plain", "plain.txt", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();
    path
}

#[test]
fn test_intact_member_verifies() {
    let dir = temp_dir();
    let archive = Archive::open(checked_archive(&dir, FormatVersion::V1)).unwrap();

    let result = archive.verify_file("checked.bin", VerifyFlags::ALL).unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert!(result.contains(
        VerifyResult::HAS_SECTOR_CRC | VerifyResult::HAS_CHECKSUM | VerifyResult::HAS_MD5
    ));

    // only the requested checks run
    let crc_only = archive
        .verify_file("checked.bin", VerifyFlags::FILE_CRC)
        .unwrap();
    assert_eq!(crc_only, VerifyResult::HAS_CHECKSUM);

    assert_eq!(VerifyFlags::from_bits_truncate(SFILE_VERIFY_ALL), VerifyFlags::ALL);
    assert_eq!(
        VerifyResult::from_bits_truncate(VERIFY_FILE_ERROR_MASK),
        VerifyResult::ERROR_MASK
    );
}

#[test]
fn test_verify_missing_member_is_an_error() {
    let dir = temp_dir();
    let archive = Archive::open(checked_archive(&dir, FormatVersion::V1)).unwrap();
    assert!(matches!(
        archive.verify_file("ghost.bin", VerifyFlags::ALL),
        Err(Error::FileNotFound(_))
    ));
}

#[test]
fn test_damaged_checksum_is_reported_not_raised() {
    let dir = temp_dir();
    let path = checked_archive(&dir, FormatVersion::V1);
    let info = Archive::open(&path).unwrap().file_info("checked.bin").unwrap();
    // last byte of the sector checksum table
    corrupt_byte(&path, info.file_pos + info.compressed_size as u64 - 1);

    let archive = Archive::open(&path).unwrap();
    let result = archive.verify_file("checked.bin", VerifyFlags::ALL).unwrap();
    assert!(result.contains(VerifyResult::SECTOR_CRC_ERROR));
    assert!(!result.is_ok());
    // the data itself is intact
    assert!(!result.contains(VerifyResult::CHECKSUM_ERROR));
    assert!(archive.read_file("checked.bin").is_ok());

    let report = archive.verify_archive().unwrap();
    assert!(!report.is_ok());
    let failed: Vec<_> = report.failed_files().map(|(name, _)| name.as_str()).collect();
    assert_eq!(failed, vec!["checked.bin"]);
    drop(archive);

    let strict = OpenOptions::new().check_sector_crc(true).open(&path).unwrap();
    let err = strict.read_file("checked.bin").unwrap_err();
    assert!(matches!(err, Error::SectorChecksum { sector: 0, .. }), "{err}");
    assert!(err.is_corruption());
    assert_eq!(strict.read_file("plain.txt").unwrap(), b"plain");
}

#[test]
fn test_damaged_data_fails_checksum() {
    let dir = temp_dir();
    let path = dir.path().join("raw.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(
            b"uncompressed member data",
            "raw.txt",
            AddFileOptions::new().compression(storm_mpq::CompressionMethod::None),
        )
        .unwrap();
    archive.close().unwrap();

    let info = Archive::open(&path).unwrap().file_info("raw.txt").unwrap();
    corrupt_byte(&path, info.file_pos + 3);

    let archive = Archive::open(&path).unwrap();
    let result = archive.verify_file("raw.txt", VerifyFlags::ALL).unwrap();
    assert!(result.contains(VerifyResult::HAS_CHECKSUM | VerifyResult::CHECKSUM_ERROR));
    assert!(result.contains(VerifyResult::HAS_MD5 | VerifyResult::MD5_ERROR));
}

#[test]
fn test_verify_archive_v4_digests() {
    let dir = temp_dir();
    let path = checked_archive(&dir, FormatVersion::V4);

    let archive = Archive::open(&path).unwrap();
    let report = archive.verify_archive().unwrap();
    assert_eq!(report.header_md5, Some(true));
    assert_eq!(report.hash_table_md5, Some(true));
    assert_eq!(report.block_table_md5, Some(true));
    assert!(report.is_ok(), "{report:?}");
    assert!(report.files.iter().any(|(name, _)| name == "checked.bin"));
}

#[test]
fn test_verify_archive_v1_has_no_digests() {
    let dir = temp_dir();
    let archive = Archive::open(checked_archive(&dir, FormatVersion::V1)).unwrap();
    let report = archive.verify_archive().unwrap();
    assert_eq!(report.header_md5, None);
    assert_eq!(report.hash_table_md5, None);
    assert!(report.is_ok());
}

#[test]
fn test_damaged_hash_table_digest() {
    let dir = temp_dir();
    let path = checked_archive(&dir, FormatVersion::V4);
    let info = Archive::open(&path).unwrap().archive_info().unwrap();

    let raw = std::fs::read(&path).unwrap();
    let hash_pos = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]) as u64;
    // the block index of the last slot; no other slot depends on it
    corrupt_byte(&path, hash_pos + info.hash_table_size as u64 * 16 - 1);

    let archive = OpenOptions::new().read_only(true).open(&path).unwrap();
    let report = archive.verify_archive().unwrap();
    assert_eq!(report.hash_table_md5, Some(false));
    assert_eq!(report.block_table_md5, Some(true));
    assert!(!report.is_ok());
}
