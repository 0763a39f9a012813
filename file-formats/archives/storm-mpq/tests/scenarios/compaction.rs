//! Compaction keeps every live member and never grows the archive

use crate::common::{file_len, generate_noise, generate_test_data, temp_dir};
use pretty_assertions::assert_eq;
use std::fs;
use storm_mpq::{AddFileOptions, Archive, CreateOptions, FormatVersion};

#[test]
fn test_remove_two_then_compact() {
    let dir = temp_dir();
    let path = dir.path().join("compact.mpq");
    let third = generate_test_data(7000);

    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(&generate_noise(8000, 1), "first.bin", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(&generate_noise(9000, 2), "second.bin", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(&third, "third.bin", AddFileOptions::new())
        .unwrap();

    archive.remove_file("first.bin").unwrap();
    archive.remove_file("second.bin").unwrap();
    archive.flush().unwrap();
    let before = file_len(&path);

    archive.compact().unwrap();
    assert!(archive.has_file("third.bin").unwrap());
    assert_eq!(archive.read_file("third.bin").unwrap(), third);
    archive.close().unwrap();

    let after = file_len(&path);
    assert!(after <= before, "{after} > {before}");
    // both removed members were incompressible, so the saving is large
    assert!(before - after >= 17_000 - 1024, "{before} -> {after}");

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.read_file("third.bin").unwrap(), third);
    assert!(!archive.has_file("first.bin").unwrap());
}

#[test]
fn test_compact_moves_keyed_members() {
    let dir = temp_dir();
    let path = dir.path().join("keyed.mpq");
    let payload = generate_test_data(5000);

    let mut archive = CreateOptions::new()
        .version(FormatVersion::V3)
        .sector_size_shift(0)
        .create(&path)
        .unwrap();
    archive
        .add_file_data(&generate_noise(4000, 3), "gap.bin", AddFileOptions::new())
        .unwrap();
    for (name, options) in [
        ("fixed.bin", AddFileOptions::new().encrypt().fix_key()),
        ("single.bin", AddFileOptions::new().encrypt().fix_key().single_unit()),
        ("plain.bin", AddFileOptions::new().encrypt().sector_crc()),
    ] {
        archive.add_file_data(&payload, name, options).unwrap();
    }
    let old_pos = archive.file_info("fixed.bin").unwrap().file_pos;

    archive.remove_file("gap.bin").unwrap();
    archive.compact().unwrap();
    assert!(archive.file_info("fixed.bin").unwrap().file_pos < old_pos);
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    for name in ["fixed.bin", "single.bin", "plain.bin"] {
        assert_eq!(archive.read_file(name).unwrap(), payload, "{name}");
    }
    assert!(archive.verify_archive().unwrap().is_ok());
}

#[test]
fn test_compact_without_names_keeps_members() {
    let dir = temp_dir();
    let path = dir.path().join("anon.mpq");
    let mut archive = CreateOptions::new().listfile(false).create(&path).unwrap();
    archive
        .add_file_data(&generate_noise(3000, 4), "drop.bin", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(b"survivor", "keep.txt", AddFileOptions::new().encrypt())
        .unwrap();
    archive.remove_file("drop.bin").unwrap();
    archive.close().unwrap();

    // reopened without names, the survivor is only known by its hash
    let mut archive = Archive::open(&path).unwrap();
    archive.compact().unwrap();
    assert_eq!(archive.read_file("keep.txt").unwrap(), b"survivor");
}

#[test]
fn test_compact_is_lossless_for_many_members() {
    let dir = temp_dir();
    let path = dir.path().join("many.mpq");
    let mut archive = Archive::create(&path, 128).unwrap();

    for i in 0..60 {
        let data = format!("member {i} ").repeat(i + 1);
        archive
            .add_file_data(data.as_bytes(), &format!("m\\{i:02}.txt"), AddFileOptions::new())
            .unwrap();
    }
    for i in (0..60).step_by(3) {
        archive.remove_file(&format!("m\\{i:02}.txt")).unwrap();
    }
    archive.flush().unwrap();
    let before = fs::metadata(&path).unwrap().len();
    archive.compact().unwrap();
    archive.close().unwrap();
    assert!(fs::metadata(&path).unwrap().len() <= before);

    let archive = Archive::open(&path).unwrap();
    for i in 0..60 {
        let name = format!("m\\{i:02}.txt");
        if i % 3 == 0 {
            assert!(!archive.has_file(&name).unwrap());
        } else {
            let expected = format!("member {i} ").repeat(i + 1);
            assert_eq!(archive.read_file(&name).unwrap(), expected.as_bytes());
        }
    }
}
