//! (listfile) and (attributes) maintenance, unnamed members and key recovery

use crate::common::{create_test_file, generate_repetitive_data, temp_dir};
use pretty_assertions::assert_eq;
use storm_mpq::special_files::{Attributes, parse_listfile};
use storm_mpq::{
    AddFileOptions, Archive, AttributeFlags, CreateOptions, Error, OpenOptions, VerifyFlags,
    VerifyResult,
};

#[test]
fn test_listfile_tracks_names() {
    let dir = temp_dir();
    let path = dir.path().join("list.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    for name in ["a.txt", "dir\\b.txt", "c.txt"] {
        archive
            .add_file_data(b"x", name, AddFileOptions::new())
            .unwrap();
    }
    archive.remove_file("c.txt").unwrap();
    archive.rename_file("a.txt", "dir\\a.txt").unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    let mut names = parse_listfile(&archive.read_file("(listfile)").unwrap()).unwrap();
    names.sort();
    assert_eq!(names, vec!["dir\\a.txt", "dir\\b.txt"]);
}

#[test]
fn test_attributes_record_checksums() {
    let dir = temp_dir();
    let path = dir.path().join("attrs.mpq");
    let data = generate_repetitive_data(b"attributes ", 3000);
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(&data, "data.bin", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.attributes().unwrap(), AttributeFlags::default());

    let block_index = archive.file_info("data.bin").unwrap().block_index;
    let raw = archive.read_file("(attributes)").unwrap();
    let block_count = archive.archive_info().unwrap().block_table_size as usize;
    let attributes = Attributes::parse(&raw, block_count).unwrap();
    let stored = attributes.get(block_index).unwrap();

    let (crc32, md5) = archive.file_checksums("data.bin").unwrap();
    assert_eq!(stored.crc32, crc32);
    assert_eq!(stored.md5, md5);
    assert_eq!(crc32, crc32fast::hash(&data));
    assert_ne!(stored.filetime, 0);
}

#[test]
fn test_set_attributes_changes_arrays() {
    let dir = temp_dir();
    let path = dir.path().join("attrs.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(b"abc", "abc.txt", AddFileOptions::new())
        .unwrap();
    archive.set_attributes(AttributeFlags::CRC32).unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&path).unwrap();
    assert_eq!(archive.attributes().unwrap(), AttributeFlags::CRC32);

    archive.set_attributes(AttributeFlags::empty()).unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(!archive.has_file("(attributes)").unwrap());
    assert_eq!(archive.attributes().unwrap(), AttributeFlags::empty());
    assert_eq!(archive.read_file("abc.txt").unwrap(), b"abc");
}

#[test]
fn test_unnamed_members_get_pseudo_names() {
    let dir = temp_dir();
    let path = dir.path().join("anon.mpq");
    let mut archive = CreateOptions::new().listfile(false).create(&path).unwrap();
    archive
        .add_file_data(b"first", "first.txt", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(b"second", "second.txt", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&path).unwrap();
    assert!(archive.file_names().unwrap().is_empty());
    let listed = archive.find_files("*").unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|name| name.starts_with("File")));
    // lookup by hash works without knowing names
    assert_eq!(archive.read_file("second.txt").unwrap(), b"second");

    let list = create_test_file(
        dir.path(),
        "names.txt",
        b"first.txt\r\nsecond.txt\r\nmissing.txt\r\n",
    );
    assert_eq!(archive.add_list_file(&list).unwrap(), 2);
    assert_eq!(archive.file_names().unwrap(), vec!["first.txt", "second.txt"]);
    assert_eq!(archive.find_files("*.txt").unwrap().len(), 2);
}

#[test]
fn test_open_by_index_recovers_key() {
    let dir = temp_dir();
    let path = dir.path().join("keys.mpq");
    let data = generate_repetitive_data(b"secret sector data ", 6000);
    let mut archive = CreateOptions::new()
        .listfile(false)
        .sector_size_shift(0)
        .create(&path)
        .unwrap();
    archive
        .add_file_data(&data, "hidden\\secret.bin", AddFileOptions::new().encrypt())
        .unwrap();
    archive
        .add_file_data(
            &data,
            "hidden\\fixed.bin",
            AddFileOptions::new().encrypt().fix_key(),
        )
        .unwrap();
    let blocks = [
        archive.file_info("hidden\\secret.bin").unwrap().block_index,
        archive.file_info("hidden\\fixed.bin").unwrap().block_index,
    ];
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    for block in blocks {
        let handle = archive.open_file_by_index(block).unwrap();
        assert!(archive.file_name(handle).unwrap().starts_with("File"));
        assert_eq!(archive.read_all(handle).unwrap(), data);
    }
    assert!(matches!(
        archive.open_file_by_index(999),
        Err(Error::FileNotFound(_))
    ));
}

#[test]
fn test_update_file_attributes() {
    let dir = temp_dir();
    let path = dir.path().join("update.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(b"payload", "p.txt", AddFileOptions::new())
        .unwrap();
    archive.update_file_attributes("p.txt").unwrap();
    assert!(matches!(
        archive.update_file_attributes("missing.txt"),
        Err(Error::FileNotFound(_))
    ));
    archive.close().unwrap();

    let archive = OpenOptions::new().read_only(true).open(&path).unwrap();
    let result = archive
        .verify_file("p.txt", VerifyFlags::ALL)
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert!(result.contains(VerifyResult::HAS_CHECKSUM));
}
