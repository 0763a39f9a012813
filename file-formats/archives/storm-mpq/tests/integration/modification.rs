//! Adding, replacing, removing, renaming and extracting members

use crate::common::{create_test_file, generate_repetitive_data, generate_test_data, temp_dir};
use pretty_assertions::assert_eq;
use std::fs;
use storm_mpq::{
    AddFileOptions, Archive, CompressionMethod, CreateOptions, Error, OpenOptions, WaveQuality,
};

#[test]
fn test_add_file_from_disk() {
    let dir = temp_dir();
    let source = create_test_file(dir.path(), "source.txt", b"from disk");
    let path = dir.path().join("disk.mpq");

    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file(&source, "docs\\source.txt", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.read_file("docs/source.txt").unwrap(), b"from disk");
}

#[test]
fn test_add_missing_source_is_io_error() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("io.mpq"), 16).unwrap();
    let result = archive.add_file(dir.path().join("nope.txt"), "nope.txt", AddFileOptions::new());
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_duplicate_and_replace() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("dup.mpq"), 16).unwrap();
    archive
        .add_file_data(b"first", "same.txt", AddFileOptions::new())
        .unwrap();

    let refused = archive.add_file_data(
        b"second",
        "SAME.TXT",
        AddFileOptions::new().replace_existing(false),
    );
    assert!(matches!(refused, Err(Error::DuplicateFile(_))));
    assert_eq!(archive.read_file("same.txt").unwrap(), b"first");

    archive
        .add_file_data(b"third", "same.txt", AddFileOptions::new())
        .unwrap();
    assert_eq!(archive.read_file("same.txt").unwrap(), b"third");
    assert_eq!(archive.find_files("same.txt").unwrap().len(), 1);
}

#[test]
fn test_remove_is_immediate() {
    let dir = temp_dir();
    let path = dir.path().join("remove.mpq");
    let mut archive = Archive::create(&path, 16).unwrap();
    archive
        .add_file_data(b"doomed", "doomed.txt", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(b"kept", "kept.txt", AddFileOptions::new())
        .unwrap();

    archive.remove_file("doomed.txt").unwrap();
    assert!(!archive.has_file("doomed.txt").unwrap());
    assert!(matches!(
        archive.read_file("doomed.txt"),
        Err(Error::FileNotFound(_))
    ));
    assert!(matches!(
        archive.remove_file("doomed.txt"),
        Err(Error::FileNotFound(_))
    ));
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(!archive.has_file("doomed.txt").unwrap());
    assert_eq!(archive.file_names().unwrap(), vec!["kept.txt".to_string()]);
}

#[test]
fn test_rename_preserves_content() {
    let dir = temp_dir();
    let path = dir.path().join("rename.mpq");
    let data = generate_repetitive_data(b"renamed content ", 9000);
    let mut archive = CreateOptions::new()
        .sector_size_shift(0)
        .create(&path)
        .unwrap();

    for (name, options) in [
        ("plain.bin", AddFileOptions::new()),
        ("keyed.bin", AddFileOptions::new().encrypt()),
        ("fixed.bin", AddFileOptions::new().encrypt().fix_key()),
    ] {
        archive.add_file_data(&data, name, options).unwrap();
        let block = archive.file_info(name).unwrap().block_index;

        let new_name = format!("moved\\renamed_{name}");
        archive.rename_file(name, &new_name).unwrap();
        assert!(!archive.has_file(name).unwrap());
        assert!(archive.has_file(&new_name).unwrap());
        assert_eq!(archive.read_file(&new_name).unwrap(), data);
        // no data rewrite, same block
        assert_eq!(archive.file_info(&new_name).unwrap().block_index, block);
    }
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.find_files("moved\\*").unwrap().len(), 3);
    assert_eq!(archive.read_file("moved\\renamed_fixed.bin").unwrap(), data);
}

#[test]
fn test_rename_onto_existing_fails() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("rename.mpq"), 16).unwrap();
    archive
        .add_file_data(b"a", "a.txt", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(b"b", "b.txt", AddFileOptions::new())
        .unwrap();

    assert!(matches!(
        archive.rename_file("a.txt", "b.txt"),
        Err(Error::DuplicateFile(_))
    ));
    assert!(matches!(
        archive.rename_file("missing.txt", "c.txt"),
        Err(Error::FileNotFound(_))
    ));
    assert!(matches!(
        archive.rename_file("a.txt", ""),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(archive.read_file("a.txt").unwrap(), b"a");
    assert_eq!(archive.read_file("b.txt").unwrap(), b"b");
}

#[test]
fn test_hash_table_grows_automatically() {
    let dir = temp_dir();
    let path = dir.path().join("grow.mpq");
    let mut archive = Archive::create(&path, 4).unwrap();
    assert_eq!(archive.max_file_count().unwrap(), 4);

    for i in 0..40 {
        archive
            .add_file_data(
                format!("file {i}").as_bytes(),
                &format!("files\\{i:03}.txt"),
                AddFileOptions::new(),
            )
            .unwrap();
    }
    assert!(archive.max_file_count().unwrap() >= 64);
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    for i in 0..40 {
        assert_eq!(
            archive.read_file(&format!("files\\{i:03}.txt")).unwrap(),
            format!("file {i}").as_bytes()
        );
    }
}

#[test]
fn test_set_max_file_count() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("count.mpq"), 64).unwrap();
    for i in 0..10 {
        archive
            .add_file_data(b"x", &format!("{i}.txt"), AddFileOptions::new())
            .unwrap();
    }

    archive.set_max_file_count(300).unwrap();
    assert_eq!(archive.max_file_count().unwrap(), 512);
    archive.set_max_file_count(16).unwrap();
    assert_eq!(archive.max_file_count().unwrap(), 16);
    assert_eq!(archive.read_file("7.txt").unwrap(), b"x");

    assert!(matches!(
        archive.set_max_file_count(0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        archive.set_max_file_count(5),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_set_max_file_count_needs_names() {
    let dir = temp_dir();
    let path = dir.path().join("anon.mpq");
    let mut archive = CreateOptions::new()
        .listfile(false)
        .max_file_count(16)
        .create(&path)
        .unwrap();
    archive
        .add_file_data(b"anonymous", "anonymous.txt", AddFileOptions::new())
        .unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open(&path).unwrap();
    assert!(matches!(
        archive.set_max_file_count(64),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(archive.add_list_file_data(b"anonymous.txt\r\n").unwrap(), 1);
    archive.set_max_file_count(64).unwrap();
    assert_eq!(archive.read_file("anonymous.txt").unwrap(), b"anonymous");
}

#[test]
fn test_every_storage_option_round_trips() {
    let dir = temp_dir();
    let path = dir.path().join("options.mpq");
    let data = generate_repetitive_data(b"\0\0\0\0options round trip\0\0", 12_345);

    let cases = [
        ("none", AddFileOptions::new().compression(CompressionMethod::None)),
        ("zlib", AddFileOptions::new()),
        ("bzip2", AddFileOptions::new().compression(CompressionMethod::BZip2)),
        ("lzma", AddFileOptions::new().compression(CompressionMethod::Lzma)),
        ("pkware", AddFileOptions::new().compression(CompressionMethod::PKWare)),
        ("sparse", AddFileOptions::new().compression(CompressionMethod::Sparse)),
        ("implode", AddFileOptions::new().implode()),
        ("single", AddFileOptions::new().single_unit().encrypt()),
        ("crc", AddFileOptions::new().sector_crc().encrypt().fix_key()),
        (
            "mixed",
            AddFileOptions::new()
                .compression(CompressionMethod::PKWare)
                .compression_next(CompressionMethod::BZip2),
        ),
    ];

    let mut archive = CreateOptions::new()
        .sector_size_shift(1)
        .create(&path)
        .unwrap();
    for (name, options) in cases.iter().cloned() {
        archive.add_file_data(&data, name, options).unwrap();
    }
    archive.close().unwrap();

    let archive = OpenOptions::new().check_sector_crc(true).open(&path).unwrap();
    for (name, _) in &cases {
        assert_eq!(archive.read_file(name).unwrap(), data, "{name}");
    }
}

#[test]
fn test_large_pkware_members_round_trip() {
    let dir = temp_dir();
    let path = dir.path().join("pkware.mpq");
    let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

    let cases = [
        ("implode.bin", AddFileOptions::new().implode()),
        ("implode_single.bin", AddFileOptions::new().implode().single_unit()),
        ("pkware.bin", AddFileOptions::new().compression(CompressionMethod::PKWare)),
        (
            "pkware_single.bin",
            AddFileOptions::new()
                .compression(CompressionMethod::PKWare)
                .single_unit(),
        ),
    ];

    let mut archive = Archive::create(&path, 16).unwrap();
    for (name, options) in cases.iter().cloned() {
        archive.add_file_data(&data, name, options).unwrap();
        assert_eq!(archive.read_file(name).unwrap(), data, "{name}");
    }
    archive.close().unwrap();

    let archive = Archive::open(&path).unwrap();
    for (name, _) in &cases {
        assert_eq!(archive.read_file(name).unwrap(), data, "{name}");
    }
    assert!(archive.verify_archive().unwrap().is_ok());
}

#[test]
fn test_add_wave() {
    let dir = temp_dir();
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF\0\0\0\0WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&2u16.to_le_bytes()); // stereo
    wav.extend_from_slice(&[0u8; 20]);
    wav.extend((0..20_000).flat_map(|i| (((i as f64 / 30.0).sin() * 9000.0) as i16).to_le_bytes()));
    let source = create_test_file(dir.path(), "tone.wav", &wav);

    let mut archive = Archive::create(dir.path().join("wave.mpq"), 16).unwrap();
    archive
        .add_wave(&source, "lossless.wav", WaveQuality::High)
        .unwrap();
    archive
        .add_wave(&source, "lossy.wav", WaveQuality::Low)
        .unwrap();

    assert_eq!(archive.read_file("lossless.wav").unwrap(), wav);
    let lossy = archive.read_file("lossy.wav").unwrap();
    assert_eq!(lossy.len(), wav.len());
    // the first sector keeps the header intact
    assert_eq!(lossy[..44], wav[..44]);
    assert!(
        archive.file_info("lossy.wav").unwrap().compressed_size
            < archive.file_info("lossless.wav").unwrap().compressed_size
    );
}

#[test]
fn test_extract_file_and_all() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("extract.mpq"), 16).unwrap();
    let data = generate_test_data(5000);
    archive
        .add_file_data(&data, "deep\\path\\data.bin", AddFileOptions::new())
        .unwrap();
    archive
        .add_file_data(b"top", "top.txt", AddFileOptions::new())
        .unwrap();

    let single = dir.path().join("single").join("copy.bin");
    archive.extract_file("deep\\path\\data.bin", &single).unwrap();
    assert_eq!(fs::read(&single).unwrap(), data);

    let out = dir.path().join("out");
    assert_eq!(archive.extract_all_files(&out).unwrap(), 2);
    assert_eq!(fs::read(out.join("deep").join("path").join("data.bin")).unwrap(), data);
    assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"top");
    // reserved members are not extracted
    assert!(!out.join("(listfile)").exists());
}

#[test]
fn test_extract_all_rejects_escaping_names() {
    let dir = temp_dir();
    let mut archive = Archive::create(dir.path().join("escape.mpq"), 16).unwrap();
    archive
        .add_file_data(b"evil", "..\\evil.txt", AddFileOptions::new())
        .unwrap();

    let out = dir.path().join("out");
    assert!(matches!(
        archive.extract_all_files(&out),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!dir.path().join("evil.txt").exists());
}

#[test]
fn test_extract_missing_member() {
    let dir = temp_dir();
    let archive = Archive::create(dir.path().join("missing.mpq"), 16).unwrap();
    let result = archive.extract_file("ghost.txt", dir.path().join("ghost.txt"));
    assert!(matches!(result, Err(Error::FileNotFound(_))));
}
