//! Property tests over random data, storage options and names

use crate::common::temp_dir;
use proptest::prelude::*;
use std::collections::BTreeSet;
use storm_mpq::compression::{compress, decompress, flags};
use storm_mpq::{AddFileOptions, Archive, CompressionMethod, CreateOptions};

fn lossless_method() -> impl Strategy<Value = CompressionMethod> {
    prop_oneof![
        Just(CompressionMethod::None),
        Just(CompressionMethod::Zlib),
        Just(CompressionMethod::BZip2),
        Just(CompressionMethod::Lzma),
        Just(CompressionMethod::PKWare),
        Just(CompressionMethod::Sparse),
    ]
}

/// Storage options other than ADPCM, which is lossy
fn storage_options() -> impl Strategy<Value = AddFileOptions> {
    (
        lossless_method(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(method, encrypt, fix_key, single_unit, sector_crc)| {
            let mut options = AddFileOptions::new().compression(method);
            if encrypt {
                options = options.encrypt();
                if fix_key {
                    options = options.fix_key();
                }
            }
            if single_unit {
                options = options.single_unit();
            }
            if sector_crc {
                options = options.sector_crc();
            }
            options
        })
}

/// Mostly compressible bytes, so both raw and compressed sectors occur
fn member_data() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..=3000),
        (prop::collection::vec(any::<u8>(), 1..=16), 1usize..=400)
            .prop_map(|(pattern, repeat)| pattern.repeat(repeat)),
    ]
}

fn member_name() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["", "data\\", "data\\sub\\", "Units\\"]),
        "[a-z][a-z0-9_]{0,10}",
        prop::sample::select(vec!["txt", "lua", "mdx", "blp"]),
    )
        .prop_map(|(dir, stem, ext)| format!("{dir}{stem}.{ext}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn codec_round_trip(
        data in prop::collection::vec(any::<u8>(), 1..=4096),
        method in prop_oneof![
            Just(flags::ZLIB),
            Just(flags::BZIP2),
            Just(flags::LZMA),
            Just(flags::PKWARE),
            Just(flags::SPARSE),
            Just(flags::ZLIB | flags::SPARSE),
        ]
    ) {
        let compressed = compress(&data, method).unwrap();
        prop_assert!(compressed.len() <= data.len());
        let restored = if compressed.len() == data.len() {
            compressed
        } else {
            decompress(&compressed[1..], compressed[0], data.len()).unwrap()
        };
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn stored_member_round_trip(data in member_data(), options in storage_options()) {
        let dir = temp_dir();
        let path = dir.path().join("prop.mpq");

        let mut archive = CreateOptions::new().sector_size_shift(0).create(&path).unwrap();
        archive.add_file_data(&data, "data\\member.bin", options).unwrap();
        prop_assert_eq!(&archive.read_file("data\\member.bin").unwrap(), &data);
        archive.close().unwrap();

        let archive = Archive::open(&path).unwrap();
        let handle = archive.open_file("data\\member.bin").unwrap();
        prop_assert_eq!(archive.size(handle).unwrap(), data.len() as u64);
        prop_assert_eq!(archive.read_all(handle).unwrap(), data);
    }

    #[test]
    fn large_single_unit_round_trip(
        data in prop_oneof![
            prop::collection::vec(any::<u8>(), 4097..=12_000),
            (4097usize..=12_000, 1u32..=255)
                .prop_map(|(len, step)| (0..len as u32).map(|i| (i * step % 256) as u8).collect()),
        ],
        options in prop_oneof![
            Just(AddFileOptions::new().compression(CompressionMethod::PKWare).single_unit()),
            Just(AddFileOptions::new().implode().single_unit()),
            Just(AddFileOptions::new().compression(CompressionMethod::Zlib).single_unit()),
            Just(AddFileOptions::new().compression(CompressionMethod::BZip2).single_unit().encrypt()),
        ],
    ) {
        let dir = temp_dir();
        let path = dir.path().join("single.mpq");

        let mut archive = Archive::create(&path, 16).unwrap();
        archive.add_file_data(&data, "single.bin", options).unwrap();
        prop_assert_eq!(&archive.read_file("single.bin").unwrap(), &data);
        archive.close().unwrap();

        let archive = Archive::open(&path).unwrap();
        prop_assert_eq!(archive.read_file("single.bin").unwrap(), data);
    }

    #[test]
    fn cursors_are_independent(
        data in prop::collection::vec(any::<u8>(), 1..=5000),
        chunks in prop::collection::vec(1usize..=700, 1..=12),
        start in 0usize..5000,
    ) {
        let dir = temp_dir();
        let path = dir.path().join("cursors.mpq");
        let mut archive = CreateOptions::new().sector_size_shift(0).create(&path).unwrap();
        archive.add_file_data(&data, "member.bin", AddFileOptions::new()).unwrap();

        let first = archive.open_file("member.bin").unwrap();
        let second = archive.open_file("member.bin").unwrap();
        let start = start.min(data.len());
        archive.set_position(second, start as u64).unwrap();

        let mut read = Vec::new();
        for len in chunks {
            read.extend(archive.read(first, len).unwrap());
            // reading through one handle never moves the other
            prop_assert_eq!(archive.position(second).unwrap(), start as u64);
        }
        prop_assert_eq!(&read[..], &data[..read.len()]);
        prop_assert_eq!(archive.read(second, data.len()).unwrap(), &data[start..]);
    }

    #[test]
    fn wildcard_listing_is_complete(
        names in prop::collection::btree_set(member_name(), 1..=20)
    ) {
        let dir = temp_dir();
        let path = dir.path().join("names.mpq");
        let mut archive = Archive::create(&path, 64).unwrap();
        for name in &names {
            archive.add_file_data(name.as_bytes(), name, AddFileOptions::new()).unwrap();
        }

        let listed: BTreeSet<String> = archive.find_files("*").unwrap().into_iter().collect();
        prop_assert_eq!(&listed, &names);

        let lua: BTreeSet<String> = archive.find_files("*.lua").unwrap().into_iter().collect();
        let expected: BTreeSet<String> =
            names.iter().filter(|n| n.ends_with(".lua")).cloned().collect();
        prop_assert_eq!(lua, expected);

        for name in &names {
            prop_assert_eq!(archive.read_file(name).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn rename_then_remove(
        data in prop::collection::vec(any::<u8>(), 0..=2000),
        encrypt in any::<bool>(),
    ) {
        let dir = temp_dir();
        let path = dir.path().join("rename.mpq");
        let mut archive = Archive::create(&path, 16).unwrap();
        let options = if encrypt {
            AddFileOptions::new().encrypt().fix_key()
        } else {
            AddFileOptions::new()
        };
        archive.add_file_data(&data, "before.bin", options).unwrap();

        archive.rename_file("before.bin", "after\\later.bin").unwrap();
        prop_assert!(!archive.has_file("before.bin").unwrap());
        prop_assert_eq!(archive.read_file("after\\later.bin").unwrap(), data);

        archive.remove_file("after\\later.bin").unwrap();
        prop_assert!(!archive.has_file("after\\later.bin").unwrap());
        prop_assert!(archive.find_files("*.bin").unwrap().is_empty());
    }
}
