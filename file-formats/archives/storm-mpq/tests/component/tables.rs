//! Hash directory probing and block placement

use pretty_assertions::assert_eq;
use storm_mpq::Error;
use storm_mpq::crypto::NameHashes;
use storm_mpq::options::LocaleFallback;
use storm_mpq::tables::{BlockEntry, BlockFlags, BlockTable, HashDirectory, HashSlot, LOCALE_NEUTRAL};

const NAMES: [&str; 4] = ["war3map.j", "war3map.w3e", "units\\footman.mdx", "(listfile)"];

fn full_directory() -> HashDirectory {
    let mut directory = HashDirectory::new(4).unwrap();
    for (i, name) in NAMES.iter().enumerate() {
        directory
            .insert(&NameHashes::new(name), LOCALE_NEUTRAL, 0, i as u32)
            .unwrap();
    }
    directory
}

#[test]
fn test_full_table_rejects_insert() {
    let mut directory = full_directory();
    assert_eq!(directory.live_count(), 4);
    assert!(matches!(
        directory.insert(&NameHashes::new("extra.txt"), LOCALE_NEUTRAL, 0, 9),
        Err(Error::HashTableFull)
    ));
}

#[test]
fn test_tombstone_keeps_probe_chains() {
    let mut directory = full_directory();
    let (slot, _) = directory
        .lookup(&NameHashes::new(NAMES[0]), LOCALE_NEUTRAL, LocaleFallback::Exact)
        .unwrap();
    directory.remove(slot).unwrap();
    assert_eq!(directory.slot(slot), Some(&HashSlot::Deleted));

    // every other name is still reachable past the tombstone
    for (i, name) in NAMES.iter().enumerate().skip(1) {
        let (_, entry) = directory
            .lookup(&NameHashes::new(name), LOCALE_NEUTRAL, LocaleFallback::Exact)
            .unwrap();
        assert_eq!(entry.block_index, i as u32);
    }
    assert!(
        directory
            .lookup(&NameHashes::new(NAMES[0]), LOCALE_NEUTRAL, LocaleFallback::Any)
            .is_none()
    );

    // the tombstone is the only slot left, so an insert reuses it
    let reused = directory
        .insert(&NameHashes::new("extra.txt"), LOCALE_NEUTRAL, 0, 9)
        .unwrap();
    assert_eq!(reused, slot);
}

#[test]
fn test_locale_fallback() {
    let mut directory = HashDirectory::new(16).unwrap();
    let hashes = NameHashes::new("ui\\glue.txt");
    directory.insert(&hashes, LOCALE_NEUTRAL, 0, 0).unwrap();
    directory.insert(&hashes, 0x407, 0, 1).unwrap();

    let find = |locale, fallback| {
        directory
            .lookup(&hashes, locale, fallback)
            .map(|(_, entry)| entry.block_index)
    };
    assert_eq!(find(0x407, LocaleFallback::Exact), Some(1));
    assert_eq!(find(0x409, LocaleFallback::Exact), None);
    assert_eq!(find(0x409, LocaleFallback::Neutral), Some(0));
    assert_eq!(find(0x409, LocaleFallback::Any), Some(0));
    assert_eq!(directory.find_all(&hashes).len(), 2);
}

#[test]
fn test_rehash_grows_and_clears_tombstones() {
    let mut directory = full_directory();
    directory.remove(0).unwrap();
    let names: Vec<NameHashes> = NAMES.iter().map(|n| NameHashes::new(n)).collect();

    let grown = directory
        .rehash(16, |entry| names.iter().copied().find(|h| entry.matches(h)))
        .unwrap();
    assert_eq!(grown.size(), 16);
    assert_eq!(grown.live_count(), 3);
    assert!(!grown.slots().contains(&HashSlot::Deleted));

    // a name nobody can resolve blocks the rehash
    assert!(matches!(
        directory.rehash(16, |_| None),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_encrypted_table_round_trip() {
    let directory = full_directory();
    let bytes = directory.to_bytes().unwrap();
    assert_eq!(bytes.len(), 4 * 16);

    let parsed = HashDirectory::from_bytes(&bytes, 4).unwrap();
    assert_eq!(parsed.slots(), directory.slots());
}

#[test]
fn test_size_for_capacity() {
    assert_eq!(HashDirectory::size_for_capacity(1).unwrap(), 4);
    assert_eq!(HashDirectory::size_for_capacity(100).unwrap(), 128);
    assert_eq!(HashDirectory::size_for_capacity(1024).unwrap(), 1024);
    assert!(HashDirectory::size_for_capacity(0).is_err());
    assert!(HashDirectory::size_for_capacity(0x10_0000).is_err());
}

fn live(file_pos: u64, compressed_size: u32) -> BlockEntry {
    BlockEntry {
        file_pos,
        compressed_size,
        file_size: compressed_size,
        flags: BlockFlags::EXISTS,
    }
}

#[test]
fn test_allocator_fills_gaps_first() {
    let mut blocks = BlockTable::new();
    let a = blocks.insert(live(0x20, 100));
    blocks.insert(live(0x84, 50));
    blocks.insert(live(0xB6, 10));

    // appended when nothing is free
    assert_eq!(blocks.allocate(40, 0x20), 0xC0);

    blocks.free(a).unwrap();
    assert!(blocks.get(a).unwrap().is_free());
    assert_eq!(blocks.allocate(100, 0x20), 0x20);
    assert_eq!(blocks.allocate(101, 0x20), 0xC0);

    // the freed entry is reused before the table grows
    assert_eq!(blocks.insert(live(0x20, 8)), a);
}

#[test]
fn test_block_table_round_trip() {
    let mut blocks = BlockTable::new();
    blocks.insert(live(0x20, 100));
    blocks.insert(BlockEntry {
        file_pos: 0x84,
        compressed_size: 70,
        file_size: 300,
        flags: BlockFlags::EXISTS | BlockFlags::COMPRESS | BlockFlags::ENCRYPTED,
    });

    let (bytes, hi_block) = blocks.to_bytes().unwrap();
    assert!(hi_block.is_none());
    let parsed = BlockTable::from_bytes(&bytes, 2, None).unwrap();
    assert_eq!(parsed.entries(), blocks.entries());
}
