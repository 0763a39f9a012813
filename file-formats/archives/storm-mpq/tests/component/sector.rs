//! Encoding members into sectors and decoding them one sector at a time

use crate::common::generate_repetitive_data;
use pretty_assertions::assert_eq;
use storm_mpq::Error;
use storm_mpq::compression::flags;
use storm_mpq::crypto::file_key;
use storm_mpq::sector::{
    FileLayout, SectorEncoding, decode_sector, encode_file, parse_checksums, parse_offset_table,
};
use storm_mpq::tables::{BlockEntry, BlockFlags};

const SECTOR_SIZE: u32 = 512;

fn encoding(flags: BlockFlags) -> SectorEncoding {
    SectorEncoding {
        sector_size: SECTOR_SIZE,
        flags,
        compression: flags::ZLIB,
        compression_next: flags::ZLIB,
        adpcm_level: 5,
    }
}

/// Encode, then decode every sector through the offset and checksum tables
fn decode_all(data: &[u8], flags: BlockFlags, key: Option<u32>) -> Vec<u8> {
    let encoded = encode_file(data, &encoding(flags)).unwrap();
    let entry = BlockEntry {
        file_pos: 0,
        compressed_size: encoded.compressed_size(),
        file_size: encoded.file_size,
        flags: encoded.flags,
    };
    let stored = encoded.into_bytes(key);
    assert_eq!(stored.len(), entry.compressed_size as usize);

    let layout = FileLayout::new(&entry, SECTOR_SIZE);
    let offsets = parse_offset_table(&layout, &stored[..layout.offset_table_size()], key).unwrap();
    let sectors = layout.sector_count() as usize;
    let checksums = layout.has_sector_crc().then(|| {
        let table = &stored[offsets[sectors] as usize..offsets[sectors + 1] as usize];
        parse_checksums(&layout, table).unwrap()
    });

    let mut out = Vec::with_capacity(data.len());
    for index in 0..sectors {
        let raw = stored[offsets[index] as usize..offsets[index + 1] as usize].to_vec();
        let checksum = checksums.as_ref().map(|c| c[index]);
        out.extend(decode_sector(&layout, "test.bin", index as u32, raw, key, checksum).unwrap());
    }
    out
}

#[test]
fn test_compressed_sectors_round_trip() {
    let data = generate_repetitive_data(b"sector payload ", 5000);
    assert_eq!(decode_all(&data, BlockFlags::COMPRESS, None), data);
}

#[test]
fn test_encrypted_sectors_with_checksums_round_trip() {
    let data = generate_repetitive_data(b"0123456789abcdef", 1700);
    let key = file_key("test.bin", 0, data.len() as u32, false);
    let flags = BlockFlags::COMPRESS | BlockFlags::ENCRYPTED | BlockFlags::SECTOR_CRC;
    assert_eq!(decode_all(&data, flags, Some(key)), data);
}

#[test]
fn test_offset_table_size() {
    let data = vec![7u8; 1025];
    let encoded = encode_file(&data, &encoding(BlockFlags::COMPRESS | BlockFlags::SECTOR_CRC)).unwrap();
    assert_eq!(encoded.sector_count(), 3);
    let entry = BlockEntry {
        file_pos: 0,
        compressed_size: encoded.compressed_size(),
        file_size: encoded.file_size,
        flags: encoded.flags,
    };
    let layout = FileLayout::new(&entry, SECTOR_SIZE);
    // three sectors, the end offset and the checksum table end
    assert_eq!(layout.offset_table_entries(), 5);
}

#[test]
fn test_single_unit_drops_sector_crc() {
    let data = generate_repetitive_data(b"one blob ", 3000);
    let encoded = encode_file(
        &data,
        &encoding(BlockFlags::COMPRESS | BlockFlags::SINGLE_UNIT | BlockFlags::SECTOR_CRC),
    )
    .unwrap();
    assert!(encoded.flags.contains(BlockFlags::SINGLE_UNIT));
    assert!(!encoded.flags.contains(BlockFlags::SECTOR_CRC));
    assert_eq!(encoded.sector_count(), 1);
}

#[test]
fn test_checksum_mismatch_is_reported() {
    let data = generate_repetitive_data(b"checked ", 600);
    let encoded = encode_file(&data, &encoding(BlockFlags::COMPRESS | BlockFlags::SECTOR_CRC)).unwrap();
    let entry = BlockEntry {
        file_pos: 0,
        compressed_size: encoded.compressed_size(),
        file_size: encoded.file_size,
        flags: encoded.flags,
    };
    let stored = encoded.into_bytes(None);
    let layout = FileLayout::new(&entry, SECTOR_SIZE);
    let offsets = parse_offset_table(&layout, &stored[..layout.offset_table_size()], None).unwrap();

    let sector = stored[offsets[0] as usize..offsets[1] as usize].to_vec();
    let result = decode_sector(&layout, "test.bin", 0, sector, None, Some(0x1234_5678));
    assert!(matches!(result, Err(Error::SectorChecksum { sector: 0, .. })));
}
