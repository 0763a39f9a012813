//! Common test utilities and fixtures

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use storm_mpq::{AddFileOptions, Archive, CreateOptions};
use tempfile::TempDir;

/// Route library logging to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a temporary directory for tests
pub fn temp_dir() -> TempDir {
    init_logging();
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Generate test data of a specific size
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Generate repetitive test data (good for compression tests)
pub fn generate_repetitive_data(pattern: &[u8], total_size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(total_size);
    while data.len() < total_size {
        let chunk_size = (total_size - data.len()).min(pattern.len());
        data.extend_from_slice(&pattern[..chunk_size]);
    }
    data
}

/// Deterministic bytes that zlib cannot shrink
pub fn generate_noise(size: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng, rngs::StdRng};
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size).map(|_| rng.random()).collect()
}

/// Create a test file with specific content
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Create an archive at `dir/name` holding `files`, then close it
pub fn create_test_archive(dir: &TempDir, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.path().join(name);
    let mut archive = CreateOptions::new()
        .max_file_count(64)
        .create(&path)
        .expect("Failed to create archive");
    for (file_name, data) in files {
        archive
            .add_file_data(data, file_name, AddFileOptions::new())
            .expect("Failed to add file");
    }
    archive.close().expect("Failed to close archive");
    path
}

/// Size of a file on disk
pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).expect("Failed to stat file").len()
}

/// Flip every bit of the byte at `offset`
pub fn corrupt_byte(path: &Path, offset: u64) {
    use std::io::{Read, Seek, SeekFrom, Write};
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("Failed to open archive for corruption");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[!byte[0]]).unwrap();
}

/// Open an archive and keep it for the duration of a test
pub fn open(path: &Path) -> Archive {
    Archive::open(path).expect("Failed to open archive")
}
