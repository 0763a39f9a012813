//! Integrity checks for members and whole archives

use bitflags::bitflags;

bitflags! {
    /// Checks requested from `verify_file`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VerifyFlags: u32 {
        /// Check sector checksums
        const SECTOR_CRC = 0x0000_0001;
        /// Check the CRC32 recorded in (attributes)
        const FILE_CRC = 0x0000_0002;
        /// Check the MD5 recorded in (attributes)
        const FILE_MD5 = 0x0000_0004;
        /// Check the raw data MD5
        const RAW_MD5 = 0x0000_0008;
        /// Every check
        const ALL = 0x0000_000F;
    }
}

bitflags! {
    /// Outcome of `verify_file`: which checks were present and which failed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VerifyResult: u32 {
        /// The member could not be opened
        const OPEN_ERROR = 0x0001;
        /// The member could not be read
        const READ_ERROR = 0x0002;
        /// The member has sector checksums
        const HAS_SECTOR_CRC = 0x0004;
        /// A sector checksum did not match
        const SECTOR_CRC_ERROR = 0x0008;
        /// The member has a CRC32 in (attributes)
        const HAS_CHECKSUM = 0x0010;
        /// The CRC32 did not match
        const CHECKSUM_ERROR = 0x0020;
        /// The member has an MD5 in (attributes)
        const HAS_MD5 = 0x0040;
        /// The MD5 did not match
        const MD5_ERROR = 0x0080;
        /// The member has a raw data MD5
        const HAS_RAW_MD5 = 0x0100;
        /// The raw data MD5 did not match
        const RAW_MD5_ERROR = 0x0200;
    }
}

impl VerifyResult {
    /// Every error bit
    pub const ERROR_MASK: Self = Self::OPEN_ERROR
        .union(Self::READ_ERROR)
        .union(Self::SECTOR_CRC_ERROR)
        .union(Self::CHECKSUM_ERROR)
        .union(Self::MD5_ERROR)
        .union(Self::RAW_MD5_ERROR);

    /// Check if no verification failed
    pub fn is_ok(self) -> bool {
        !self.intersects(Self::ERROR_MASK)
    }
}

/// Outcome of `verify_archive`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveVerification {
    /// Header digest check, `None` when the format has no digests
    pub header_md5: Option<bool>,
    /// Hash table digest check
    pub hash_table_md5: Option<bool>,
    /// Block table digest check
    pub block_table_md5: Option<bool>,
    /// Hi-block table digest check
    pub hi_block_table_md5: Option<bool>,
    /// Per-member results for every member with a known name
    pub files: Vec<(String, VerifyResult)>,
}

impl ArchiveVerification {
    /// Check if every digest and every member verified
    pub fn is_ok(&self) -> bool {
        [
            self.header_md5,
            self.hash_table_md5,
            self.block_table_md5,
            self.hi_block_table_md5,
        ]
        .iter()
        .all(|check| check.unwrap_or(true))
            && self.files.iter().all(|(_, result)| result.is_ok())
    }

    /// Members that failed verification
    pub fn failed_files(&self) -> impl Iterator<Item = &(String, VerifyResult)> + '_ {
        self.files.iter().filter(|(_, result)| !result.is_ok())
    }
}
