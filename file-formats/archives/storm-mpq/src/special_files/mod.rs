//! Special MPQ files: (listfile), (attributes) and the other reserved names

mod attributes;
mod listfile;

pub use attributes::{
    AttributeFlags, Attributes, FileAttributes, datetime_from_filetime, filetime_from_datetime,
};
pub use listfile::{build_listfile, parse_listfile};

/// Member holding the names of all other members
pub const LISTFILE: &str = "(listfile)";

/// Member holding per-file CRC32, file time, MD5 and patch bit
pub const ATTRIBUTES: &str = "(attributes)";

/// Member holding the weak digital signature
pub const SIGNATURE: &str = "(signature)";

/// Member holding user data
pub const USER_DATA: &str = "(user data)";

/// Member holding patch metadata
pub const PATCH_METADATA: &str = "(patch_metadata)";

/// Check if a name is reserved for archive bookkeeping
///
/// Reserved members never show up in `(listfile)` and are skipped by
/// archive-wide extraction.
pub fn is_special_file(name: &str) -> bool {
    [LISTFILE, ATTRIBUTES, SIGNATURE, USER_DATA, PATCH_METADATA]
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}
