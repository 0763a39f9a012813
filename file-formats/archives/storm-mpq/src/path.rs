//! Member name utilities
//!
//! MPQ archives use backslashes (`\`) as path separators internally, regardless
//! of the host operating system. Names are compared case-insensitively, so the
//! hash directory only ever sees the normalized form produced here.
//!
//! # Examples
//!
//! ```
//! use storm_mpq::path::{normalize_name, plain_name, WildcardMask};
//!
//! assert_eq!(normalize_name("units/human/footman.mdx"), "units\\human\\footman.mdx");
//! assert_eq!(plain_name("units\\human\\footman.mdx"), "footman.mdx");
//!
//! let mask = WildcardMask::new("*.MDX").unwrap();
//! assert!(mask.matches("units\\human\\footman.mdx"));
//! ```

use crate::{Error, Result};
use glob::{MatchOptions, Pattern};

/// Longest member name accepted by the engine
pub const MAX_NAME_LENGTH: usize = 260;

/// Normalize a member name for storage and lookup
///
/// Converts forward slashes to backslashes to match MPQ format requirements.
pub fn normalize_name(name: &str) -> String {
    name.replace('/', "\\")
}

/// Validate and normalize a member name supplied by a caller
pub fn validate_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::invalid_argument("file name must not be empty"));
    }
    if name.len() >= MAX_NAME_LENGTH {
        return Err(Error::invalid_argument(format!(
            "file name is {} bytes long, the limit is {}",
            name.len(),
            MAX_NAME_LENGTH - 1
        )));
    }
    if name.contains('\0') {
        return Err(Error::invalid_argument("file name contains a NUL byte"));
    }
    Ok(normalize_name(name))
}

/// Return the part of a member name after the last path separator
///
/// The file encryption key is derived from this part only.
pub fn plain_name(name: &str) -> &str {
    match name.rfind(['\\', '/']) {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Convert a member name to a relative path for the host system
pub fn name_to_system_path(name: &str) -> String {
    #[cfg(unix)]
    {
        name.replace('\\', "/")
    }

    #[cfg(windows)]
    {
        name.to_string()
    }
}

/// Name used for members whose real name is unknown
pub fn pseudo_name(block_index: u32) -> String {
    format!("File{block_index:08}.xxx")
}

/// Recover the block index from a name produced by [`pseudo_name`]
pub fn parse_pseudo_name(name: &str) -> Option<u32> {
    let name = plain_name(name);
    let prefix = name.get(..4)?;
    if !prefix.eq_ignore_ascii_case("file") {
        return None;
    }
    let digits = name.get(4..12)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) || name.as_bytes().get(12) != Some(&b'.') {
        return None;
    }
    digits.parse().ok()
}

/// Wildcard mask used when enumerating members
///
/// Only `*` (any run of characters, including separators) and `?` (one
/// character) are special; everything else matches literally and
/// case-insensitively. An empty mask matches nothing.
#[derive(Debug, Clone)]
pub struct WildcardMask {
    pattern: Option<Pattern>,
}

impl WildcardMask {
    /// Compile a mask
    pub fn new(mask: &str) -> Result<Self> {
        if mask.is_empty() {
            return Ok(Self { pattern: None });
        }

        let mut source = String::with_capacity(mask.len() + 8);
        let mut previous_star = false;
        for ch in normalize_name(mask).chars() {
            match ch {
                // glob rejects `**` outside a whole path component
                '*' if previous_star => continue,
                '*' | '?' => source.push(ch),
                _ => source.push_str(&Pattern::escape(ch.encode_utf8(&mut [0u8; 4]))),
            }
            previous_star = ch == '*';
        }

        let pattern = Pattern::new(&source)
            .map_err(|e| Error::invalid_argument(format!("invalid mask {mask:?}: {e}")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Check whether a member name matches this mask
    pub fn matches(&self, name: &str) -> bool {
        let Some(pattern) = &self.pattern else {
            return false;
        };
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        pattern.matches_with(&normalize_name(name), options)
    }

    /// Check whether this mask matches everything
    pub fn is_match_all(&self) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.as_str() == "*")
    }
}
