//! Patch archives layered over a base archive
//!
//! A patched archive answers name lookups from the most recently attached
//! patch that holds the name, then from older patches, then from itself.
//! A delete marker in a patch hides the member in every layer below it.
//! Incremental patch members (`PATCH_FILE`) are not applied; opening one
//! reports [`Error::Unsupported`].

use super::Archive;
use super::state::OpenArchive;
use crate::handle::MemberRef;
use crate::options::{OpenFileOptions, OpenOptions};
use crate::path::{normalize_name, parse_pseudo_name, validate_name};
use crate::special_files::is_special_file;
use crate::tables::BlockFlags;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// A read-only archive attached with [`Archive::open_patch_archive`]
#[derive(Debug)]
pub(super) struct PatchLayer {
    pub(super) archive: Archive,
    /// Prepended to names looked up in this layer, empty or ending in `\`
    prefix: String,
}

impl PatchLayer {
    fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.prefix, normalize_name(name))
    }

    /// Name as seen through the base archive, `None` outside the prefix
    fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        let head = name.get(..self.prefix.len())?;
        head.eq_ignore_ascii_case(&self.prefix)
            .then(|| &name[self.prefix.len()..])
            .filter(|rest| !rest.is_empty())
    }
}

fn patch_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix.map(normalize_name).unwrap_or_default();
    let trimmed = trimmed.trim_matches('\\');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\\")
    }
}

impl OpenArchive {
    pub(super) fn is_delete_marker(&self, member: &MemberRef) -> bool {
        self.blocks
            .get(member.block_index)
            .is_some_and(|b| b.flags.contains(BlockFlags::DELETE_MARKER))
    }
}

impl Archive {
    /// Attach a patch archive
    ///
    /// The patch is opened read-only and takes priority over this archive
    /// and every patch attached before it. With a `prefix` such as `"enUS"`,
    /// a lookup of `x\y.txt` reads `enUS\x\y.txt` from the patch.
    pub fn open_patch_archive<P: AsRef<Path>>(&mut self, path: P, prefix: Option<&str>) -> Result<()> {
        self.state()?;
        let path = path.as_ref();
        if path == self.path.as_path() {
            return Err(Error::invalid_argument("an archive cannot patch itself"));
        }

        let archive = OpenOptions::new().read_only(true).open(path)?;
        let prefix = patch_prefix(prefix);
        log::info!(
            "Attached patch {} to {} (prefix {prefix:?})",
            path.display(),
            self.path.display()
        );
        self.patches.push(PatchLayer { archive, prefix });
        Ok(())
    }

    /// Check if any patch archive is attached
    pub fn is_patched_archive(&self) -> Result<bool> {
        self.state()?;
        Ok(!self.patches.is_empty())
    }

    /// Number of attached patch archives
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// State of this archive (`None`) or of an attached patch
    pub(super) fn layer_state(&self, layer: Option<usize>) -> Result<&OpenArchive> {
        match layer {
            None => self.state(),
            Some(index) => self
                .patches
                .get(index)
                .ok_or(Error::HandleClosed)?
                .archive
                .state(),
        }
    }

    /// Resolve a name through the patches, newest first, then this archive
    ///
    /// `File########.xxx` names address this archive's own block table.
    pub(super) fn resolve_layered(
        &self,
        name: &str,
        options: OpenFileOptions,
    ) -> Result<(Option<usize>, MemberRef)> {
        let base = self.state()?;
        if self.patches.is_empty() || parse_pseudo_name(name).is_some() {
            return Ok((None, base.resolve(name, options)?));
        }

        // patches keep their own default locale, so pin ours
        let options = options.locale(options.locale.unwrap_or(base.locale));
        for (index, patch) in self.patches.iter().enumerate().rev() {
            let state = patch.archive.state()?;
            match state.resolve(&patch.qualify(name), options) {
                Ok(member) if state.is_delete_marker(&member) => {
                    log::trace!("{name} is deleted by patch {index}");
                    return Err(Error::FileNotFound(validate_name(name)?));
                }
                Ok(member) => return Ok((Some(index), member)),
                Err(Error::FileNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok((None, base.resolve(name, options)?))
    }

    /// Merge the names of the patches into this archive's names
    pub(super) fn layered_names(&self, own: Vec<String>) -> Result<Vec<String>> {
        // lowercase name -> live name, or None once a newer layer deleted it
        let mut merged: HashMap<String, Option<String>> = HashMap::new();
        for patch in self.patches.iter().rev() {
            let state = patch.archive.state()?;
            for (_, entry) in state.hashes.occupied() {
                let Some(name) = state.name_of(entry).and_then(|n| patch.strip(n)) else {
                    continue;
                };
                if is_special_file(name) {
                    continue;
                }
                let deleted = state
                    .blocks
                    .get(entry.block_index)
                    .is_some_and(|b| b.flags.contains(BlockFlags::DELETE_MARKER));
                merged
                    .entry(name.to_ascii_lowercase())
                    .or_insert_with(|| (!deleted).then(|| name.to_string()));
            }
        }
        for name in own {
            merged.entry(name.to_ascii_lowercase()).or_insert(Some(name));
        }
        Ok(merged.into_values().flatten().collect())
    }
}
