//! WR-003: Artifact resolution by naming convention.
//!
//! Each slot's directory is globbed for `*.{ext}`; among regular-file matches
//! the lexicographically last file name wins. No timestamps are consulted.
//! A missing directory is the same as an empty one.

use super::error::LaunchError;
use super::types::*;
use std::path::{Path, PathBuf};

/// Find the lexicographically last `*.{ext}` regular file in `dir`.
pub fn latest_candidate(dir: &Path, ext: &str) -> Option<PathBuf> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        ext
    );
    let entries = glob::glob(&pattern).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}

/// Resolve every slot of the layout.
///
/// Fails on the first mandatory slot with no candidate; optional slots
/// resolve to [`Artifact::Absent`].
pub fn resolve(layout: &WorkspaceLayout) -> Result<ResolvedArtifacts, LaunchError> {
    let mut resolved = ResolvedArtifacts::default();

    for slot in ArtifactSlot::ALL {
        let dir = layout.slot_dir(slot);
        let ext = layout.slot_ext(slot);
        match latest_candidate(&dir, ext) {
            Some(path) => resolved.insert(slot, Artifact::Present(path)),
            None if slot.is_mandatory() => {
                return Err(LaunchError::MissingMandatoryArtifact {
                    slot: slot.name().to_string(),
                    ext: ext.to_string(),
                    searched: dir,
                });
            }
            None => resolved.insert(slot, Artifact::Absent),
        }
    }

    Ok(resolved)
}
