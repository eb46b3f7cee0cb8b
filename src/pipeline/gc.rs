//! Derived-tree garbage collection.
//!
//! Runs after every stage so this run's outputs are part of the keep set.
//! Anything under the collected root that no live, eligible asset would
//! produce is deleted, then directories left empty are pruned.

use jwalk::WalkDir;
use rustc_hash::FxHashSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::asset::AssetDescriptor;
use crate::utils::fs::{prune_empty_dirs, remove_if_present};
use crate::{debug, log};

/// Counts of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Files deleted (or that would be, in a dry run)
    pub deleted: usize,
    pub pruned_dirs: usize,
}

impl std::ops::AddAssign for GcReport {
    fn add_assign(&mut self, rhs: Self) {
        self.deleted += rhs.deleted;
        self.pruned_dirs += rhs.pruned_dirs;
    }
}

/// Every path under `media/` the given assets should have.
pub fn media_keep_set(assets: &[AssetDescriptor]) -> FxHashSet<PathBuf> {
    assets.iter().flat_map(AssetDescriptor::derived_paths).collect()
}

/// Every relocated artifact the given assets should have in `archive`.
pub fn archive_keep_set(assets: &[AssetDescriptor], archive: &Path) -> FxHashSet<PathBuf> {
    assets
        .iter()
        .filter_map(|asset| asset.relocated_path(archive))
        .collect()
}

/// Delete every non-directory entry under `root` that is not in `keep`.
///
/// Symlinks are removed as links, never followed. A missing root is an
/// empty tree.
pub fn collect(root: &Path, keep: &FxHashSet<PathBuf>, dry_run: bool) -> io::Result<GcReport> {
    let mut report = GcReport::default();
    if !root.is_dir() {
        return Ok(report);
    }

    let orphans: Vec<PathBuf> = WalkDir::new(root)
        .sort(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.path())
        .filter(|path| !keep.contains(path))
        .collect();

    for path in orphans {
        if dry_run {
            log!("dry-run"; "would delete {}", path.display());
        } else {
            remove_if_present(&path)?;
            debug!("gc"; "deleted {}", path.display());
        }
        report.deleted += 1;
    }

    if !dry_run {
        report.pruned_dirs = prune_empty_dirs(root)?;
    }
    Ok(report)
}
