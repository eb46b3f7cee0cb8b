//! Source-tree scan.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use jwalk::WalkDir;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::ObservedFile;
use crate::asset::MediaKind;
use crate::utils::fs::to_rel_string;

/// Lists recognised media files under a library root.
#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
    exclude: GlobSet,
}

impl SourceScanner {
    /// Build a scanner; `exclude` holds globs relative to `root`, matched
    /// case-insensitively.
    pub fn new(root: &Path, exclude: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
        }
        Ok(Self {
            root: root.to_path_buf(),
            exclude: builder.build()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, rel_path: &str) -> bool {
        self.exclude.is_match(rel_path)
    }

    /// Walk the root, returning media files sorted by relative path.
    ///
    /// Any unreadable directory is an error: a partial listing would
    /// tombstone everything below it. Symlinks to files count as the file
    /// they point at; dangling links and linked directories are ignored.
    pub fn scan(&self) -> io::Result<Vec<ObservedFile>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source root {} is not a directory", self.root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort(true) {
            let entry = entry.map_err(io::Error::other)?;
            let path = entry.path();

            let file_type = entry.file_type();
            let is_file = file_type.is_file()
                || (file_type.is_symlink() && path.metadata().is_ok_and(|m| m.is_file()));
            if !is_file || !MediaKind::is_media_file(&path) {
                continue;
            }

            let Some(rel_path) = to_rel_string(&self.root, &path) else {
                continue;
            };
            if self.is_excluded(&rel_path) {
                continue;
            }
            if let Some(mtime) = modified_ms(&path) {
                files.push(ObservedFile { rel_path, mtime });
            }
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(files)
    }
}

/// Modification time in milliseconds since the Unix epoch.
fn modified_ms(path: &Path) -> Option<i64> {
    let modified = path.metadata().ok()?.modified().ok()?;
    let ms = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    };
    Some(ms)
}
