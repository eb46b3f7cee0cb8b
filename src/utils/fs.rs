//! Filesystem primitives for derived artifacts: links, moves, cleanup.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Join a `/`-separated relative path onto `base`.
pub fn join_rel(base: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Relative path of `path` under `root` with `/` separators.
///
/// Returns `None` when `path` is not below `root` or is not valid UTF-8.
pub fn to_rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Whether `link` is a symlink pointing at exactly `target`.
pub fn links_to(link: &Path, target: &Path) -> bool {
    fs::read_link(link).is_ok_and(|t| t == target)
}

/// Create parent directories and drop whatever currently sits at `dest`.
pub fn prepare_destination(dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_if_present(dest)
}

/// Remove a file or symlink, ignoring a missing path.
pub fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Create a symlink at `link` pointing to `target`.
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Move a file, falling back to copy + remove across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Remove empty directories below `root` (`root` itself is kept).
///
/// Returns the number of directories removed.
pub fn prune_empty_dirs(root: &Path) -> io::Result<usize> {
    fn prune(dir: &Path, removed: &mut usize) -> io::Result<bool> {
        let mut empty = true;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                if prune(&path, removed)? {
                    fs::remove_dir(&path)?;
                    *removed += 1;
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        Ok(empty)
    }

    if !root.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    prune(root, &mut removed)?;
    Ok(removed)
}
