//! Watch-set reconciliation.
//!
//! Computes the add/remove delta between the paths currently watched and
//! a live directory listing with a single sorted merge.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::WatchConfig;

/// One step of a reconciliation delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchDelta {
    /// Listed but not yet watched.
    Add(PathBuf),

    /// Watched but no longer listed.
    Remove(PathBuf),
}

impl WatchDelta {
    /// The path this step applies to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Add(path) | Self::Remove(path) => path,
        }
    }
}

/// Byte-wise ordering of two paths.
///
/// `Path`'s own `Ord` compares component by component, which differs from
/// plain string ordering (`a/b` vs `a.b`), so paths are compared as raw
/// bytes instead.
pub fn cmp_paths(a: &Path, b: &Path) -> Ordering {
    a.as_os_str()
        .as_encoded_bytes()
        .cmp(b.as_os_str().as_encoded_bytes())
}

/// Sort paths in byte-wise order.
pub fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| cmp_paths(a, b));
}

/// Merge-diff two byte-wise sorted path sequences.
///
/// Paths only in `listed` yield [`WatchDelta::Add`], paths only in
/// `watched` yield [`WatchDelta::Remove`]; the result is in ascending path
/// order.
pub fn reconcile(watched: &[PathBuf], listed: &[PathBuf]) -> Vec<WatchDelta> {
    let mut delta = Vec::new();
    let mut w = 0;
    let mut l = 0;

    while w < watched.len() || l < listed.len() {
        let order = match (watched.get(w), listed.get(l)) {
            (Some(a), Some(b)) => cmp_paths(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };

        match order {
            Ordering::Less => {
                delta.push(WatchDelta::Remove(watched[w].clone()));
                w += 1;
            }
            Ordering::Greater => {
                delta.push(WatchDelta::Add(listed[l].clone()));
                l += 1;
            }
            Ordering::Equal => {
                w += 1;
                l += 1;
            }
        }
    }

    delta
}

/// List the regular files directly inside `dir`, byte-wise sorted.
///
/// Sub-directories are skipped. Entries that vanish during the walk are
/// skipped too; only a failure to read `dir` itself is an error.
pub fn list_directory(dir: &Path, config: &WatchConfig) -> io::Result<Vec<PathBuf>> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(config.follow_symlinks);

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed")));
            }
            Err(_) => continue,
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if !config.include_hidden && is_hidden(entry.file_name()) {
            continue;
        }
        files.push(entry.into_path());
    }

    sort_paths(&mut files);
    Ok(files)
}

/// Whether [`list_directory`] of the parent would include `path`.
pub fn is_listed(path: &Path, config: &WatchConfig) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    if !config.include_hidden && is_hidden(name) {
        return false;
    }
    let metadata = if config.follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    };
    metadata.is_ok_and(|m| m.is_file())
}

fn is_hidden(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}
