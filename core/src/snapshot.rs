//! Point-in-time file snapshots.

use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WatchConfig;

/// A point-in-time record of one file.
///
/// `content` is only present when the file passed the text-file policy
/// of [`SnapshotLoader`] at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Basename of the file.
    pub name: String,

    /// Whether the file existed when loaded.
    pub exists: bool,

    /// Size in bytes; zero when the file does not exist.
    pub size: u64,

    /// File bytes, when loaded.
    pub content: Option<Vec<u8>>,
}

impl FileSnapshot {
    /// Snapshot of a file that does not exist.
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: false,
            size: 0,
            content: None,
        }
    }

    /// Snapshot of an existing file whose content was withheld.
    pub fn opaque(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            exists: true,
            size,
            content: None,
        }
    }

    /// Snapshot of an existing file with loaded content.
    pub fn with_content(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            exists: true,
            size: content.len() as u64,
            content: Some(content),
        }
    }

    /// Whether content was loaded.
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// Basename of a path as an owned string.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Printable per the C locale `isprint`: space through tilde.
pub fn is_printable(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

/// Loads snapshots under the text-file policy.
///
/// Content is loaded only for an existing regular file, smaller than the
/// configured limit, not executable, readable, and consisting solely of
/// printable bytes. Every failure degrades to a snapshot without content.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    max_content_bytes: u64,
    accept_whitespace: bool,
}

impl SnapshotLoader {
    /// Create a loader from a watch config.
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            max_content_bytes: config.max_content_bytes,
            accept_whitespace: config.accept_whitespace,
        }
    }

    /// Load a fresh snapshot of `path`.
    pub fn load(&self, path: &Path) -> FileSnapshot {
        let name = basename(path);

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("No metadata for {}: {e}", path.display());
                return FileSnapshot::absent(name);
            }
        };

        let size = metadata.len();
        match self.read_content(path, &metadata) {
            Some(content) => FileSnapshot {
                name,
                exists: true,
                size,
                content: Some(content),
            },
            None => FileSnapshot::opaque(name, size),
        }
    }

    fn read_content(&self, path: &Path, metadata: &Metadata) -> Option<Vec<u8>> {
        if !metadata.is_file() {
            debug!("Not a regular file: {}", path.display());
            return None;
        }
        let size = metadata.len();
        if size >= self.max_content_bytes {
            debug!("Too large to load ({size} bytes): {}", path.display());
            return None;
        }
        if is_executable(metadata) {
            debug!("Executable, content skipped: {}", path.display());
            return None;
        }

        let mut content = Vec::with_capacity(size as usize);
        let read = File::open(path).and_then(|file| {
            // One byte past the expected size so growth shows up as a mismatch.
            file.take(size + 1).read_to_end(&mut content)
        });
        match read {
            Ok(n) if n as u64 == size => {}
            Ok(n) => {
                debug!(
                    "Size changed while reading {} (expected {size}, got {n})",
                    path.display()
                );
                return None;
            }
            Err(e) => {
                debug!("Failed to read {}: {e}", path.display());
                return None;
            }
        }

        if !content.iter().all(|&b| self.accepts(b)) {
            debug!("Non-printable content: {}", path.display());
            return None;
        }
        Some(content)
    }

    fn accepts(&self, byte: u8) -> bool {
        is_printable(byte) || (self.accept_whitespace && matches!(byte, b'\t' | b'\n' | b'\r'))
    }
}

impl Default for SnapshotLoader {
    fn default() -> Self {
        Self::new(&WatchConfig::default())
    }
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}
