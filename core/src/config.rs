//! Configuration for directory watching.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WatcherError};

/// Files at or above this size never have their content loaded (10 MiB).
pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for a directory watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Content is only loaded for files strictly smaller than this.
    pub max_content_bytes: u64,

    /// Whether dot-files are part of the directory listing.
    pub include_hidden: bool,

    /// Whether a symlink to a regular file is listed as a file.
    pub follow_symlinks: bool,

    /// Also accept tab, newline and carriage return as text bytes.
    pub accept_whitespace: bool,
}

impl WatchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            include_hidden: false,
            follow_symlinks: true,
            accept_whitespace: false,
        }
    }

    /// Set the content size limit.
    pub fn with_max_content_bytes(mut self, limit: u64) -> Self {
        self.max_content_bytes = limit;
        self
    }

    /// List dot-files too.
    pub fn include_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    /// Treat symlinks as opaque entries instead of following them.
    pub fn no_follow_symlinks(mut self) -> Self {
        self.follow_symlinks = false;
        self
    }

    /// Load content of multi-line text files too.
    pub fn accept_whitespace(mut self) -> Self {
        self.accept_whitespace = true;
        self
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_content_bytes == 0 {
            return Err(WatcherError::Config(
                "max_content_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    ///
    /// An explicitly named file must exist. Without one, the per-user
    /// default location is tried and defaults are used if it is absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(&path).map_err(|e| {
            WatcherError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// `$XDG_CONFIG_HOME/dirwatch/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}
