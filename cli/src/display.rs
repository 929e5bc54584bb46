//! Terminal rendering of watch events.

use std::collections::BTreeSet;
use std::path::PathBuf;

use dirwatch_core::{WatchEvent, WatchEventKind};
use tracing::warn;

/// Turns events into output lines, keeping the tracked-name list and the
/// title hint between events.
pub struct Display {
    json: bool,
    tracked: BTreeSet<String>,
    list_dirty: bool,
    title: Option<(PathBuf, usize)>,
}

impl Display {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            tracked: BTreeSet::new(),
            list_dirty: false,
            title: None,
        }
    }

    /// Lines to print for `event`, possibly none.
    pub fn render(&mut self, event: &WatchEvent) -> Vec<String> {
        if self.json {
            return match serde_json::to_string(event) {
                Ok(line) => vec![line],
                Err(e) => {
                    warn!("Failed to serialize event: {e}");
                    Vec::new()
                }
            };
        }

        let mut lines = Vec::new();
        match &event.kind {
            WatchEventKind::Added { name, .. } => {
                self.list_dirty |= self.tracked.insert(name.clone());
            }
            WatchEventKind::Removed { name, .. } => {
                self.list_dirty |= self.tracked.remove(name);
                lines.extend(self.take_list());
            }
            WatchEventKind::Reconciled { directory, tracked } => {
                let title = (directory.clone(), *tracked);
                if self.title.as_ref() != Some(&title) {
                    lines.push(format!("== {} ({tracked} files) ==", directory.display()));
                    self.title = Some(title);
                }
                lines.extend(self.take_list());
            }
            WatchEventKind::Changed { .. } | WatchEventKind::DirectoryUnavailable { .. } => {
                lines.extend(event.log_line());
            }
        }
        lines
    }

    fn take_list(&mut self) -> Option<String> {
        if !self.list_dirty {
            return None;
        }
        self.list_dirty = false;
        let names: Vec<_> = self.tracked.iter().map(String::as_str).collect();
        Some(format!("tracking: [{}]", names.join(", ")))
    }
}
