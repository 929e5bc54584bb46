//! Domain events emitted by the coordinator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::classify::ChangeKind;

/// Something the presentation layer should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEventKind {
    /// A file joined the watch set.
    Added { name: String, path: PathBuf },

    /// A file left the watch set.
    Removed { name: String, path: PathBuf },

    /// A classifier message for one file.
    Changed {
        kind: ChangeKind,
        name: String,
        message: String,
    },

    /// A reconciliation finished; `directory` is the title hint.
    Reconciled { directory: PathBuf, tracked: usize },

    /// The watched directory could not be listed.
    DirectoryUnavailable { directory: PathBuf },
}

/// A timestamped domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// What happened.
    #[serde(flatten)]
    pub kind: WatchEventKind,

    /// When the coordinator emitted it.
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    /// Create a new event stamped with the current time.
    pub fn new(kind: WatchEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// The line to append to a display log, if any.
    pub fn log_line(&self) -> Option<String> {
        match &self.kind {
            WatchEventKind::Changed { message, .. } => Some(message.clone()),
            WatchEventKind::DirectoryUnavailable { directory } => {
                Some(format!("NOTFOUND[{}]", directory.display()))
            }
            _ => None,
        }
    }
}

/// The event feed of one open directory.
///
/// Ends once the directory is closed; a new stream is handed out by every
/// open.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl EventStream {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event; `None` once the watch is closed.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
