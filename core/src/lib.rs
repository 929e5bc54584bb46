//! # Directory Watcher
//!
//! Tracks the regular files of one directory and turns raw change
//! notifications into readable change events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       WatchCoordinator                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Notification ──► reconcile ──► SnapshotLoader ──► classify    │
//! │       ▲                                               │         │
//! │       │                                               ▼         │
//! │  NotifySource                                    EventStream    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Directory notifications merge-diff the watch set against the live
//!   listing and add or drop files.
//! - File notifications reload the file and diff it against the cached
//!   snapshot: size changes, in-place edits, and appended tails.
//! - The first population of a freshly opened directory emits no change
//!   messages.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod reconcile;
pub mod snapshot;
pub mod source;

pub use classify::{ChangeKind, Classification, classify};
pub use config::WatchConfig;
pub use coordinator::{TrackedFile, WatchCoordinator, run};
pub use error::{Result, WatcherError};
pub use event::{EventStream, WatchEvent, WatchEventKind};
pub use reconcile::{WatchDelta, is_listed, list_directory, reconcile};
pub use snapshot::{FileSnapshot, SnapshotLoader};
pub use source::{Notification, NotificationSource, NotifySource, WatchTarget};
