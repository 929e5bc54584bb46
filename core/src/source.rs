//! Notification sources.
//!
//! The coordinator only needs `watch`/`unwatch`/`close` plus a stream of
//! [`Notification`]s. [`NotifySource`] provides both on top of `notify`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{Result, WatcherError};

/// What kind of resource is being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// A directory whose entries come and go.
    Directory,

    /// A single file whose content changes.
    File,
}

/// A change reported for a registered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The entry list of a watched directory may have changed.
    DirectoryChanged(PathBuf),

    /// A watched file may have changed.
    FileChanged(PathBuf),
}

/// Registers resources with an underlying change notifier.
pub trait NotificationSource {
    /// Start reporting changes for `path`.
    fn watch(&mut self, path: &Path, target: WatchTarget) -> Result<()>;

    /// Stop reporting changes for `path`.
    fn unwatch(&mut self, path: &Path) -> Result<()>;

    /// Drop every registration. Calling it twice is harmless.
    fn close(&mut self);
}

/// Paths currently registered, split by target kind.
#[derive(Debug, Default, Clone)]
pub struct Registrations {
    directories: HashSet<PathBuf>,
    files: HashSet<PathBuf>,
}

impl Registrations {
    /// Record a registration.
    pub fn insert(&mut self, path: &Path, target: WatchTarget) {
        match target {
            WatchTarget::Directory => self.directories.insert(path.to_path_buf()),
            WatchTarget::File => self.files.insert(path.to_path_buf()),
        };
    }

    /// Forget a registration of either kind.
    pub fn remove(&mut self, path: &Path) {
        self.directories.remove(path);
        self.files.remove(path);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.directories.clear();
        self.files.clear();
    }
}

/// Turn a raw `notify` event into notifications for registered paths.
///
/// A path that is a registered file yields `FileChanged`. A structural
/// change (create, remove, rename) of an entry inside a registered
/// directory, or any event on the directory itself, yields
/// `DirectoryChanged` for that directory. Access events are dropped.
pub fn route_event(event: &Event, registrations: &Registrations) -> Vec<Notification> {
    let mut routed = Vec::new();
    let mut push = |notification: Notification| {
        if !routed.contains(&notification) {
            routed.push(notification);
        }
    };

    if event.need_rescan() {
        let mut dirs: Vec<_> = registrations.directories.iter().collect();
        dirs.sort();
        for dir in dirs {
            push(Notification::DirectoryChanged(dir.clone()));
        }
    }

    if matches!(event.kind, EventKind::Access(_)) {
        return routed;
    }

    let structural = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Any
            | EventKind::Other
    );

    for path in &event.paths {
        if registrations.files.contains(path) {
            push(Notification::FileChanged(path.clone()));
        }
        if registrations.directories.contains(path) {
            push(Notification::DirectoryChanged(path.clone()));
        } else if structural {
            if let Some(parent) = path.parent() {
                if registrations.directories.contains(parent) {
                    push(Notification::DirectoryChanged(parent.to_path_buf()));
                }
            }
        }
    }

    routed
}

/// A [`NotificationSource`] backed by the platform's recommended watcher.
pub struct NotifySource {
    /// Internal notify watcher; `None` once closed.
    watcher: Option<RecommendedWatcher>,

    /// Shared with the notify callback thread for routing.
    registrations: Arc<Mutex<Registrations>>,
}

impl NotifySource {
    /// Create a source and the receiver its notifications arrive on.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registrations = Arc::new(Mutex::new(Registrations::default()));
        let shared = registrations.clone();

        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let routed = {
                        let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        route_event(&event, &guard)
                    };
                    for notification in routed {
                        if tx.send(notification).is_err() {
                            debug!("Notification receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        Ok((
            Self {
                watcher: Some(watcher),
                registrations,
            },
            rx,
        ))
    }

    fn registrations(&self) -> std::sync::MutexGuard<'_, Registrations> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSource for NotifySource {
    fn watch(&mut self, path: &Path, target: WatchTarget) -> Result<()> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(WatcherError::NotActive);
        };

        // Register first so events racing the watch call are routed.
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, target);

        if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
            self.registrations().remove(path);
            return Err(e.into());
        }
        debug!("Started watching: {}", path.display());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.registrations().remove(path);

        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };
        match watcher.unwatch(path) {
            Ok(()) => Ok(()),
            // The OS drops watches on deleted files by itself.
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if self.watcher.take().is_some() {
            debug!("Closed notification source");
        }
        self.registrations().clear();
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.close();
    }
}
