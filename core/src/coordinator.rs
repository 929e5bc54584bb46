//! The watch coordinator.
//!
//! Owns the tracked files of one open directory and turns directory and
//! file notifications into [`WatchEvent`]s.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classify::{Classification, classify};
use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};
use crate::event::{EventStream, WatchEvent, WatchEventKind};
use crate::reconcile::{WatchDelta, is_listed, list_directory, reconcile, sort_paths};
use crate::snapshot::{FileSnapshot, SnapshotLoader};
use crate::source::{Notification, NotificationSource, WatchTarget};

/// A watched file with its last-seen snapshot.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    /// Full path registered with the source.
    pub path: PathBuf,

    /// Most recent snapshot, the baseline for the next diff.
    pub snapshot: FileSnapshot,
}

/// Raw basename of `path`, the key of the tracked map.
fn file_key(path: &Path) -> OsString {
    path.file_name().map(OsStr::to_os_string).unwrap_or_default()
}

/// State of one open directory.
struct Session<S> {
    directory: PathBuf,
    source: S,
    /// Keyed by raw basename; the single record of what is watched.
    tracked: BTreeMap<OsString, TrackedFile>,
    events: mpsc::UnboundedSender<WatchEvent>,
    initialized: bool,
}

impl<S: NotificationSource> Session<S> {
    fn emit(&self, kind: WatchEventKind) {
        // A dropped stream just means nobody is listening.
        let _ = self.events.send(WatchEvent::new(kind));
    }

    fn emit_classification(&self, classification: Classification) {
        let Classification {
            kind,
            name,
            messages,
        } = classification;
        for message in messages {
            debug!("{message}");
            self.emit(WatchEventKind::Changed {
                kind,
                name: name.clone(),
                message,
            });
        }
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.tracked.values().map(|t| t.path.clone()).collect();
        sort_paths(&mut paths);
        paths
    }

    /// Register a file with the source. Done before its snapshot is loaded
    /// so a write racing the load still produces a notification.
    fn register(&mut self, path: &Path) {
        if let Err(e) = self.source.watch(path, WatchTarget::File) {
            warn!("Failed to watch {}: {e}", path.display());
        }
    }

    fn deregister(&mut self, path: &Path) {
        if let Err(e) = self.source.unwatch(path) {
            warn!("Failed to unwatch {}: {e}", path.display());
        }
    }

    /// Remember the snapshot of a registered file.
    fn insert(&mut self, path: PathBuf, snapshot: FileSnapshot) {
        let name = snapshot.name.clone();
        self.tracked.insert(
            file_key(&path),
            TrackedFile {
                path: path.clone(),
                snapshot,
            },
        );
        self.emit(WatchEventKind::Added { name, path });
    }

    /// Deregister a file and forget its snapshot.
    fn untrack(&mut self, key: &OsStr) {
        let Some(tracked) = self.tracked.remove(key) else {
            return;
        };
        self.deregister(&tracked.path);
        self.emit(WatchEventKind::Removed {
            name: tracked.snapshot.name,
            path: tracked.path,
        });
    }
}

/// Coordinates snapshot loading, reconciliation and classification for
/// at most one open directory at a time.
///
/// All handlers run to completion on the caller's thread; nothing here is
/// re-entrant.
pub struct WatchCoordinator<S: NotificationSource> {
    config: WatchConfig,
    loader: SnapshotLoader,
    session: Option<Session<S>>,
}

impl<S: NotificationSource> WatchCoordinator<S> {
    /// Create an idle coordinator.
    pub fn new(config: WatchConfig) -> Self {
        Self {
            loader: SnapshotLoader::new(&config),
            config,
            session: None,
        }
    }

    /// Whether a directory is open.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The open directory, used as the window title hint.
    pub fn directory(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.directory.as_path())
    }

    /// Basenames currently watched, in order.
    pub fn tracked_names(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| s.tracked.values().map(|t| t.snapshot.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Look up a tracked file by basename.
    pub fn tracked(&self, name: &str) -> Option<&TrackedFile> {
        self.session
            .as_ref()
            .and_then(|s| s.tracked.get(OsStr::new(name)))
    }

    /// Start watching `dir` through `source`, closing any previous watch.
    ///
    /// Every file already present is tracked without classifier messages.
    /// The returned stream carries all later events until the directory is
    /// closed.
    pub fn open_directory(&mut self, dir: &Path, mut source: S) -> Result<EventStream> {
        self.close_directory();

        if !dir.exists() {
            return Err(WatcherError::DirectoryNotFound(dir.display().to_string()));
        }
        if !dir.is_dir() {
            return Err(WatcherError::NotADirectory(dir.display().to_string()));
        }

        source.watch(dir, WatchTarget::Directory)?;
        info!("Watching directory: {}", dir.display());

        let (events, stream) = EventStream::channel();
        self.session = Some(Session {
            directory: dir.to_path_buf(),
            source,
            tracked: BTreeMap::new(),
            events,
            initialized: false,
        });

        self.reconcile_directory();
        if let Some(session) = self.session.as_mut() {
            session.initialized = true;
        }
        Ok(stream)
    }

    /// Stop watching and forget every tracked file. No-op when idle.
    pub fn close_directory(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.source.close();
        info!(
            "Stopped watching {} ({} files)",
            session.directory.display(),
            session.tracked.len()
        );
    }

    /// Dispatch a notification to the matching handler.
    pub fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::DirectoryChanged(dir) => self.on_directory_notification(&dir),
            Notification::FileChanged(path) => self.on_file_notification(&path),
        }
    }

    /// Reconcile the watch set against the live listing of `dir`.
    pub fn on_directory_notification(&mut self, dir: &Path) {
        match self.session.as_ref().map(|s| s.directory == dir) {
            Some(true) => self.reconcile_directory(),
            Some(false) => debug!("Ignoring notification for foreign directory {}", dir.display()),
            None => debug!("Ignoring directory notification while idle"),
        }
    }

    /// Diff `path` against its cached snapshot.
    ///
    /// An untracked path is adopted only when a listing of the directory
    /// would include it.
    pub fn on_file_notification(&mut self, path: &Path) {
        let loader = &self.loader;
        let config = &self.config;
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring file notification while idle");
            return;
        };
        if path.parent() != Some(session.directory.as_path()) {
            debug!("Ignoring notification outside {}", session.directory.display());
            return;
        }

        let key = file_key(path);
        let adopt = !session.tracked.contains_key(&key) && is_listed(path, config);
        if !adopt && !session.tracked.contains_key(&key) && fs::symlink_metadata(path).is_ok() {
            debug!("Ignoring unlisted entry {}", path.display());
            return;
        }
        if adopt {
            session.register(path);
        }

        let current = loader.load(path);
        let previous = match session.tracked.get(&key) {
            Some(tracked) => tracked.snapshot.clone(),
            None => {
                debug!("No cached snapshot for {}", current.name);
                FileSnapshot::absent(current.name.clone())
            }
        };
        session.emit_classification(classify(&previous, &current));

        if !current.exists {
            if adopt {
                session.deregister(path);
            } else {
                session.untrack(&key);
            }
        } else if let Some(tracked) = session.tracked.get_mut(&key) {
            tracked.snapshot = current;
        } else if adopt {
            session.insert(path.to_path_buf(), current);
        }
    }

    fn reconcile_directory(&mut self) {
        let loader = &self.loader;
        let config = &self.config;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let (listed, available) = match list_directory(&session.directory, config) {
            Ok(listed) => (listed, true),
            Err(e) => {
                warn!("Cannot list {}: {e}", session.directory.display());
                session.emit(WatchEventKind::DirectoryUnavailable {
                    directory: session.directory.clone(),
                });
                (Vec::new(), false)
            }
        };

        let delta = reconcile(&session.watched_paths(), &listed);
        debug!(
            "Reconciled {}: {} changes",
            session.directory.display(),
            delta.len()
        );

        for step in delta {
            match step {
                WatchDelta::Add(path) => {
                    session.register(&path);
                    let current = loader.load(&path);
                    if session.initialized {
                        let previous = FileSnapshot::absent(current.name.clone());
                        session.emit_classification(classify(&previous, &current));
                    }
                    session.insert(path, current);
                }
                WatchDelta::Remove(path) => {
                    let key = file_key(&path);
                    let current = loader.load(&path);
                    if let Some(tracked) = session.tracked.get(&key) {
                        session.emit_classification(classify(&tracked.snapshot, &current));
                    }
                    session.untrack(&key);
                }
            }
        }

        if available {
            session.emit(WatchEventKind::Reconciled {
                directory: session.directory.clone(),
                tracked: session.tracked.len(),
            });
        }
    }
}

impl<S: NotificationSource> Drop for WatchCoordinator<S> {
    fn drop(&mut self) {
        self.close_directory();
    }
}

/// Feed notifications into `coordinator` one at a time until the channel
/// closes.
pub async fn run<S: NotificationSource>(
    coordinator: &mut WatchCoordinator<S>,
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
) {
    while let Some(notification) = notifications.recv().await {
        coordinator.handle(notification);
    }
    debug!("Notification channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    use crate::classify::ChangeKind;

    #[derive(Debug, Default)]
    struct Calls {
        watched: Vec<PathBuf>,
        unwatched: Vec<PathBuf>,
        closed: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingSource {
        calls: Arc<Mutex<Calls>>,
    }

    impl NotificationSource for RecordingSource {
        fn watch(&mut self, path: &Path, _target: WatchTarget) -> Result<()> {
            self.calls.lock().unwrap().watched.push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> Result<()> {
            self.calls.lock().unwrap().unwatched.push(path.to_path_buf());
            Ok(())
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().closed += 1;
        }
    }

    fn messages(stream: &mut EventStream) -> Vec<String> {
        stream.drain().iter().filter_map(WatchEvent::log_line).collect()
    }

    fn open(dir: &Path) -> (WatchCoordinator<RecordingSource>, RecordingSource, EventStream) {
        let source = RecordingSource::default();
        let mut coordinator = WatchCoordinator::new(WatchConfig::default());
        let stream = coordinator.open_directory(dir, source.clone()).unwrap();
        (coordinator, source, stream)
    }

    #[test]
    fn test_bootstrap_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"aaa").unwrap();
        fs::write(temp_dir.path().join("b.txt"), b"bbb").unwrap();

        let (coordinator, source, mut stream) = open(temp_dir.path());

        assert_eq!(coordinator.tracked_names(), vec!["a.txt", "b.txt"]);
        assert_eq!(coordinator.directory(), Some(temp_dir.path()));
        assert!(messages(&mut stream).is_empty());
        assert_eq!(source.calls.lock().unwrap().watched.len(), 3);
    }

    #[test]
    fn test_append_reports_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log.txt");
        fs::write(&path, b"0123456789").unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());
        stream.drain();

        fs::write(&path, b"0123456789ABCDE").unwrap();
        coordinator.on_file_notification(&path);

        assert_eq!(
            messages(&mut stream),
            vec![
                "MOD[log.txt]: File size changed from 10 to 15.".to_string(),
                "ABCDE".to_string(),
            ]
        );
        let tracked = coordinator.tracked("log.txt").unwrap();
        assert_eq!(tracked.snapshot.size, 15);
    }

    #[test]
    fn test_repeated_notification_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("same.txt");
        fs::write(&path, b"same").unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());
        stream.drain();

        coordinator.on_file_notification(&path);
        assert!(messages(&mut stream).is_empty());
    }

    #[test]
    fn test_file_deletion_untracks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.txt");
        fs::write(&path, b"abc").unwrap();
        let (mut coordinator, source, mut stream) = open(temp_dir.path());
        stream.drain();

        fs::remove_file(&path).unwrap();
        coordinator.on_file_notification(&path);

        let events = stream.drain();
        assert!(events.iter().any(|e| e.kind
            == WatchEventKind::Changed {
                kind: ChangeKind::Del,
                name: "gone.txt".to_string(),
                message: "DEL[gone.txt]: File size changed from 3 to 0.".to_string(),
            }));
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            WatchEventKind::Removed { name, .. } if name == "gone.txt"
        )));
        assert!(coordinator.tracked_names().is_empty());
        assert_eq!(source.calls.lock().unwrap().unwatched, vec![path]);

        // The directory notification that follows finds nothing left to do.
        coordinator.on_directory_notification(temp_dir.path());
        assert!(messages(&mut stream).is_empty());
    }

    #[test]
    fn test_unknown_path_is_unk() {
        let temp_dir = TempDir::new().unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());

        coordinator.on_file_notification(&temp_dir.path().join("ghost.txt"));
        assert_eq!(messages(&mut stream), vec!["UNK[ghost.txt]: Empty file."]);
        assert!(coordinator.tracked_names().is_empty());
    }

    #[test]
    fn test_unknown_existing_path_is_adopted() {
        let temp_dir = TempDir::new().unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());

        let path = temp_dir.path().join("early.txt");
        fs::write(&path, b"hi").unwrap();
        coordinator.on_file_notification(&path);

        assert_eq!(
            messages(&mut stream),
            vec!["ADD[early.txt]: File size changed from 0 to 2."]
        );
        assert_eq!(coordinator.tracked_names(), vec!["early.txt"]);

        // Already tracked, so reconciliation does not report it again.
        coordinator.on_directory_notification(temp_dir.path());
        assert!(messages(&mut stream).is_empty());
    }

    #[test]
    fn test_foreign_paths_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        fs::write(other.path().join("x.txt"), b"x").unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());
        stream.drain();

        coordinator.on_file_notification(&other.path().join("x.txt"));
        coordinator.on_directory_notification(other.path());
        assert!(stream.drain().is_empty());
    }

    #[test]
    fn test_vanished_directory_drops_everything() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("watched");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a.txt"), b"a").unwrap();
        let (mut coordinator, _source, mut stream) = open(&dir);
        stream.drain();

        fs::remove_dir_all(&dir).unwrap();
        coordinator.on_directory_notification(&dir);

        assert_eq!(
            messages(&mut stream),
            vec![
                format!("NOTFOUND[{}]", dir.display()),
                "DEL[a.txt]: File size changed from 1 to 0.".to_string(),
            ]
        );
        assert!(coordinator.is_active());
        assert!(coordinator.tracked_names().is_empty());
    }

    #[test]
    fn test_failed_listing_is_not_reconciled() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("watched");
        fs::create_dir(&dir).unwrap();
        let (mut coordinator, _source, mut stream) = open(&dir);
        assert!(
            stream
                .drain()
                .iter()
                .any(|e| matches!(e.kind, WatchEventKind::Reconciled { .. }))
        );

        fs::remove_dir_all(&dir).unwrap();
        coordinator.on_directory_notification(&dir);

        let events = stream.drain();
        assert!(
            events
                .iter()
                .any(|e| matches!(e.kind, WatchEventKind::DirectoryUnavailable { .. }))
        );
        assert!(
            !events
                .iter()
                .any(|e| matches!(e.kind, WatchEventKind::Reconciled { .. }))
        );
    }

    #[test]
    fn test_unlisted_entries_are_not_adopted() {
        let temp_dir = TempDir::new().unwrap();
        let (mut coordinator, source, mut stream) = open(temp_dir.path());
        stream.drain();

        let sub = temp_dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let hidden = temp_dir.path().join(".hidden");
        fs::write(&hidden, b"h").unwrap();
        coordinator.on_file_notification(&sub);
        coordinator.on_file_notification(&hidden);

        assert!(stream.drain().is_empty());
        assert!(coordinator.tracked_names().is_empty());
        assert_eq!(source.calls.lock().unwrap().watched, vec![temp_dir.path().to_path_buf()]);

        // Reconciliation agrees: nothing to add, nothing to remove.
        coordinator.on_directory_notification(temp_dir.path());
        assert!(messages(&mut stream).is_empty());
    }

    /// Appends a byte to every file it is asked to watch.
    struct TouchingSource;

    impl NotificationSource for TouchingSource {
        fn watch(&mut self, path: &Path, target: WatchTarget) -> Result<()> {
            if target == WatchTarget::File {
                let mut content = fs::read(path)?;
                content.push(b'!');
                fs::write(path, content)?;
            }
            Ok(())
        }

        fn unwatch(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_files_are_watched_before_loading() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("boot.txt"), b"abc").unwrap();
        let mut coordinator = WatchCoordinator::new(WatchConfig::default());
        let mut stream = coordinator
            .open_directory(temp_dir.path(), TouchingSource)
            .unwrap();
        stream.drain();
        assert_eq!(coordinator.tracked("boot.txt").unwrap().snapshot.size, 4);

        // Reconciliation add.
        fs::write(temp_dir.path().join("listed.txt"), b"ab").unwrap();
        coordinator.on_directory_notification(temp_dir.path());
        assert_eq!(coordinator.tracked("listed.txt").unwrap().snapshot.size, 3);

        // Adoption from a file notification.
        let early = temp_dir.path().join("early.txt");
        fs::write(&early, b"hi").unwrap();
        coordinator.on_file_notification(&early);
        assert_eq!(coordinator.tracked("early.txt").unwrap().snapshot.size, 3);
        assert_eq!(
            messages(&mut stream)
                .into_iter()
                .filter(|m| m.starts_with("ADD["))
                .collect::<Vec<_>>(),
            vec![
                "ADD[listed.txt]: File size changed from 0 to 3.",
                "ADD[early.txt]: File size changed from 0 to 3.",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_distinct() {
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"\xff.txt")), b"1").unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"\xfe.txt")), b"2").unwrap();

        let (mut coordinator, source, mut stream) = open(temp_dir.path());
        stream.drain();
        assert_eq!(coordinator.tracked_names().len(), 2);
        assert_eq!(source.calls.lock().unwrap().watched.len(), 3);

        coordinator.on_directory_notification(temp_dir.path());
        coordinator.on_directory_notification(temp_dir.path());

        let events = stream.drain();
        assert!(
            events
                .iter()
                .all(|e| matches!(e.kind, WatchEventKind::Reconciled { tracked: 2, .. }))
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_reopen_closes_previous() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("one.txt"), b"1").unwrap();
        fs::write(second.path().join("two.txt"), b"2").unwrap();

        let (mut coordinator, first_source, mut first_stream) = open(first.path());
        let _second_stream = coordinator
            .open_directory(second.path(), RecordingSource::default())
            .unwrap();

        assert_eq!(first_source.calls.lock().unwrap().closed, 1);
        assert_eq!(coordinator.tracked_names(), vec!["two.txt"]);
        first_stream.drain();
        assert_eq!(tokio_test::block_on(first_stream.recv()), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (mut coordinator, source, _stream) = open(temp_dir.path());

        coordinator.close_directory();
        coordinator.close_directory();

        assert!(!coordinator.is_active());
        assert!(coordinator.tracked_names().is_empty());
        assert_eq!(source.calls.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut coordinator = WatchCoordinator::new(WatchConfig::default());
        let result =
            coordinator.open_directory(&temp_dir.path().join("nope"), RecordingSource::default());
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
        assert!(!coordinator.is_active());
    }

    #[tokio::test]
    async fn test_run_drains_notifications() {
        let temp_dir = TempDir::new().unwrap();
        let (mut coordinator, _source, mut stream) = open(temp_dir.path());
        stream.drain();

        fs::write(temp_dir.path().join("new.txt"), b"").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Notification::DirectoryChanged(temp_dir.path().to_path_buf()))
            .unwrap();
        drop(tx);

        run(&mut coordinator, &mut rx).await;
        assert_eq!(messages(&mut stream), vec!["ADD[new.txt]: Empty file."]);
    }
}
