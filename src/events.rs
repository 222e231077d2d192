//! Everything related to watching files for modifications, renames,
//! deletions, etc.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::ModifyKind;
use notify::EventKind;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Opaque handle identifying one registered watch.
///
/// Ids are never reused, so a file that is re-registered after rotation gets
/// a fresh id and stale events for the old one can be told apart.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WatchId(u64);

impl WatchId {
    #[doc(hidden)]
    pub fn from_raw(raw: u64) -> Self {
        WatchId(raw)
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a watched file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChangeKind {
    /// Content was written or truncated.
    Modified,
    /// The file was moved away from its path.
    Renamed,
    /// Metadata changed. Unlinking an open file is reported this way.
    AttributeChanged,
    /// The file itself was removed.
    Deleted,
    /// The watch was invalidated underneath us.
    ///
    /// `notify` has no event for this: its inotify backend drops
    /// `IN_UNMOUNT` and `IN_IGNORED`. It is raised only when the watcher
    /// reports an error naming the watched path.
    Unwatched,
    /// A rotated file's path exists again. Raised by the dispatcher's own
    /// reappearance watchers rather than the OS.
    Reappeared,
}

/// A change notification for a single watch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChangeEvent {
    pub watch: WatchId,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(watch: WatchId, kind: ChangeKind) -> Self {
        ChangeEvent { watch, kind }
    }
}

/// Maps a raw `notify` event kind onto the changes a tailer reacts to.
///
/// Windows reports `Any` for file modification, so that counts as a write.
/// [`ChangeKind::Unwatched`] never comes out of here; see its docs.
pub fn decode(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(ChangeKind::Modified)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(ChangeKind::AttributeChanged),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

struct Registry {
    inner: notify::RecommendedWatcher,
    watched: HashMap<PathBuf, WatchId>,
    next_id: u64,
}

impl Registry {
    fn lookup(&self, path: &Path) -> Option<WatchId> {
        self.watched.get(path).copied()
    }
}

/// Cloneable handle for adding and removing watches.
#[derive(Clone)]
pub struct Watches {
    registry: Arc<Mutex<Registry>>,
}

impl Debug for Watches {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Watches")
            .field("watched", &self.lock().watched)
            .finish()
    }
}

impl Watches {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watches `path` for modifications, renames, attribute changes and
    /// removal, returning a fresh id for it.
    ///
    /// A path that is already watched is replaced, and its old id stops
    /// receiving events.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<WatchId> {
        let path = path.as_ref();
        let mut registry = self.lock();

        notify::Watcher::watch(
            &mut registry.inner,
            path,
            notify::RecursiveMode::NonRecursive,
        )
        .map_err(|source| Error::Watch {
            path: path.to_path_buf(),
            source,
        })?;

        registry.next_id += 1;
        let id = WatchId(registry.next_id);
        registry.watched.insert(path.to_path_buf(), id);

        tracing::debug!(path = %path.display(), watch = %id, "added watch");

        Ok(id)
    }

    /// Removes the watch registered under `id`.
    ///
    /// The id is forgotten even if the OS already dropped the watch (e.g. the
    /// file was deleted), in which case the `notify` error is returned.
    pub fn remove(&self, id: WatchId) -> Result<(), notify::Error> {
        let mut registry = self.lock();

        let path = registry
            .watched
            .iter()
            .find(|(_, watch)| **watch == id)
            .map(|(path, _)| path.clone());

        match path {
            Some(path) => {
                // Forget first in case `unwatch` fails.
                registry.watched.remove(&path);
                tracing::debug!(path = %path.display(), watch = %id, "removing watch");
                notify::Watcher::unwatch(&mut registry.inner, &path)
            }
            None => Err(notify::Error::watch_not_found()),
        }
    }

    /// Current watch id of `path`, if it is watched.
    pub fn lookup(&self, path: impl AsRef<Path>) -> Option<WatchId> {
        self.lock().lookup(path.as_ref())
    }

    /// Number of registered watches.
    pub fn len(&self) -> usize {
        self.lock().watched.len()
    }

    /// Returns `true` if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives raw filesystem notifications and turns them into
/// [`ChangeEvent`]s on the event queue.
///
/// Internally, `Notifier` owns a [`notify::Watcher`] whose callback proxies
/// raw events onto a channel; [`Notifier::run`] decodes them.
///
/// [`notify::Watcher`]: ../notify/trait.Watcher.html
pub struct Notifier {
    watches: Watches,
    raw_events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

impl Debug for Notifier {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Notifier")
            .field("watches", &self.watches)
            .finish()
    }
}

impl Notifier {
    /// Opens the platform notification facility. Decoded events will be
    /// pushed onto `events`.
    pub fn new(events: mpsc::UnboundedSender<ChangeEvent>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // and `Notifier` controls both. `unwrap` is not used, however,
            // since `Drop` idiosyncrasies could otherwise result in a panic.
            let _ = tx.send(res);
        })
        .map_err(Error::Init)?;

        Ok(Notifier {
            watches: Watches {
                registry: Arc::new(Mutex::new(Registry {
                    inner,
                    watched: HashMap::new(),
                    next_id: 0,
                })),
            },
            raw_events: rx,
            events,
        })
    }

    /// Returns a handle for registering watches with this notifier.
    pub fn watches(&self) -> Watches {
        self.watches.clone()
    }

    /// Decodes raw notifications until `cancel` fires or the event queue is
    /// closed.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("notifier: starting");

        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("notifier: received notice to shutdown");
                    return;
                }
                res = self.raw_events.recv() => res,
            };

            let res = match res {
                Some(res) => res,
                // The watcher lives in `self`, so this cannot happen while
                // running.
                None => return,
            };

            for event in self.translate(res) {
                tracing::trace!(watch = %event.watch, kind = ?event.kind, "notifier: queueing event");
                if self.events.send(event).is_err() {
                    tracing::debug!("notifier: event queue closed, shutting down");
                    return;
                }
            }
        }
    }

    fn translate(&self, res: notify::Result<notify::Event>) -> Vec<ChangeEvent> {
        let registry = self.watches.lock();

        match res {
            Ok(event) => {
                let kind = match decode(&event.kind) {
                    Some(kind) => kind,
                    None => {
                        tracing::trace!(kind = ?event.kind, "notifier: skipping uninteresting event");
                        return Vec::new();
                    }
                };

                event
                    .paths
                    .iter()
                    .filter_map(|path| {
                        let watch = registry.lookup(path);
                        if watch.is_none() {
                            tracing::trace!(path = %path.display(), "notifier: event for unwatched path");
                        }
                        watch
                    })
                    .map(|watch| ChangeEvent::new(watch, kind))
                    .collect()
            }
            Err(err) => {
                let invalidated: Vec<ChangeEvent> = err
                    .paths
                    .iter()
                    .filter_map(|path| registry.lookup(path))
                    .map(|watch| ChangeEvent::new(watch, ChangeKind::Unwatched))
                    .collect();

                tracing::warn!(error = %err, invalidated = invalidated.len(), "notifier: error receiving event");

                invalidated
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{
        AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode,
    };
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[test]
    fn test_decode() {
        assert_eq!(
            decode(&EventKind::Modify(ModifyKind::Data(DataChange::Any))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            decode(&EventKind::Modify(ModifyKind::Any)),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            decode(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(ChangeKind::Renamed)
        );
        assert_eq!(
            decode(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            Some(ChangeKind::AttributeChanged)
        );
        assert_eq!(
            decode(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(decode(&EventKind::Create(CreateKind::File)), None);
        assert_eq!(decode(&EventKind::Access(AccessKind::Any)), None);
    }

    #[tokio::test]
    async fn test_add_remove_watch() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("watched.log");
        std::fs::write(&file_path, b"").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(tx).unwrap();
        let watches = notifier.watches();

        let first = watches.add(&file_path).unwrap();
        assert_eq!(watches.lookup(&file_path), Some(first));

        watches.remove(first).unwrap();
        assert!(watches.is_empty());

        // Ids are not reused
        let second = watches.add(&file_path).unwrap();
        assert_ne!(first, second);

        // Removing an unknown id is an error, but harmless
        assert!(watches.remove(first).is_err());
        assert_eq!(watches.len(), 1);
    }

    #[tokio::test]
    async fn test_add_missing_file() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("missing.log");

        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(tx).unwrap();

        assert!(matches!(
            notifier.watches().add(&file_path),
            Err(Error::Watch { .. })
        ));
    }

    #[tokio::test]
    async fn test_modify_event_is_queued() {
        use std::io::Write;

        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("modified.log");
        std::fs::write(&file_path, b"").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(tx).unwrap();
        let watch = notifier.watches().add(&file_path).unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(notifier.run(cancel.clone()));

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .unwrap();
        file.write_all(b"foo\n").unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert_eq!(event, ChangeEvent::new(watch, ChangeKind::Modified));

        cancel.cancel();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_error_unwatches_path() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("unmounted.log");
        let other_path = tmp_dir.path().join("other.log");
        std::fs::write(&file_path, b"").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(tx).unwrap();
        let watch = notifier.watches().add(&file_path).unwrap();

        let err = notify::Error::generic("filesystem unmounted")
            .add_path(file_path.clone())
            .add_path(other_path);
        assert_eq!(
            notifier.translate(Err(err)),
            vec![ChangeEvent::new(watch, ChangeKind::Unwatched)]
        );

        // Errors without a path can't be attributed to any watch.
        assert!(notifier
            .translate(Err(notify::Error::generic("queue overflow")))
            .is_empty());
    }
}
