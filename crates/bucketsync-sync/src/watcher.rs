//! File watching and debounced change queue
//!
//! [`FileWatcher`] wraps the `notify` crate and turns raw OS events for one
//! directory into [`ChangeEvent`] values delivered over an mpsc channel.
//!
//! [`DebouncedChangeQueue`] coalesces bursts of events per path so that an
//! outbound workflow with a debounce window uploads a file once, after its
//! writer has gone quiet.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher  ──→  mpsc::channel  ──→  [DebouncedChangeQueue]  ──→  OutboundWorker
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the watcher → handler channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// ChangeEvent
// ============================================================================

/// A filesystem change, decoupled from `notify`'s raw event kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A file appeared (created, or moved into the directory)
    Created(PathBuf),
    /// File content was written
    Written(PathBuf),
    /// Permissions, timestamps or ownership changed
    MetadataChanged(PathBuf),
    /// A file was removed (or moved out of the directory)
    Deleted(PathBuf),
    /// A file was renamed within the watched directory
    Renamed {
        /// The original path before the rename
        old: PathBuf,
        /// The new path after the rename
        new: PathBuf,
    },
}

impl ChangeEvent {
    /// Returns the primary path of this event
    ///
    /// For rename events, this returns the new (destination) path.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p)
            | ChangeEvent::Written(p)
            | ChangeEvent::MetadataChanged(p)
            | ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }

    /// True only for content writes; these are the events that trigger an upload.
    pub fn is_content_write(&self) -> bool {
        matches!(self, ChangeEvent::Written(_))
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches one directory (non-recursively) using the OS-native mechanism
///
/// Dropping the watcher stops the OS watch and closes the event channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Creates a watcher and the receiver its events are delivered on
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new() -> notify::Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Failed to send change event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )?;

        Ok((Self { watcher }, rx))
    }

    /// Starts watching `path`; subdirectories are not followed
    ///
    /// # Errors
    /// Fails when the path does not exist, is not accessible, or the OS
    /// watch limit has been reached
    pub fn watch(&mut self, path: &Path) -> notify::Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching directory");
        Ok(())
    }
}

// ============================================================================
// Event mapping - notify::Event → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into a [`ChangeEvent`]
///
/// - `Create(*)` → `Created`
/// - `Modify(Data(*))`, `Modify(Any)` → `Written`
/// - `Modify(Metadata(*))` → `MetadataChanged`
/// - `Modify(Name(Both))` with 2 paths → `Renamed`
/// - `Modify(Name(To))` → `Created`, `Modify(Name(From))` → `Deleted`
/// - `Remove(*)` → `Deleted`
///
/// Access events, unpaired renames and `Other` return `None`.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    let change = match &event.kind {
        EventKind::Create(_) => ChangeEvent::Created(paths.first()?.clone()),

        // Some backends (and polling) can't tell what changed; treat as a write
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            ChangeEvent::Written(paths.first()?.clone())
        }

        EventKind::Modify(ModifyKind::Metadata(_)) => {
            ChangeEvent::MetadataChanged(paths.first()?.clone())
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            ChangeEvent::Renamed {
                old: paths[0].clone(),
                new: paths[1].clone(),
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            ChangeEvent::Created(paths.first()?.clone())
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            ChangeEvent::Deleted(paths.first()?.clone())
        }

        EventKind::Remove(_) => ChangeEvent::Deleted(paths.first()?.clone()),

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            return None;
        }
    };

    debug!(event = ?change, "Mapped filesystem event");
    Some(change)
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Coalesces rapid changes per path
///
/// When events for the same path arrive in quick succession only the latest
/// is kept and its timestamp is reset. [`poll`](Self::poll) releases events
/// that have been quiet for at least the debounce delay.
///
/// Timestamps come from `tokio::time`, so paused-clock tests can drive the
/// queue deterministically.
#[derive(Debug)]
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    debounce_delay: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
        }
    }

    /// Inserts or replaces the pending event for the event's path and
    /// restarts its quiet period
    pub fn push(&mut self, event: ChangeEvent) {
        let path = event.path().to_path_buf();
        debug!(path = %path.display(), event = ?event, "Enqueuing change event");
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Removes and returns every event that has settled
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let delay = self.debounce_delay;

        let settled_paths: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= delay)
            .map(|(path, _)| path.clone())
            .collect();

        let settled: Vec<ChangeEvent> = settled_paths
            .iter()
            .filter_map(|path| self.pending.remove(path))
            .map(|(event, _)| event)
            .collect();

        if !settled.is_empty() {
            debug!(count = settled.len(), "Polled settled change events");
        }

        settled
    }

    /// When the earliest pending event settles, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(_, at)| *at + self.debounce_delay)
            .min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
