//! Discovery of new files in the watch directory.
//!
//! Two producers feed the [`IngestQueue`]:
//!
//! - [`scan_existing`] lists the directory once at startup, before the live
//!   watch exists, so files dropped while the service was down are not lost.
//! - [`DirectoryWatcher`] subscribes to creation events. Events arrive on
//!   notify's own thread; each qualifying path is handed to the [`Debouncer`],
//!   which schedules a delayed enqueue as a tokio task through a runtime
//!   [`Handle`]. Delays for simultaneous events run concurrently and never
//!   hold up delivery of the next event.

use crate::media::is_supported_image;
use crate::queue::IngestQueue;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Errors that prevent watching from starting.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to list {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Directory scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Enqueue every supported image already present in `dir`, in listing order.
///
/// Returns the number of files enqueued. Waits on the queue when it is full,
/// so workers must already be draining it.
pub async fn scan_existing(dir: &Path, queue: &IngestQueue) -> Result<usize, WatchError> {
    let listing_dir = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || list_images(&listing_dir)).await??;

    let mut enqueued = 0;
    for path in files {
        trace!(path = %path.display(), "Enqueueing pre-existing file");
        if let Err(e) = queue.enqueue(path).await {
            warn!(error = %e, "Queue closed during bootstrap scan");
            break;
        }
        enqueued += 1;
    }

    info!(dir = %dir.display(), files = enqueued, "Bootstrap scan complete");
    Ok(enqueued)
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, WatchError> {
    let scan_err = |source| WatchError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(scan_err)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_supported_image(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Paths in `event` that should be treated as newly arrived files.
///
/// Creation events count, and so does the destination of a rename into the
/// directory (uploaders that write `x.jpg.part` and rename on completion).
/// A rename is also reported as a `Both` event naming the same destination;
/// only the `To` half is taken.
fn arrived_paths(event: &Event) -> Vec<&Path> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(PathBuf::as_path).collect()
        }
        _ => Vec::new(),
    }
}

/// Schedules delayed enqueues onto the tokio runtime.
///
/// [`Debouncer::schedule`] may be called from any thread. Pending delays are
/// tracked so [`Debouncer::shutdown`] can cancel them and wait for every one
/// to finish. A path already waiting out its delay is not scheduled again.
#[derive(Clone)]
pub struct Debouncer {
    handle: Handle,
    tracker: TaskTracker,
    cancel: CancellationToken,
    scheduled: Arc<Mutex<HashSet<PathBuf>>>,
    queue: IngestQueue,
    delay: Duration,
}

/// Holds a path in the scheduled set until its debounce task ends, however
/// it ends.
struct ScheduledPath {
    scheduled: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for ScheduledPath {
    fn drop(&mut self) {
        self.scheduled.lock().remove(&self.path);
    }
}

impl Debouncer {
    /// Create a debouncer bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(queue: IngestQueue, delay: Duration) -> Self {
        Self {
            handle: Handle::current(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            scheduled: Arc::default(),
            queue,
            delay,
        }
    }

    /// Enqueue `path` after the debounce delay, unless shut down first.
    pub fn schedule(&self, path: PathBuf) {
        if self.cancel.is_cancelled() {
            return;
        }
        if !self.scheduled.lock().insert(path.clone()) {
            trace!(path = %path.display(), "Enqueue already scheduled");
            return;
        }
        let scheduled_guard = ScheduledPath {
            scheduled: self.scheduled.clone(),
            path: path.clone(),
        };

        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let delay = self.delay;

        self.tracker.spawn_on(
            async move {
                let _scheduled = scheduled_guard;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => {
                        debug!(path = %path.display(), "Ignoring non-file entry");
                        return;
                    }
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "File gone before enqueue");
                        return;
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(path = %path.display(), "Debounced enqueue cancelled");
                    }
                    result = queue.enqueue(path.clone()) => {
                        match result {
                            Ok(()) => debug!(path = %path.display(), "Enqueued new file"),
                            Err(e) => warn!(error = %e, "Failed to enqueue new file"),
                        }
                    }
                }
            },
            &self.handle,
        );
    }

    /// Number of delayed enqueues still outstanding.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel outstanding delays and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Live, non-recursive watch on a single directory.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    dir: PathBuf,
    debouncer: Debouncer,
}

impl DirectoryWatcher {
    /// Subscribe to creation events in `dir`.
    ///
    /// Must be called from within the tokio runtime that serves `queue`.
    pub fn start(dir: &Path, queue: IngestQueue, debounce: Duration) -> Result<Self, WatchError> {
        let debouncer = Debouncer::new(queue, debounce);
        let callback_debouncer = debouncer.clone();

        let notify_err = |source| WatchError::Notify {
            path: dir.to_path_buf(),
            source,
        };

        let mut watcher = notify::recommended_watcher(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for path in arrived_paths(&event) {
                        if is_supported_image(path) {
                            trace!(path = %path.display(), kind = ?event.kind, "New file event");
                            callback_debouncer.schedule(path.to_path_buf());
                        }
                    }
                }
                Err(e) => error!(error = %e, "Watch error"),
            },
        )
        .map_err(notify_err)?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(notify_err)?;

        info!(dir = %dir.display(), debounce_ms = debounce.as_millis() as u64, "Watching directory");

        Ok(Self {
            watcher,
            dir: dir.to_path_buf(),
            debouncer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop receiving events, cancel pending debounces and wait for them.
    pub async fn stop(self) {
        let Self {
            mut watcher,
            dir,
            debouncer,
        } = self;

        if let Err(e) = watcher.unwatch(&dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to unwatch directory");
        }
        // Dropping the watcher shuts down notify's event thread.
        drop(watcher);

        debug!(pending = debouncer.pending(), "Cancelling debounced enqueues");
        debouncer.shutdown().await;
        info!(dir = %dir.display(), "Directory watch stopped");
    }
}
