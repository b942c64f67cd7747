//! Bounded multi-producer/multi-consumer queue of files awaiting ingestion.
//!
//! Producers are the bootstrap scan and the watcher's debounce tasks;
//! consumers are the pool workers. A full queue suspends producers instead of
//! dropping paths, which caps how much work can pile up behind slow uploads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// A file observed in the watch directory that has not been processed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    path: PathBuf,
}

impl PendingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used as the object name and in notifications.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Returned by [`IngestQueue::enqueue`] when every receiver is gone.
#[derive(Debug, Error)]
#[error("ingest queue closed, dropped {0:?}")]
pub struct QueueClosed(pub PathBuf);

/// Bounded FIFO shared by producers and consumers.
///
/// Cloning is cheap and every clone refers to the same queue. Consumers take
/// turns on the receiver behind an async mutex, so each enqueued path is
/// delivered to exactly one worker.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<PendingFile>,
    rx: Arc<Mutex<mpsc::Receiver<PendingFile>>>,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` pending files.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Append a path, waiting for free capacity if the queue is full.
    pub async fn enqueue(&self, path: impl Into<PathBuf>) -> Result<(), QueueClosed> {
        let file = PendingFile::new(path);
        self.tx
            .send(file)
            .await
            .map_err(|e| QueueClosed(e.0.path))?;
        metrics::counter!("ingest.files.enqueued").increment(1);
        Ok(())
    }

    /// Take the oldest pending file, waiting until one is available.
    ///
    /// Returns `None` only once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<PendingFile> {
        self.rx.lock().await.recv().await
    }

    /// Number of files currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of files the queue holds before producers block.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
