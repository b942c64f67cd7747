//! Per-file ingest pipeline and the worker pool that runs it.
//!
//! Each worker takes one [`PendingFile`] at a time and walks it through
//! stabilize → read → decode → upload → notify → delete. Every failure is
//! logged and folded into a [`FileOutcome`]; nothing escapes a worker's loop,
//! so one bad file never stops the pool.

use crate::decoder::{decode_dimensions_blocking, Dimensions};
use crate::media::ImageKind;
use crate::notifier::{Notifier, UploadRecord};
use crate::queue::{IngestQueue, PendingFile};
use crate::stability::is_ready;
use crate::storage::{raw_object_key, ObjectStore};
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// How far a file got through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Uploaded and the processing API answered with `status`.
    Notified { status: u16 },
    /// Uploaded, but the notification request itself failed.
    NotifyFailed,
    /// Still being written (or gone); left untouched.
    NotReady,
    /// Could not be read from disk.
    ReadFailed,
    /// Not a decodable JPEG/PNG; never uploaded.
    NotAnImage,
    /// Object storage rejected the upload; no notification sent.
    UploadFailed,
}

impl FileOutcome {
    fn label(&self) -> &'static str {
        match self {
            FileOutcome::Notified { .. } => "notified",
            FileOutcome::NotifyFailed => "notify",
            FileOutcome::NotReady => "not_ready",
            FileOutcome::ReadFailed => "read",
            FileOutcome::NotAnImage => "not_an_image",
            FileOutcome::UploadFailed => "upload",
        }
    }
}

/// Runs the ingest pipeline for one file at a time.
pub struct FileProcessor {
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    event_id: String,
    user_id: String,
    settle: Duration,
}

impl FileProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        event_id: impl Into<String>,
        user_id: impl Into<String>,
        settle: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            event_id: event_id.into(),
            user_id: user_id.into(),
            settle,
        }
    }

    /// Run the whole pipeline for `file`.
    ///
    /// Files that are not ready are left where they are. For every other
    /// outcome the local file is removed before returning.
    #[instrument(skip(self, file), fields(path = %file.path().display()))]
    pub async fn process(&self, file: &PendingFile) -> FileOutcome {
        if !is_ready(file.path(), self.settle).await {
            warn!("File not ready, abandoning this attempt");
            metrics::counter!("ingest.files.skipped", "reason" => "not_ready").increment(1);
            return FileOutcome::NotReady;
        }

        let outcome = self.ingest(file).await;

        match &outcome {
            FileOutcome::Notified { status } => {
                info!(status, "File ingested");
                metrics::counter!("ingest.files.uploaded").increment(1);
            }
            FileOutcome::NotAnImage => {
                metrics::counter!("ingest.files.skipped", "reason" => "not_an_image").increment(1);
            }
            other => {
                metrics::counter!("ingest.files.failed", "stage" => other.label()).increment(1);
            }
        }

        remove_local(file.path()).await;
        outcome
    }

    async fn ingest(&self, file: &PendingFile) -> FileOutcome {
        let path = file.path();
        let image_name = file.file_name();

        let data = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                error!(error = %e, "Failed to read file");
                return FileOutcome::ReadFailed;
            }
        };
        debug!(size_bytes = data.len(), "File read");

        let Some(Dimensions { width, height }) = decode_dimensions_blocking(data.clone()).await
        else {
            info!("Not a decodable JPEG/PNG, skipping upload");
            return FileOutcome::NotAnImage;
        };
        debug!(width, height, "Image decoded");

        let mime_type = ImageKind::from_path(path)
            .map(|kind| kind.content_type())
            .unwrap_or("application/octet-stream");
        let key = raw_object_key(&self.event_id, &self.user_id, &image_name);

        let object_store_id = match self.store.put(&key, data, mime_type).await {
            Ok(version_id) => version_id,
            Err(e) => {
                error!(key = %key, error = %e, "Upload failed, not notifying");
                return FileOutcome::UploadFailed;
            }
        };

        let record = UploadRecord {
            event_id: self.event_id.clone(),
            image_name: image_name.clone(),
            mime_type: mime_type.to_string(),
            object_store_id,
            path: image_name,
            user_id: self.user_id.clone(),
            width,
            height,
        };

        match self.notifier.notify(&record).await {
            Ok(status) => FileOutcome::Notified { status },
            Err(e) => {
                error!(key = %key, error = %e, "Notification failed");
                FileOutcome::NotifyFailed
            }
        }
    }
}

/// Delete a processed file if it is still present. Failures are logged only.
async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted local file");
            metrics::counter!("ingest.files.deleted").increment(1);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Local file already gone");
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to delete local file");
        }
    }
}

/// Counters describing pool activity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Files currently inside the pipeline
    pub in_flight: usize,
    /// Highest `in_flight` seen since the pool started
    pub peak_in_flight: usize,
    /// Files that finished the pipeline, whatever the outcome
    pub completed: u64,
}

/// Marks one file as in flight for as long as it lives, including when the
/// worker is aborted mid-file.
struct InFlight {
    stats: Arc<Mutex<PoolStats>>,
}

impl InFlight {
    fn enter(stats: &Arc<Mutex<PoolStats>>) -> Self {
        {
            let mut s = stats.lock();
            s.in_flight += 1;
            s.peak_in_flight = s.peak_in_flight.max(s.in_flight);
            metrics::gauge!("ingest.workers.in_flight").set(s.in_flight as f64);
        }
        Self {
            stats: stats.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut s = self.stats.lock();
        s.in_flight -= 1;
        metrics::gauge!("ingest.workers.in_flight").set(s.in_flight as f64);
    }
}

/// Fixed set of long-lived workers draining the ingest queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime.
    pub fn spawn(count: usize, queue: IngestQueue, processor: Arc<FileProcessor>) -> Self {
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let handles = (0..count)
            .map(|worker_id| {
                let queue = queue.clone();
                let processor = processor.clone();
                let stats = stats.clone();
                tokio::spawn(run_worker(worker_id, queue, processor, stats))
            })
            .collect();

        info!(workers = count, "Worker pool started");
        Self { handles, stats }
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Abort every worker and wait for the tasks to finish unwinding.
    ///
    /// Files mid-pipeline are abandoned where they stand.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(error = %e, "Worker task failed");
                }
            }
        }

        let stats = self.stats.lock().clone();
        info!(
            completed = stats.completed,
            abandoned = stats.in_flight,
            peak_in_flight = stats.peak_in_flight,
            "Worker pool stopped"
        );
    }
}

async fn run_worker(
    worker_id: usize,
    queue: IngestQueue,
    processor: Arc<FileProcessor>,
    stats: Arc<Mutex<PoolStats>>,
) {
    debug!(worker_id, "Worker started");

    while let Some(file) = queue.dequeue().await {
        let in_flight = InFlight::enter(&stats);

        let result = AssertUnwindSafe(processor.process(&file))
            .catch_unwind()
            .await;

        match result {
            Ok(outcome) => {
                debug!(worker_id, path = %file.path().display(), outcome = ?outcome, "File finished");
            }
            Err(_) => {
                error!(worker_id, path = %file.path().display(), "Pipeline panicked, continuing");
            }
        }

        stats.lock().completed += 1;
        drop(in_flight);
    }

    debug!(worker_id, "Worker stopped: queue closed");
}
