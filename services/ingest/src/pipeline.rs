//! Lifecycle of the ingest pipeline: startup ordering and shutdown.

use crate::config::WatchConfig;
use crate::queue::IngestQueue;
use crate::watcher::{scan_existing, DirectoryWatcher, WatchError};
use crate::worker::{FileProcessor, PoolStats, WorkerPool};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Queue, workers and watcher for one watch directory, not yet started.
pub struct IngestPipeline {
    watch: WatchConfig,
    processor: Arc<FileProcessor>,
}

impl IngestPipeline {
    pub fn new(watch: WatchConfig, processor: FileProcessor) -> Self {
        Self {
            watch,
            processor: Arc::new(processor),
        }
    }

    /// Bring the pipeline up.
    ///
    /// Workers are spawned before the bootstrap scan so pre-existing files
    /// have consumers, and the scan completes before the live watch begins so
    /// a file is never picked up by both.
    pub async fn start(self) -> Result<RunningPipeline, PipelineError> {
        let dir = self.watch.dir.clone();
        let queue = IngestQueue::new(self.watch.queue_capacity);

        let pool = WorkerPool::spawn(self.watch.worker_count, queue.clone(), self.processor);

        let existing = match scan_existing(&dir, &queue).await {
            Ok(count) => count,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Bootstrap scan failed");
                pool.shutdown().await;
                return Err(e.into());
            }
        };

        let watcher = match DirectoryWatcher::start(&dir, queue.clone(), self.watch.debounce()) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to start directory watch");
                pool.shutdown().await;
                return Err(e.into());
            }
        };

        info!(
            dir = %dir.display(),
            workers = pool.size(),
            pre_existing = existing,
            queue_capacity = queue.capacity(),
            "Ingest pipeline running"
        );

        Ok(RunningPipeline {
            queue,
            pool,
            watcher,
        })
    }

    /// Start, run until `shutdown` resolves, then stop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<PoolStats, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await?;
        shutdown.await;
        Ok(running.shutdown().await)
    }
}

/// A started pipeline. Dropping it without calling [`shutdown`] leaves the
/// worker tasks running.
///
/// [`shutdown`]: RunningPipeline::shutdown
pub struct RunningPipeline {
    queue: IngestQueue,
    pool: WorkerPool,
    watcher: DirectoryWatcher,
}

impl RunningPipeline {
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Files waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stop watching, cancel the workers and wait for both to finish.
    ///
    /// Files mid-pipeline are abandoned; anything still queued stays on disk
    /// and is picked up by the next bootstrap scan.
    pub async fn shutdown(self) -> PoolStats {
        info!(dir = %self.watcher.dir().display(), "Stopping directory watch");
        self.watcher.stop().await;

        info!(queued = self.queue.len(), "Stopping workers");
        let stats = self.pool.stats();
        self.pool.shutdown().await;

        info!(completed = stats.completed, "Ingest pipeline stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixtures;
    use crate::notifier::{MockNotifier, UploadRecord};
    use crate::storage::MockObjectStore;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn watch_config(dir: &Path) -> WatchConfig {
        WatchConfig {
            dir: dir.to_path_buf(),
            worker_count: 2,
            queue_capacity: 4,
            debounce_ms: 50,
            settle_ms: 20,
        }
    }

    type Puts = Arc<Mutex<Vec<(String, String)>>>;
    type Records = Arc<Mutex<Vec<UploadRecord>>>;

    fn recording_processor(settle: Duration) -> (FileProcessor, Puts, Records) {
        let puts: Puts = Arc::default();
        let records: Records = Arc::default();

        let mut store = MockObjectStore::new();
        let seen = puts.clone();
        store.expect_put().returning(move |key, _, content_type| {
            seen.lock().push((key.to_string(), content_type.to_string()));
            Ok(format!("v-{}", seen.lock().len()))
        });

        let mut notifier = MockNotifier::new();
        let seen = records.clone();
        notifier.expect_notify().returning(move |record| {
            seen.lock().push(record.clone());
            Ok(200)
        });

        let processor = FileProcessor::new(
            Arc::new(store),
            Arc::new(notifier),
            "1089",
            "user-1",
            settle,
        );
        (processor, puts, records)
    }

    async fn wait_until_gone(path: &Path) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was never processed", path.display()));
    }

    #[tokio::test]
    async fn test_pre_existing_file_is_ingested_at_startup() {
        let dir = TempDir::new().unwrap();
        let photo = dir.path().join("photo1.jpg");
        std::fs::write(&photo, fixtures::jpeg(800, 600)).unwrap();

        let config = watch_config(dir.path());
        let (processor, puts, records) = recording_processor(config.settle_interval());
        let running = IngestPipeline::new(config, processor).start().await.unwrap();

        wait_until_gone(&photo).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while running.stats().completed < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            puts.lock().clone(),
            vec![(
                "events/1089/user-1/raw/photo1.jpg".to_string(),
                "image/jpeg".to_string()
            )]
        );
        {
            let records = records.lock();
            assert_eq!(records.len(), 1);
            assert_eq!((records[0].width, records[0].height), (800, 600));
        }

        let stats = running.shutdown().await;
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_live_arrivals_are_ingested_and_other_files_ignored() {
        let dir = TempDir::new().unwrap();
        let config = watch_config(dir.path());
        let (processor, puts, _records) = recording_processor(config.settle_interval());
        let running = IngestPipeline::new(config, processor).start().await.unwrap();

        let notes = dir.path().join("notes.txt");
        let photo = dir.path().join("photo2.png");
        std::fs::write(&notes, b"not an image").unwrap();
        std::fs::write(&photo, fixtures::png(32, 24)).unwrap();

        wait_until_gone(&photo).await;
        // Give a stray event for notes.txt time to surface.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(notes.exists());
        assert_eq!(puts.lock().len(), 1);
        assert_eq!(puts.lock()[0].0, "events/1089/user-1/raw/photo2.png");

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_rename_into_place_is_uploaded_once() {
        let dir = TempDir::new().unwrap();
        let partial = dir.path().join("a.jpg.part");
        std::fs::write(&partial, fixtures::jpeg(16, 16)).unwrap();

        let config = watch_config(dir.path());
        let (processor, puts, records) = recording_processor(config.settle_interval());
        let running = IngestPipeline::new(config, processor).start().await.unwrap();

        let photo = dir.path().join("a.jpg");
        std::fs::rename(&partial, &photo).unwrap();

        wait_until_gone(&photo).await;
        // Leave room for a second delivery of the same path to show up.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(puts.lock().len(), 1);
        assert_eq!(puts.lock()[0].0, "events/1089/user-1/raw/a.jpg");
        assert_eq!(records.lock().len(), 1);

        let stats = running.shutdown().await;
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_backlog_larger_than_queue_is_drained() {
        let dir = TempDir::new().unwrap();
        let image = fixtures::png(4, 4);
        let paths: Vec<_> = (0..12)
            .map(|i| {
                let path = dir.path().join(format!("backlog-{i:02}.png"));
                std::fs::write(&path, &image).unwrap();
                path
            })
            .collect();

        let config = watch_config(dir.path());
        let (processor, puts, records) = recording_processor(config.settle_interval());
        let running = IngestPipeline::new(config, processor).start().await.unwrap();

        for path in &paths {
            wait_until_gone(path).await;
        }
        assert_eq!(puts.lock().len(), paths.len());
        assert_eq!(records.lock().len(), paths.len());
        assert!(running.stats().peak_in_flight <= 2);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_watch_dir_fails_startup() {
        let dir = TempDir::new().unwrap();
        let config = watch_config(&dir.path().join("does-not-exist"));
        let (processor, _, _) = recording_processor(Duration::from_millis(1));

        let result = IngestPipeline::new(config, processor).start().await;
        assert!(matches!(result, Err(PipelineError::Watch(_))));
    }

    #[tokio::test]
    async fn test_run_until_returns_after_signal() {
        let dir = TempDir::new().unwrap();
        let config = watch_config(dir.path());
        let (processor, _, _) = recording_processor(config.settle_interval());

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            IngestPipeline::new(config, processor)
                .run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(stats.completed, 0);
    }
}
