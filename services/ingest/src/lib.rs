//! Image ingest service
//!
//! Watches a drop directory (typically the mount an FTP/SFTP server writes
//! into), uploads every finished JPEG/PNG to object storage, tells the
//! picture-processing API about it and removes the local copy.
//!
//! # Architecture
//!
//! ```text
//! bootstrap scan ─┐
//!                 ├─> IngestQueue (bounded) ─> WorkerPool (N workers)
//! DirectoryWatcher┘                              │
//!   (debounced)                                  ├─ stability check
//!                                                ├─ read + decode
//!                                                ├─ ObjectStore::put
//!                                                ├─ Notifier::notify
//!                                                └─ delete local file
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (`config/ingest.toml`, `/etc/image-ingest/ingest.toml`)
//! 2. Environment variables (prefixed with `INGEST__`)
//! 3. Legacy flat variables (`B2_BUCKET_NAME`, `REDIS_URL`, ...)
//!
//! See [`config`] for the individual options.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod media;
pub mod notifier;
pub mod pipeline;
pub mod queue;
pub mod stability;
pub mod storage;
pub mod watcher;
pub mod worker;

pub use config::IngestConfig;
pub use pipeline::{IngestPipeline, PipelineError, RunningPipeline};
pub use queue::{IngestQueue, PendingFile};
pub use worker::{FileOutcome, FileProcessor, PoolStats, WorkerPool};
