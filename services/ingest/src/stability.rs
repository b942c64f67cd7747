//! Write-completion heuristic for files dropped into the watch directory.
//!
//! FTP/SFTP servers create the target file first and then stream into it, so
//! a creation event says nothing about whether the upload is finished. A file
//! counts as ready once its size has not moved over a settle interval.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Returns true if `path` exists and its size is unchanged across `settle`.
///
/// Vanished files and I/O errors count as "not ready"; nothing is propagated.
pub async fn is_ready(path: &Path, settle: Duration) -> bool {
    let before = match file_size(path).await {
        Some(size) => size,
        None => {
            debug!(path = %path.display(), "File missing before settle interval");
            return false;
        }
    };

    tokio::time::sleep(settle).await;

    match file_size(path).await {
        Some(after) if after == before => {
            trace!(path = %path.display(), size = after, "File size stable");
            true
        }
        Some(after) => {
            debug!(
                path = %path.display(),
                before,
                after,
                "File still growing"
            );
            false
        }
        None => {
            debug!(path = %path.display(), "File vanished during settle interval");
            false
        }
    }
}

/// Size of a regular file; `None` if it does not exist, is not a file, or
/// cannot be stat'ed. `tokio::fs` runs the stat on the blocking pool.
async fn file_size(path: &Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.is_file().then(|| metadata.len())
}
