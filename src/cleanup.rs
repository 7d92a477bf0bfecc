//! Removal of downloaded media once an upload attempt has been resolved.

use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;

/// Wait before the single retry of a locked delete.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delete `path` if it exists.
///
/// A delete refused because the file is locked is retried once after
/// `retry_delay`; a second failure is returned as [`Error::Cleanup`].
///
/// # Arguments
/// * `path` - The downloaded file to remove
/// * `retry_delay` - How long to wait before retrying a locked delete
pub async fn cleanup(path: &Path, retry_delay: Duration) -> Result<(), Error> {
    remove_with_retry(path, retry_delay, || tokio::fs::remove_file(path)).await
}

async fn remove_with_retry<F, Fut>(
    path: &Path,
    retry_delay: Duration,
    mut remove: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let err = match remove().await {
        Ok(()) => {
            deleted(path);
            return Ok(());
        }
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => err,
    };
    if !is_locked(&err) {
        return Err(cleanup_error(path, err));
    }

    warn!(path = %path.display(), error = %err, "file is locked, retrying cleanup");
    tokio::time::sleep(retry_delay).await;
    match remove().await {
        Ok(()) => {
            deleted(path);
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(cleanup_error(path, err)),
    }
}

fn deleted(path: &Path) {
    info!(path = %path.display(), "deleted local file");
}

fn cleanup_error(path: &Path, source: io::Error) -> Error {
    Error::Cleanup {
        path: path.to_path_buf(),
        source,
    }
}

/// Whether a delete failed because another handle holds the file.
fn is_locked(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION surface as raw codes on Windows.
    err.kind() == ErrorKind::PermissionDenied
        || (cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33)))
}
