//! The download → authenticate → upload → share → clean up sequence behind
//! `POST /download`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::cleanup::{cleanup, RETRY_DELAY};
use crate::client::DriveClient;
use crate::downloader::Fetcher;
use crate::error::Error;
use crate::models::{DownloadRequest, LocalMediaFile, UploadResult};
use crate::source_url::validate_source_url;

/// Drive folder uploads land in unless configured otherwise.
pub const DEFAULT_FOLDER: &str = "YouTubeSong";

/// Point a request has reached; any of them may end in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Downloaded,
    Authenticated,
    FolderResolved,
    Uploaded,
    MadePublic,
    CleanedUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Downloaded => "downloaded",
            Stage::Authenticated => "authenticated",
            Stage::FolderResolved => "folder_resolved",
            Stage::Uploaded => "uploaded",
            Stage::MadePublic => "made_public",
            Stage::CleanedUp => "cleaned_up",
        };
        f.write_str(name)
    }
}

/// Runs one download request end to end.
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    drive: DriveClient,
    download_root: PathBuf,
    folder_name: String,
    cleanup_delay: Duration,
}

impl Pipeline {
    /// Create a pipeline uploading into the default folder.
    ///
    /// # Arguments
    /// * `fetcher` - Downloader producing the local media file
    /// * `drive` - Drive client used for folder lookup, upload and sharing
    /// * `download_root` - Directory under which per-request directories are created
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        drive: DriveClient,
        download_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            drive,
            download_root: download_root.into(),
            folder_name: DEFAULT_FOLDER.to_string(),
            cleanup_delay: RETRY_DELAY,
        }
    }

    /// Name of the Drive folder uploads are placed in.
    pub fn with_folder(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = folder_name.into();
        self
    }

    /// Delay before retrying a locked delete.
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    /// Validate, download, upload, share and clean up.
    ///
    /// Side effects of completed stages are not undone when a later stage
    /// fails; an uploaded file stays in Drive even if sharing it fails.
    pub async fn run(&self, request: DownloadRequest) -> Result<UploadResult, Error> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("download_request", %request_id);
        self.run_inner(request_id, request).instrument(span).await
    }

    async fn run_inner(
        &self,
        request_id: Uuid,
        request: DownloadRequest,
    ) -> Result<UploadResult, Error> {
        debug!(stage = %Stage::Received, url = ?request.url);
        let url = validate_source_url(request.url.as_deref())?;
        debug!(stage = %Stage::Validated, %url);

        let job_dir = self.download_root.join(request_id.to_string());
        tokio::fs::create_dir_all(&job_dir).await.map_err(|err| {
            Error::Download(format!("cannot create {}: {}", job_dir.display(), err))
        })?;

        let file = match self.fetcher.fetch(&url, &job_dir).await {
            Ok(file) => file,
            Err(err) => {
                remove_job_dir(&job_dir).await;
                return Err(err);
            }
        };
        info!(stage = %Stage::Downloaded, file = %file.display_name);

        let published = self.publish(&file).await;
        let cleaned = cleanup(&file.path, self.cleanup_delay).await;
        remove_job_dir(&job_dir).await;

        match (published, cleaned) {
            (Ok(result), Ok(())) => {
                info!(stage = %Stage::CleanedUp, id = %result.remote_id);
                Ok(result)
            }
            (Ok(result), Err(err)) => {
                warn!(
                    id = %result.remote_id,
                    error = %err,
                    "uploaded but local file could not be removed"
                );
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                warn!(error = %cleanup_err, "cleanup after failed upload also failed");
                Err(err)
            }
        }
    }

    async fn publish(&self, file: &LocalMediaFile) -> Result<UploadResult, Error> {
        self.drive.auth().get_credential().await.map_err(Error::Auth)?;
        debug!(stage = %Stage::Authenticated);

        let folder = self
            .drive
            .resolve_folder(&self.folder_name)
            .await
            .map_err(Error::Remote)?;
        debug!(stage = %Stage::FolderResolved, folder = %folder.name, id = %folder.id);

        let metadata = self
            .drive
            .upload_file(&file.path, &folder.id, |_| {})
            .await
            .map_err(Error::Upload)?;
        info!(stage = %Stage::Uploaded, id = %metadata.id);

        self.drive
            .make_public(&metadata.id)
            .await
            .map_err(Error::Upload)?;
        debug!(stage = %Stage::MadePublic, id = %metadata.id);

        Ok(UploadResult {
            public_link: metadata.public_link(),
            remote_id: metadata.id,
            file_name: file.display_name.clone(),
        })
    }
}

/// Remove a per-request directory along with anything the downloader left in it.
async fn remove_job_dir(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %err, "failed to remove request directory");
        }
    }
}
