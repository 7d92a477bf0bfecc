//! Google Drive API client: folder lookup, resumable uploads and sharing.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::error::{DriveError, Result};
use crate::models::{
    format_eta, format_size, ApiErrorResponse, FileListResponse, FileMetadata, RemoteFolder,
    FOLDER_MIME_TYPE,
};

/// Base URL for Google Drive API v3.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload URL for Google Drive API.
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Resumable upload chunks must be a multiple of this size.
pub const CHUNK_ALIGNMENT: u64 = 256 * 1024;

/// Default chunk size for resumable uploads (8 MB).
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Consecutive chunks the server may acknowledge without progress before giving up.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Fields requested for uploaded and listed files.
const FILE_FIELDS: &str = "id, name, size, mimeType, webViewLink";

/// Client for the parts of the Drive API the relay needs.
pub struct DriveClient {
    auth: Arc<CredentialStore>,
    http: Client,
    api_base: String,
    upload_base: String,
    chunk_size: u64,
}

impl DriveClient {
    /// Create a new DriveClient against the public Google endpoints.
    ///
    /// # Arguments
    /// * `auth` - Credential store supplying access tokens
    pub fn new(auth: Arc<CredentialStore>) -> Result<Self> {
        // A 308 from the upload endpoint means "resume incomplete", not a redirect.
        let http = Client::builder().redirect(Policy::none()).build()?;
        Ok(Self {
            auth,
            http,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Point the client at different API and upload base URLs.
    ///
    /// # Arguments
    /// * `api_base` - Replacement for [`DRIVE_API_BASE`]
    /// * `upload_base` - Replacement for [`UPLOAD_API_BASE`]
    pub fn with_endpoints(
        mut self,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the upload chunk size, rounded down to a multiple of 256 KB.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = (chunk_size / CHUNK_ALIGNMENT).max(1) * CHUNK_ALIGNMENT;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn auth(&self) -> &CredentialStore {
        &self.auth
    }

    /// Query files using Google Drive query syntax.
    pub async fn query_files(&self, query: &str) -> Result<Vec<FileMetadata>> {
        let token = self.auth.access_token().await?;
        let fields = format!("nextPageToken, files({})", FILE_FIELDS);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.api_base))
                .bearer_auth(&token)
                .query(&[("q", query), ("spaces", "drive"), ("fields", fields.as_str())]);

            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }

            let list_response: FileListResponse = response.json().await?;
            all_files.extend(list_response.files);

            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Find a non-trashed folder with exactly this name.
    pub async fn find_folder(&self, name: &str) -> Result<Option<FileMetadata>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query_value(name),
            FOLDER_MIME_TYPE
        );
        let folders = self.query_files(&query).await?;
        Ok(folders.into_iter().next())
    }

    /// Create a folder at the root of the user's drive.
    pub async fn create_folder(&self, name: &str) -> Result<FileMetadata> {
        let token = self.auth.access_token().await?;

        let response = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(&token)
            .query(&[("fields", "id, name, mimeType")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let metadata: FileMetadata = response.json().await?;
        info!(folder = name, id = %metadata.id, "created Drive folder");
        Ok(metadata)
    }

    /// Return the folder named `name`, creating it if it does not exist.
    ///
    /// Two concurrent calls that both miss may each create a folder.
    pub async fn resolve_folder(&self, name: &str) -> Result<RemoteFolder> {
        let metadata = match self.find_folder(name).await? {
            Some(existing) => existing,
            None => self.create_folder(name).await?,
        };
        Ok(RemoteFolder {
            id: metadata.id,
            name: name.to_string(),
        })
    }

    /// Upload a file into a folder with a chunked resumable transfer.
    ///
    /// # Arguments
    /// * `local_path` - Path to the local file
    /// * `parent_id` - The ID of the destination folder
    /// * `on_progress` - Receives the committed fraction in `[0.0, 1.0]` after each chunk
    pub async fn upload_file<P, F>(
        &self,
        local_path: P,
        parent_id: &str,
        mut on_progress: F,
    ) -> Result<FileMetadata>
    where
        P: AsRef<Path>,
        F: FnMut(f64),
    {
        let local_path = local_path.as_ref();
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DriveError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", local_path.display()),
                ))
            })?;

        let mut file = File::open(local_path).await?;
        let file_size = file.metadata().await?.len();
        let mime_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        let upload_url = self
            .start_resumable_session(filename, parent_id, &mime_type, file_size)
            .await?;
        debug!(file = filename, size = file_size, "resumable upload session opened");

        let started = Instant::now();
        let mut offset: u64 = 0;
        let mut stalled = 0;

        let metadata = loop {
            let end = (offset + self.chunk_size).min(file_size);
            let mut chunk = vec![0u8; (end - offset) as usize];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut chunk).await?;

            // With nothing left to send, `bytes */N` asks the server to finalize.
            let content_range = if offset == file_size {
                format!("bytes */{}", file_size)
            } else {
                format!("bytes {}-{}/{}", offset, end - 1, file_size)
            };

            let token = self.auth.access_token().await?;
            let response = self
                .http
                .put(&upload_url)
                .bearer_auth(&token)
                .header(CONTENT_RANGE, content_range)
                .header("Content-Type", &mime_type)
                .body(chunk)
                .send()
                .await?;

            match response.status().as_u16() {
                200 | 201 => break response.json::<FileMetadata>().await?,
                308 => {
                    let committed = committed_offset(response.headers());
                    if committed <= offset {
                        stalled += 1;
                        if stalled >= MAX_STALLED_CHUNKS {
                            return Err(DriveError::ApiError {
                                status: 308,
                                message: format!("upload stalled at byte {}", committed),
                            });
                        }
                    } else {
                        stalled = 0;
                    }
                    offset = committed.min(file_size);

                    let progress = if file_size == 0 {
                        0.0
                    } else {
                        offset as f64 / file_size as f64
                    };
                    on_progress(progress);

                    let elapsed = started.elapsed().as_secs_f64();
                    let remaining = file_size.saturating_sub(offset) as f64;
                    let eta = elapsed / offset.max(1) as f64 * remaining;
                    info!(
                        file = filename,
                        "upload progress: {}% ({} of {}, eta {})",
                        (progress * 100.0) as u32,
                        format_size(offset),
                        format_size(file_size),
                        format_eta(eta)
                    );
                }
                _ => return Err(api_error(response).await),
            }
        };

        on_progress(1.0);
        info!(file = filename, id = %metadata.id, "upload complete");

        if let Err(err) = file.shutdown().await {
            warn!(file = filename, error = %err, "error closing uploaded file");
        }

        Ok(metadata)
    }

    /// Open a resumable upload session and return its session URL.
    async fn start_resumable_session(
        &self,
        filename: &str,
        parent_id: &str,
        mime_type: &str,
        file_size: u64,
    ) -> Result<String> {
        let token = self.auth.access_token().await?;

        let metadata = json!({
            "name": filename,
            "parents": [parent_id]
        });

        let init_response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(&metadata)
            .send()
            .await?;

        if !init_response.status().is_success() {
            return Err(api_error(init_response).await);
        }

        init_response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(DriveError::MissingUploadUrl)
    }

    /// Grant read access to anyone with the link.
    ///
    /// # Arguments
    /// * `file_id` - The ID of the uploaded file
    pub async fn make_public(&self, file_id: &str) -> Result<()> {
        let token = self.auth.access_token().await?;

        let response = self
            .http
            .post(format!("{}/files/{}/permissions", self.api_base, file_id))
            .bearer_auth(&token)
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        debug!(id = file_id, "file shared with anyone holding the link");
        Ok(())
    }
}

/// Turn a failed response into an `ApiError`, preferring Google's error envelope.
async fn api_error(response: Response) -> DriveError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return DriveError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        };
    }
    DriveError::ApiError {
        status: status.as_u16(),
        message: error_body,
    }
}

/// Quote-escape a value for use inside a Drive query string literal.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Next byte to send, from the `Range: bytes=0-N` header of a 308 response.
fn committed_offset(headers: &HeaderMap) -> u64 {
    headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.rsplit('-').next())
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}
