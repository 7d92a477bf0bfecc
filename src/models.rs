//! Data models for Google Drive API responses and the relay's own requests.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// MIME type Google Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Google's default OAuth endpoints for installed applications.
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Metadata for a file or folder in Google Drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
}

impl FileMetadata {
    /// Link that opens the file in a browser.
    pub fn public_link(&self) -> String {
        self.web_view_link.clone().unwrap_or_else(|| {
            format!("https://drive.google.com/file/d/{}/view?usp=sharing", self.id)
        })
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format seconds into human-readable time (e.g., "2m 15s", "1h 5m", "< 1s").
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--".to_string();
    }

    let secs = seconds.round() as u64;

    if secs == 0 {
        return "< 1s".to_string();
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let remaining_secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, remaining_secs)
    } else {
        format!("{}s", remaining_secs)
    }
}

/// Response from the files.list API endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Google API error response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub code: u16,
    pub message: String,
}

/// OAuth client configuration as downloaded from the Google Cloud console.
///
/// Either the `installed` (desktop) or `web` section is accepted.
#[derive(Debug, Deserialize)]
pub struct ClientSecrets {
    #[serde(default)]
    pub installed: Option<ClientConfig>,
    #[serde(default)]
    pub web: Option<ClientConfig>,
}

impl ClientSecrets {
    pub fn into_config(self) -> Option<ClientConfig> {
        self.installed.or(self.web)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth2 token response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// A user credential persisted in the token cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as unix seconds; `None` means the token never expires.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

impl Credential {
    /// Margin before expiry at which a token is already treated as expired.
    pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

    /// Build a credential from a token endpoint response.
    ///
    /// `previous_refresh` is kept when the response carries no new refresh token.
    pub fn from_token_response(
        response: TokenResponse,
        client: &ClientConfig,
        previous_refresh: Option<String>,
        default_scopes: &[String],
        now: SystemTime,
    ) -> Self {
        let scopes = match response.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => default_scopes.to_vec(),
        };
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| unix_seconds(now) + secs),
            scopes,
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            token_uri: client.token_uri.clone(),
        }
    }

    pub fn is_valid(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > unix_seconds(now + Self::EXPIRY_MARGIN),
            None => true,
        }
    }

    /// Client configuration needed to refresh this credential.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            auth_uri: default_auth_uri(),
            token_uri: self.token_uri.clone(),
        }
    }
}

pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Body of `POST /download`.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// A media file produced by the downloader and owned by one request.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMediaFile {
    pub path: PathBuf,
    pub display_name: String,
}

impl LocalMediaFile {
    pub fn new(path: PathBuf) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, display_name }
    }
}

/// Drive folder that uploads are placed into.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    #[serde(rename = "file_id")]
    pub remote_id: String,
    pub public_link: String,
    pub file_name: String,
}
