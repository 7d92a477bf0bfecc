//! Error types for the video_drive crate.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when talking to Google Drive or its OAuth endpoints.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("missing bootstrap secret")]
    MissingBootstrapSecret,

    #[error("no cached credential; run `video_drive authorize` to bootstrap one")]
    AuthorizationRequired,

    #[error("Authorization failed: {0}")]
    AuthorizationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse credentials JSON: {0}")]
    CredentialsParseError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshError(String),

    #[error("No upload URL in resumable session response")]
    MissingUploadUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;

/// Machine-readable category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    Download,
    Remote,
    Upload,
    Cleanup,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Download => "download",
            ErrorKind::Remote => "remote",
            ErrorKind::Upload => "upload",
            ErrorKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one stage of the download-and-publish pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(#[source] DriveError),

    #[error("{0}")]
    Download(String),

    #[error("{0}")]
    Remote(#[source] DriveError),

    #[error("{0}")]
    Upload(#[source] DriveError),

    #[error("failed to delete {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Download(_) => ErrorKind::Download,
            Error::Remote(_) => ErrorKind::Remote,
            Error::Upload(_) => ErrorKind::Upload,
            Error::Cleanup { .. } => ErrorKind::Cleanup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::Auth(DriveError::MissingBootstrapSecret).kind(),
            ErrorKind::Auth
        );
        assert_eq!(Error::Download("x".into()).kind(), ErrorKind::Download);
        assert_eq!(
            Error::Cleanup {
                path: PathBuf::from("a.mp4"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .kind(),
            ErrorKind::Cleanup
        );
    }

    #[test]
    fn test_stage_error_keeps_drive_message() {
        let err = Error::Auth(DriveError::MissingBootstrapSecret);
        assert_eq!(err.to_string(), "missing bootstrap secret");

        let err = Error::Remote(DriveError::ApiError {
            status: 403,
            message: "Insufficient permissions".to_string(),
        });
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("Insufficient permissions"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Download).unwrap();
        assert_eq!(json, "\"download\"");
        assert_eq!(ErrorKind::Remote.to_string(), "remote");
    }
}
