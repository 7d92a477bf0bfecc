//! video_drive - An HTTP relay that downloads videos and publishes them on Google Drive.
//!
//! This library provides functionality to:
//! - Download media from a video page URL with yt-dlp
//! - Find or create a Google Drive folder by name
//! - Upload files to Drive with chunked resumable transfers
//! - Share uploaded files with anyone holding the link
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use video_drive::{router, CredentialStore, DriveClient, Pipeline, YtDlp};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let auth = Arc::new(CredentialStore::new("token.json", None));
//!     let drive = DriveClient::new(auth)?;
//!     let pipeline = Pipeline::new(Arc::new(YtDlp::default()), drive, "downloads");
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//!     axum::serve(listener, router(Arc::new(pipeline))).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cleanup;
pub mod client;
pub mod downloader;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod source_url;

// Re-exports for convenience
pub use auth::CredentialStore;
pub use client::DriveClient;
pub use downloader::{Fetcher, YtDlp};
pub use error::{DriveError, Error, ErrorKind, Result};
pub use models::{Credential, LocalMediaFile, UploadResult};
pub use pipeline::Pipeline;
pub use server::router;
