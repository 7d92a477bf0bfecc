//! Media download through an external extraction tool (yt-dlp).

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::Error;
use crate::models::LocalMediaFile;

/// Container every downloaded file ends up in.
pub const TARGET_EXTENSION: &str = "mp4";

/// Prefer a native mp4 stream, otherwise take the best available format.
pub const DEFAULT_FORMAT: &str = "best[ext=mp4]/best";

/// Output template: the media title is the file stem.
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Resolves a source URL into a local media file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into `dest_dir`.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<LocalMediaFile, Error>;
}

/// [`Fetcher`] backed by the `yt-dlp` command-line tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    format: String,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }

    /// Override the `-f` format selector.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Command-line arguments for downloading `url` into `dest_dir`.
    pub fn build_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "-f".to_string(),
            self.format.clone(),
            "--remux-video".to_string(),
            TARGET_EXTENSION.to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            dest_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Fetcher for YtDlp {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<LocalMediaFile, Error> {
        let args = self.build_args(url, dest_dir);
        debug!(binary = %self.binary.display(), ?args, "running extraction tool");

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == IoErrorKind::NotFound {
                    Error::Download(format!(
                        "{} is not installed or not on PATH",
                        self.binary.display()
                    ))
                } else {
                    Error::Download(format!("failed to run {}: {}", self.binary.display(), err))
                }
            })?;

        if !output.status.success() {
            return Err(Error::Download(tool_error_message(&output.stderr)));
        }

        let printed = last_printed_line(&output.stdout);
        let file = locate_output(printed.as_deref())?;
        info!(url, path = %file.path.display(), "download finished");
        Ok(file)
    }
}

/// Map the tool's reported path onto the normalized extension and check it exists.
pub fn locate_output(printed: Option<&str>) -> Result<LocalMediaFile, Error> {
    let path = printed
        .map(|p| normalize_extension(Path::new(p)))
        .filter(|p| p.is_file())
        .ok_or_else(|| Error::Download("file not found after download".to_string()))?;
    Ok(LocalMediaFile::new(path))
}

/// Rewrite `path` to end in the target container extension.
pub fn normalize_extension(path: &Path) -> PathBuf {
    let matches = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(TARGET_EXTENSION))
        .unwrap_or(false);
    if matches {
        path.to_path_buf()
    } else {
        path.with_extension(TARGET_EXTENSION)
    }
}

fn last_printed_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

fn tool_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
        .unwrap_or_else(|| "extraction tool exited without output".to_string())
}
