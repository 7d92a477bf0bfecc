//! video_drive server - Relay video URLs to Google Drive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use video_drive::client::DEFAULT_CHUNK_SIZE;
use video_drive::downloader::DEFAULT_FORMAT;
use video_drive::pipeline::DEFAULT_FOLDER;
use video_drive::{router, CredentialStore, DriveClient, Pipeline, YtDlp};

/// HTTP service that downloads videos and publishes them on Google Drive.
#[derive(Parser)]
#[command(name = "video_drive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the cached OAuth credential.
    #[arg(long, env = "TOKEN_CACHE", default_value = "token.json")]
    token_cache: PathBuf,

    /// OAuth client configuration JSON, used when no refreshable credential is cached.
    #[arg(long, env = "GOOGLE_CREDENTIALS", hide_env_values = true)]
    google_credentials: Option<String>,

    #[command(flatten)]
    serve: ServeArgs,

    /// Serve the HTTP API when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the browser consent flow once and write the token cache.
    Authorize,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:5000")]
    listen: SocketAddr,

    /// Directory for transient downloads.
    #[arg(long, env = "DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Drive folder uploads are placed in.
    #[arg(long, env = "DRIVE_FOLDER", default_value = DEFAULT_FOLDER)]
    folder: String,

    /// yt-dlp executable.
    #[arg(long = "yt-dlp", env = "YT_DLP_BIN", default_value = "yt-dlp")]
    yt_dlp: PathBuf,

    /// yt-dlp format selector.
    #[arg(long, env = "YT_DLP_FORMAT", default_value = DEFAULT_FORMAT)]
    format: String,

    /// Upload chunk size in MiB.
    #[arg(long, env = "UPLOAD_CHUNK_MIB", default_value_t = DEFAULT_CHUNK_SIZE / (1024 * 1024))]
    chunk_size_mib: u64,

    /// Allow the browser consent flow to run while serving a request.
    #[arg(long, env = "INTERACTIVE_AUTH")]
    interactive_auth: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Authorize) => {
            let store = CredentialStore::new(&cli.token_cache, cli.google_credentials);
            store
                .authorize()
                .await
                .context("Failed to authorize Google Drive access")?;
            info!(path = %cli.token_cache.display(), "credential cached");
        }
        None => serve(cli.token_cache, cli.google_credentials, cli.serve).await?,
    }

    Ok(())
}

async fn serve(
    token_cache: PathBuf,
    google_credentials: Option<String>,
    args: ServeArgs,
) -> Result<()> {
    std::fs::create_dir_all(&args.download_dir)
        .with_context(|| format!("Failed to create directory: {:?}", args.download_dir))?;

    let auth = Arc::new(
        CredentialStore::new(token_cache, google_credentials)
            .with_interactive(args.interactive_auth),
    );
    let drive = DriveClient::new(auth)
        .context("Failed to build HTTP client")?
        .with_chunk_size(args.chunk_size_mib.saturating_mul(1024 * 1024));
    let fetcher = YtDlp::new(&args.yt_dlp).with_format(&args.format);
    let pipeline =
        Pipeline::new(Arc::new(fetcher), drive, &args.download_dir).with_folder(&args.folder);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, folder = %args.folder, "listening");

    axum::serve(listener, router(Arc::new(pipeline)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}
