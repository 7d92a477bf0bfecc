//! OAuth user-credential store for the Google Drive API.
//!
//! A long-lived credential is cached on disk and refreshed in place. The
//! interactive consent flow is normally run out of band (`video_drive
//! authorize`); the request path only refreshes unless interactive
//! authorization is explicitly enabled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::Uri;
use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{DriveError, Result};
use crate::models::{ClientConfig, ClientSecrets, Credential, TokenResponse};

/// Google Drive API scope limited to files created by this app.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Process-wide credential store backed by a JSON cache file.
///
/// All reads and writes go through one async mutex, so concurrent cold
/// starts serialize on a single refresh instead of racing on the cache file.
pub struct CredentialStore {
    cache_path: PathBuf,
    bootstrap_secret: Option<String>,
    interactive: bool,
    scopes: Vec<String>,
    http: Client,
    current: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// Create a store reading and writing `cache_path`.
    ///
    /// # Arguments
    /// * `cache_path` - JSON file holding the cached credential
    /// * `bootstrap_secret` - Client-configuration JSON used when no refreshable credential exists
    pub fn new(cache_path: impl Into<PathBuf>, bootstrap_secret: Option<String>) -> Self {
        Self {
            cache_path: cache_path.into(),
            bootstrap_secret: bootstrap_secret.filter(|s| !s.trim().is_empty()),
            interactive: false,
            scopes: vec![DRIVE_SCOPE.to_string()],
            http: Client::new(),
            current: Mutex::new(None),
        }
    }

    /// Allow the interactive consent flow to run on the request path.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Get a usable credential, refreshing or acquiring one if necessary.
    pub async fn get_credential(&self) -> Result<Credential> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            *current = load_cache(&self.cache_path).await;
        }

        if let Some(credential) = current.as_ref() {
            if credential.is_valid(SystemTime::now()) {
                return Ok(credential.clone());
            }
        }

        if let Some(stale) = current.clone() {
            if stale.refresh_token.is_some() {
                match self.refresh(&stale).await {
                    Ok(refreshed) => {
                        self.persist(&refreshed).await?;
                        *current = Some(refreshed.clone());
                        return Ok(refreshed);
                    }
                    Err(err) => {
                        warn!(error = %err, "token refresh failed, falling back to authorization");
                    }
                }
            }
        }

        let client = self.client_config()?;
        if !self.interactive {
            return Err(DriveError::AuthorizationRequired);
        }

        let acquired = authorize_interactive(&self.http, &client, &self.scopes).await?;
        self.persist(&acquired).await?;
        *current = Some(acquired.clone());
        Ok(acquired)
    }

    /// Get a valid access token.
    pub async fn access_token(&self) -> Result<String> {
        Ok(self.get_credential().await?.access_token)
    }

    /// Run the interactive flow unconditionally and persist the result.
    pub async fn authorize(&self) -> Result<Credential> {
        let client = self.client_config()?;
        let credential = authorize_interactive(&self.http, &client, &self.scopes).await?;
        self.persist(&credential).await?;
        *self.current.lock().await = Some(credential.clone());
        Ok(credential)
    }

    /// Parse the bootstrap secret into a client configuration.
    fn client_config(&self) -> Result<ClientConfig> {
        let raw = self
            .bootstrap_secret
            .as_deref()
            .ok_or(DriveError::MissingBootstrapSecret)?;
        let secrets: ClientSecrets = serde_json::from_str(raw)?;
        secrets.into_config().ok_or_else(|| {
            DriveError::AuthorizationError(
                "client configuration has neither an `installed` nor a `web` section".to_string(),
            )
        })
    }

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| DriveError::TokenRefreshError("no refresh token".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&credential.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::TokenRefreshError(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        debug!("access token refreshed");

        Ok(Credential::from_token_response(
            token_response,
            &credential.client_config(),
            credential.refresh_token.clone(),
            &credential.scopes,
            SystemTime::now(),
        ))
    }

    /// Overwrite the cache file with `credential`.
    async fn persist(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(credential)?;
        tokio::fs::write(&self.cache_path, json).await?;
        debug!(path = %self.cache_path.display(), "credential cache written");
        Ok(())
    }
}

/// Read the cache file; a missing or unreadable cache is treated as empty.
async fn load_cache(path: &Path) -> Option<Credential> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot read credential cache");
            return None;
        }
    };

    match serde_json::from_slice(&content) {
        Ok(credential) => Some(credential),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring corrupt credential cache");
            None
        }
    }
}

/// Build the consent URL the operator opens in a browser.
pub fn authorization_url(
    client: &ClientConfig,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> Result<Url> {
    let mut url = Url::parse(&client.auth_uri)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

/// Extract the authorization code from a callback request target.
///
/// Returns `Ok(None)` for unrelated requests (e.g. `/favicon.ico`).
pub fn parse_callback(target: &str, expected_state: &str) -> Result<Option<String>> {
    let url = Url::parse("http://127.0.0.1")?.join(target)?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(DriveError::AuthorizationError(error));
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        return Err(DriveError::AuthorizationError(
            "state mismatch in authorization callback".to_string(),
        ));
    }
    Ok(Some(code))
}

/// Run the installed-app consent flow against an ephemeral loopback listener.
async fn authorize_interactive(
    http: &Client,
    client: &ClientConfig,
    scopes: &[String],
) -> Result<Credential> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
    let state = Uuid::new_v4().simple().to_string();
    let consent_url = authorization_url(client, &redirect_uri, scopes, &state)?;

    info!(url = %consent_url, "open this URL in a browser to authorize Google Drive access");

    let code = wait_for_code(listener, &state).await?;
    exchange_code(http, client, &code, &redirect_uri, scopes).await
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    outcome: mpsc::Sender<Result<String>>,
}

/// Serve the loopback redirect until a callback carries a code or an error.
async fn wait_for_code(listener: TcpListener, expected_state: &str) -> Result<String> {
    let (outcome_tx, mut outcome_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = Router::new().fallback(handle_callback).with_state(CallbackState {
        expected_state: Arc::from(expected_state),
        outcome: outcome_tx,
    });
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let outcome = outcome_rx.recv().await;
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "authorization callback listener failed"),
        Err(err) => warn!(error = %err, "authorization callback task failed"),
    }

    outcome.unwrap_or_else(|| {
        Err(DriveError::AuthorizationError(
            "callback listener stopped before authorization completed".to_string(),
        ))
    })
}

async fn handle_callback(State(state): State<CallbackState>, uri: Uri) -> &'static str {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    match parse_callback(target, &state.expected_state) {
        Ok(None) => "Waiting for authorization.",
        Ok(Some(code)) => {
            let _ = state.outcome.try_send(Ok(code));
            "Authorization complete. You may close this window."
        }
        Err(err) => {
            debug!(error = %err, "authorization callback rejected");
            let _ = state.outcome.try_send(Err(err));
            "Authorization failed. Check the server log."
        }
    }
}

async fn exchange_code(
    http: &Client,
    client: &ClientConfig,
    code: &str,
    redirect_uri: &str,
    scopes: &[String],
) -> Result<Credential> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("redirect_uri", redirect_uri),
    ];

    let response = http.post(&client.token_uri).form(&params).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(DriveError::AuthorizationError(format!(
            "Status {}: {}",
            status, body
        )));
    }

    let token_response: TokenResponse = response.json().await?;
    Ok(Credential::from_token_response(
        token_response,
        client,
        None,
        scopes,
        SystemTime::now(),
    ))
}
