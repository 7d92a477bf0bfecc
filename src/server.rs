//! HTTP surface: `GET /` banner and `POST /download`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{Error, ErrorKind};
use crate::models::{DownloadRequest, UploadResult};
use crate::pipeline::Pipeline;

/// Text returned by the liveness endpoint.
pub const BANNER: &str = "YouTube → Google Drive API running";

/// Message returned with every successful upload.
pub const SUCCESS_MESSAGE: &str = "Video downloaded & uploaded to Google Drive";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Build the router serving the relay endpoints.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/download", post(download))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Download | ErrorKind::Remote | ErrorKind::Upload => StatusCode::BAD_GATEWAY,
        ErrorKind::Cleanup => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = json!({
            "error": self.0.to_string(),
            "kind": kind,
        });
        (status_for(kind), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    message: &'static str,
    #[serde(flatten)]
    result: UploadResult,
}

async fn home() -> Json<serde_json::Value> {
    Json(json!({ "message": BANNER }))
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        Error::Validation(format!("invalid request body: {}", rejection.body_text()))
    })?;
    info!(url = ?request.url, "received download request");

    match state.pipeline.run(request).await {
        Ok(result) => Ok(Json(DownloadResponse {
            message: SUCCESS_MESSAGE,
            result,
        })),
        Err(err) => {
            warn!(kind = %err.kind(), error = %err, "download request failed");
            Err(err.into())
        }
    }
}
