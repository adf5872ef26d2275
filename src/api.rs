//! HTTP surface for the embedding service.
//!
//! - `POST /api/v1/doc-process/embedding` – Embed a batch of file versions. Body:
//!   `{ "files": [{ "fileId": "...", "versionId": "..." }], "force": false }`. Answers `201` with
//!   the request echoed back, or `201` with `{ "data": "<message>" }` when every file was already
//!   embedded.
//! - `GET /metrics` – Embedding counters since startup.
//! - `GET /health` – Liveness probe.
//!
//! Errors are returned as `{ "error": message, "code": CODE, "details"?: any }`. The status comes
//! from the error's [`ErrorKind`].

use crate::{
    auth::{AuthError, extract_api_key},
    metrics::MetricsSnapshot,
    processing::{BatchDisposition, BatchRequest, EmbeddingApi, FileRef, ServiceError},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Route of the batch embedding endpoint.
pub const EMBEDDING_PATH: &str = "/api/v1/doc-process/embedding";

/// Payload of the `data` field when no file needed embedding.
pub const ALREADY_EMBEDDED_MESSAGE: &str = "All selected files have already been embedded";

/// Router state: the service plus the name of the credential header.
pub struct ApiState<S> {
    service: Arc<S>,
    api_key_header: Arc<str>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            api_key_header: self.api_key_header.clone(),
        }
    }
}

/// Build the HTTP router exposing the embedding API surface.
pub fn create_router<S>(service: Arc<S>, api_key_header: &str) -> Router
where
    S: EmbeddingApi + 'static,
{
    let state = ApiState {
        service,
        api_key_header: Arc::from(api_key_header.to_ascii_lowercase()),
    };
    Router::new()
        .route(EMBEDDING_PATH, post(embed_files::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .with_state(state)
}

/// Wire shape of the embedding request before validation.
#[derive(Deserialize)]
struct EmbeddingRequestBody {
    #[serde(default)]
    files: Option<Vec<FileRef>>,
    #[serde(default)]
    force: Option<bool>,
}

/// Validate the payload: `files` must be present and non-empty.
fn parse_request(body: &Value) -> Result<BatchRequest, ApiError> {
    let parsed = EmbeddingRequestBody::deserialize(body)
        .map_err(|error| ApiError::invalid_body(error.to_string()))?;
    let files = parsed
        .files
        .filter(|files| !files.is_empty())
        .ok_or_else(ApiError::no_files)?;
    Ok(BatchRequest {
        files,
        force: parsed.force.unwrap_or(false),
    })
}

/// Embed a batch of file versions.
///
/// The body is parsed as JSON whatever the `Content-Type` says. It is validated before the
/// credential is checked. On success the original body is echoed back verbatim.
async fn embed_files<S>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Response, ApiError>
where
    S: EmbeddingApi,
{
    let body: Value = serde_json::from_slice(&payload)
        .map_err(|error| ApiError::invalid_body(error.to_string()))?;
    tracing::info!(body = %body, "Embedding request received");
    let request = parse_request(&body)?;

    let api_key = extract_api_key(&headers, &state.api_key_header);
    let client = state.service.authenticate(api_key.as_deref()).await?;

    let report = state.service.embed_batch(&client, request).await?;
    tracing::info!(
        client_id = %client.id,
        disposition = ?report.disposition,
        inserted = report.inserted,
        deleted = report.deleted,
        files = ?report.files,
        "Embedding request completed"
    );

    let response = match report.disposition {
        BatchDisposition::Persisted => (StatusCode::CREATED, Json(body)).into_response(),
        BatchDisposition::NothingToEmbed => (
            StatusCode::CREATED,
            Json(json!({ "data": ALREADY_EMBEDDED_MESSAGE })),
        )
            .into_response(),
    };
    Ok(response)
}

/// Return the embedding counters.
async fn get_metrics<S>(State(state): State<ApiState<S>>) -> Json<MetricsSnapshot>
where
    S: EmbeddingApi,
{
    Json(state.service.metrics_snapshot())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Closed classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or incomplete input.
    Validation,
    /// Missing or unrecognised credential.
    Unauthorized,
    /// A collaborator failed in a recognised way.
    Unexpected,
    /// A failure that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// HTTP status for this kind.
    ///
    /// `Unauthorized` answers 400, not 401.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::BAD_REQUEST,
            Self::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error returned by the HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn no_files() -> Self {
        Self::new(ErrorKind::Validation, "UPLOAD_FILES_ERROR", "no files selected")
    }

    fn invalid_body(details: String) -> Self {
        Self::new(
            ErrorKind::Validation,
            "INVALID_REQUEST_BODY",
            "request body is not a valid embedding request",
        )
        .with_details(details)
    }

    /// Classification driving the HTTP status.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, details = ?self.details, "Request failed");
        } else {
            tracing::warn!(code = self.code, error = %self.message, "Request rejected");
        }

        let mut body = json!({ "error": self.message, "code": self.code });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredential | AuthError::UnknownCredential => {
                Self::new(ErrorKind::Unauthorized, "UN_AUTH_REQUEST", "unauthorized")
            }
            AuthError::Backend(_) => Self::new(
                ErrorKind::Unknown,
                "UNKNOWN_ERROR",
                "failed to resolve client",
            )
            .with_details(error.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self::new(
            ErrorKind::Unexpected,
            "UNEXPECTED_ERROR",
            "failed to store embeddings",
        )
        .with_details(error.to_string())
    }
}
