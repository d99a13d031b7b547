use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cairn_ingest::{IngestError, RejectionKind};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] cairn_index::IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ingest(e) => match e.kind() {
                RejectionKind::BadRequest | RejectionKind::SizeExceeded => StatusCode::BAD_REQUEST,
                RejectionKind::HashMismatch | RejectionKind::HashCollisionMismatch => {
                    StatusCode::CONFLICT
                }
                RejectionKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
                RejectionKind::NotFound => StatusCode::NOT_FOUND,
                RejectionKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_)
            | Self::Store(_)
            | Self::Index(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingest(e) => e.kind().as_str(),
            Self::BadRequest(_) => RejectionKind::BadRequest.as_str(),
            Self::Config(_) => "config",
            Self::Store(_) | Self::Index(_) | Self::Io(_) => RejectionKind::StoreError.as_str(),
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
