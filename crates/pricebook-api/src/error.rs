//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use pricebook_reconcile::Error;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The request contradicts recorded state (history or a prior decision).
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<Error> for ApiError {
  fn from(e: Error) -> Self {
    match e {
      Error::SessionNotFound(_)
      | Error::SourceNotFound(_)
      | Error::MaterialNotFound(_)
      | Error::CustomerNotFound(_)
      | Error::UnmatchedNotFound(_) => Self::NotFound(e.to_string()),
      Error::AlreadyResolved { .. } | Error::TemporalConflict(_) => {
        Self::Conflict(e.to_string())
      }
      Error::MissingPrice(_) | Error::SessionAborted { .. } => {
        Self::BadRequest(e.to_string())
      }
      Error::StoreUnavailable(_) => Self::Unavailable(e.to_string()),
      Error::Store(_) | Error::Core(_) => Self::Internal(Box::new(e)),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Internal(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
