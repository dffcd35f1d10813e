//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unprocessable: {0}")]
  Unprocessable(String),

  #[error("upstream failure: {0}")]
  Upstream(String),

  /// The publish was cancelled, by timeout or by the client going away.
  #[error("publish cancelled")]
  Cancelled,

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<marquee_publish::Error> for ApiError {
  fn from(e: marquee_publish::Error) -> Self {
    use marquee_publish::Error as E;
    match e {
      E::NotFound(m) => Self::NotFound(m),
      E::Conflict(m) => Self::Conflict(m),
      E::Validation(m) => Self::Unprocessable(m),
      E::ExternalService(e) => Self::Upstream(e.to_string()),
      E::Cancelled => Self::Cancelled,
      E::Core(e) => Self::BadRequest(e.to_string()),
      E::Store(e) => Self::Internal(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
      ApiError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      tracing::warn!(status = status.as_u16(), error = %self, "request failed");
    }
    let message = match &self {
      ApiError::NotFound(m)
      | ApiError::BadRequest(m)
      | ApiError::Conflict(m)
      | ApiError::Unprocessable(m)
      | ApiError::Upstream(m) => m.clone(),
      other => other.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
