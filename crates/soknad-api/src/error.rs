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

  /// The event was understood but cannot be applied.
  #[error("rejected: {0}")]
  Rejected(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("publish error: {0}")]
  Publish(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<soknad_mediator::Error> for ApiError {
  fn from(e: soknad_mediator::Error) -> Self {
    use soknad_mediator::Error as E;
    match e {
      E::Core(e) => ApiError::Rejected(e.to_string()),
      E::Store(e) => ApiError::Store(e),
      E::Publish(e) => ApiError::Publish(e),
      E::ApplicationNotFound(id) => {
        ApiError::NotFound(format!("application {id} not found"))
      }
      e @ E::MissingApplicationId { .. } => ApiError::BadRequest(e.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Rejected(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
      ApiError::Store(e) | ApiError::Publish(e) => {
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
