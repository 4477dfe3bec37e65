//! HTTP server wiring for the application workflow.
//!
//! Mounts the JSON API under `/api` with request tracing.

use std::path::PathBuf;

use axum::{Router, routing::get};
use serde::Deserialize;
use soknad_api::{AppState, retry::PollConfig};
use soknad_core::store::ApplicationStore;
use soknad_mediator::NeedPublisher;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` and `SOKNAD_*`
/// environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  /// Used by the `answers` command when polling the read side.
  #[serde(default)]
  pub poll:       PollConfig,
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the top-level [`Router`].
pub fn router<S, P>(mediator: AppState<S, P>) -> Router
where
  S: ApplicationStore + 'static,
  P: NeedPublisher + 'static,
{
  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", soknad_api::api_router(mediator))
    .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use soknad_mediator::{Mediator, TracingPublisher};
  use soknad_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  use super::*;

  async fn app() -> Router {
    let store = SqliteStore::open_in_memory().await.unwrap();
    router(Arc::new(Mediator::new(Arc::new(store), Arc::new(TracingPublisher))))
  }

  #[tokio::test]
  async fn health_is_ok() {
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn api_is_nested() {
    let req = Request::get("/api/owners/12345678901/applications")
      .body(Body::empty())
      .unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[test]
  fn poll_settings_default_when_absent() {
    let config: ServerConfig = serde_json::from_value(serde_json::json!({
      "host": "127.0.0.1",
      "port": 8080,
      "store_path": "soknad.db",
    }))
    .unwrap();
    assert_eq!(config.poll, PollConfig::default());
    assert_eq!(config.address(), "127.0.0.1:8080");
  }

  #[test]
  fn poll_settings_are_partially_overridable() {
    let config: ServerConfig = serde_json::from_value(serde_json::json!({
      "host": "0.0.0.0",
      "port": 80,
      "store_path": "/var/lib/soknad.db",
      "poll": { "max_attempts": 10 },
    }))
    .unwrap();
    assert_eq!(config.poll.max_attempts, 10);
    assert_eq!(config.poll.max_delay_ms, 2_000);
  }
}
