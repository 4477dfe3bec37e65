//! Async HTTP client wrapping the JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode};
use soknad_core::{application::FormAnswers, event::Event};
use soknad_mediator::Outcome;
use uuid::Uuid;

use crate::{
  applications::ApplicationView,
  retry::{PollConfig, RetryError, poll_until_found},
};

/// Async HTTP client for the JSON REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client:   Client,
  base_url: String,
  poll:     PollConfig,
}

impl ApiClient {
  pub fn new(base_url: impl Into<String>, poll: PollConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base_url: base_url.into(), poll })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.base_url.trim_end_matches('/'), path)
  }

  /// `POST /api/events`
  pub async fn post_event(&self, event: &Event) -> Result<Outcome> {
    let resp = self
      .client
      .post(self.url("/events"))
      .json(event)
      .send()
      .await
      .context("POST /events failed")?;

    if !resp.status().is_success() {
      return Err(anyhow!("POST /events → {}", resp.status()));
    }
    resp.json().await.context("deserialising outcome")
  }

  /// `GET /api/applications/<id>`
  pub async fn application(&self, id: Uuid) -> Result<Option<ApplicationView>> {
    let path = format!("/applications/{id}");
    let resp = self
      .client
      .get(self.url(&path))
      .send()
      .await
      .with_context(|| format!("GET {path} failed"))?;

    match resp.status() {
      StatusCode::NOT_FOUND => Ok(None),
      s if s.is_success() => {
        Ok(Some(resp.json().await.context("deserialising application")?))
      }
      s => Err(anyhow!("GET {path} → {s}")),
    }
  }

  /// `GET /api/applications/<id>/answers[?min_version=<n>]`, once.
  pub async fn try_form_answers(
    &self,
    id: Uuid,
    min_version: Option<u64>,
  ) -> Result<Option<FormAnswers>> {
    let path = format!("/applications/{id}/answers");
    let mut req = self.client.get(self.url(&path));
    if let Some(min) = min_version {
      req = req.query(&[("min_version", min)]);
    }
    let resp = req
      .send()
      .await
      .with_context(|| format!("GET {path} failed"))?;

    match resp.status() {
      StatusCode::NOT_FOUND => Ok(None),
      s if s.is_success() => {
        Ok(Some(resp.json().await.context("deserialising form answers")?))
      }
      s => Err(anyhow!("GET {path} → {s}")),
    }
  }

  /// Poll until the answers of application `id` reach `min_version`.
  pub async fn form_answers(
    &self,
    id: Uuid,
    min_version: Option<u64>,
  ) -> Result<FormAnswers, RetryError<anyhow::Error>> {
    poll_until_found(&self.poll, || self.try_form_answers(id, min_version)).await
  }
}
