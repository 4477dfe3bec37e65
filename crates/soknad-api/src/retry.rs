//! Bounded polling for read-side projections that trail the write side.

use std::{fmt, future::Future, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// How long to keep polling before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts:     u32,
  #[serde(default = "default_initial_delay_ms")]
  pub initial_delay_ms: u64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms:     u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_initial_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 2_000 }

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      max_attempts:     default_max_attempts(),
      initial_delay_ms: default_initial_delay_ms(),
      max_delay_ms:     default_max_delay_ms(),
    }
  }
}

impl PollConfig {
  /// The pause after the `retry`th miss (zero-based): doubles each time,
  /// capped at `max_delay_ms`.
  pub fn delay(&self, retry: u32) -> Duration {
    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    let ms = self
      .initial_delay_ms
      .saturating_mul(factor)
      .min(self.max_delay_ms);
    Duration::from_millis(ms)
  }
}

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
  #[error("still not found after {attempts} attempts")]
  NotFound { attempts: u32 },

  #[error("{0}")]
  Failed(E),
}

/// Call `fetch` until it yields a value, sleeping between misses.
///
/// An `Err` from `fetch` ends polling at once. At least one attempt is
/// always made.
pub async fn poll_until_found<T, E, F, Fut>(
  config: &PollConfig,
  mut fetch: F,
) -> Result<T, RetryError<E>>
where
  E: fmt::Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<Option<T>, E>>,
{
  let attempts = config.max_attempts.max(1);
  for attempt in 1..=attempts {
    if let Some(found) = fetch().await.map_err(RetryError::Failed)? {
      return Ok(found);
    }
    if attempt < attempts {
      let delay = config.delay(attempt - 1);
      tracing::debug!(attempt, ?delay, "not found yet, retrying");
      tokio::time::sleep(delay).await;
    }
  }
  Err(RetryError::NotFound { attempts })
}
