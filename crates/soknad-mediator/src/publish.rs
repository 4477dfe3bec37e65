//! The `NeedPublisher` trait, the outbound boundary for need messages.
//!
//! Messages for one owner share a partition key, so a broker-backed
//! implementation keeps them in order. Publishing the same batch twice must
//! be harmless; receivers deduplicate on `message_id`.

use std::{convert::Infallible, future::Future, sync::Arc};

use soknad_core::mediator::NeedMessage;
use tokio::sync::Mutex;

/// Abstraction over the outbound message channel.
pub trait NeedPublisher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Publish every message of one processed event, in order.
  fn publish<'a>(
    &'a self,
    messages: &'a [NeedMessage],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── Tracing ─────────────────────────────────────────────────────────────────

/// Writes each message to the log instead of a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl NeedPublisher for TracingPublisher {
  type Error = Infallible;

  async fn publish<'a>(&'a self, messages: &'a [NeedMessage]) -> Result<(), Infallible> {
    for message in messages {
      tracing::info!(
        message_id = %message.message_id,
        key = %message.key,
        needs = ?message.needs,
        is_final = message.is_final,
        "need published"
      );
    }
    Ok(())
  }
}

// ─── Memory ──────────────────────────────────────────────────────────────────

/// Keeps every published message in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryPublisher {
  published: Arc<Mutex<Vec<NeedMessage>>>,
}

impl MemoryPublisher {
  pub fn new() -> Self { Self::default() }

  /// Everything published so far, oldest first.
  pub async fn published(&self) -> Vec<NeedMessage> {
    self.published.lock().await.clone()
  }

  /// Drain the buffer.
  pub async fn take(&self) -> Vec<NeedMessage> {
    std::mem::take(&mut *self.published.lock().await)
  }
}

impl NeedPublisher for MemoryPublisher {
  type Error = Infallible;

  async fn publish<'a>(&'a self, messages: &'a [NeedMessage]) -> Result<(), Infallible> {
    self.published.lock().await.extend_from_slice(messages);
    Ok(())
  }
}
