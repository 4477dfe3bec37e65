//! Error type for `soknad-mediator`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] soknad_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("publish error: {0}")]
  Publish(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("application {0} not found")]
  ApplicationNotFound(Uuid),

  #[error("{event} must name an application")]
  MissingApplicationId { event: &'static str },
}

impl Error {
  /// Whether redelivering the same event can never succeed. Store and
  /// publish faults are transient; everything else is caused by the event.
  pub fn is_fatal(&self) -> bool {
    !matches!(self, Self::Store(_) | Self::Publish(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
