//! Error types for `soknad-core`.

use std::fmt;

use thiserror::Error;

use crate::activity::{ContextStack, NeedKind};

/// The payload of a severe activity: what went wrong and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevereFailure {
  pub message:  String,
  pub contexts: ContextStack,
}

impl fmt::Display for SevereFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} [{}]", self.message, self.contexts)
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("severe: {0}")]
  Severe(SevereFailure),

  #[error("need {kind} raised more than once in context {context}")]
  DuplicateNeed { kind: NeedKind, context: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the failure was caused by the inbound event itself. Such events
  /// must not be retried as-is.
  pub fn is_severe(&self) -> bool {
    matches!(self, Self::Severe(_) | Self::DuplicateNeed { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
