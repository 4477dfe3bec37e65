//! Error type for `soknad-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] soknad_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A text column held a value no enum variant answers to.
  #[error("unknown {column}: {value:?}")]
  UnknownValue { column: &'static str, value: String },

  /// An integer does not fit the column, or the column holds a value the
  /// domain type cannot represent.
  #[error("{column} out of range: {value}")]
  OutOfRange { column: &'static str, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
