//! Error type for `marquee-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] marquee_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("malformed column {column}: {value:?}")]
  Decode { column: &'static str, value: String },

  #[error("module not found: {0}")]
  ModuleNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
