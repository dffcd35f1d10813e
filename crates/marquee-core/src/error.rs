//! Error types for `marquee-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid environment code: {0:?}")]
  InvalidEnvironment(String),

  #[error("unknown module status: {0:?}")]
  UnknownModuleStatus(String),

  #[error("unknown value status: {0:?}")]
  UnknownValueStatus(String),

  #[error("unknown module kind: {0:?}")]
  UnknownModuleKind(String),

  #[error("module {0} cannot be linked to itself")]
  SelfLink(Uuid),

  #[error("module {0} is linked as both staged and promoted")]
  DoubleLink(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
