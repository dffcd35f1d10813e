//! Error type for `marquee-publish`.

use marquee_core::services::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A referenced module, sub-resource or counterpart does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The module is not in a state that permits the operation.
  #[error("conflict: {0}")]
  Conflict(String),

  /// Required content is incomplete. Raised before any pipeline run.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("external service failure: {0}")]
  ExternalService(#[from] ServiceError),

  #[error("publish cancelled")]
  Cancelled,

  #[error("core error: {0}")]
  Core(#[from] marquee_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self { Self::Store(Box::new(e)) }

  /// Worth another pipeline attempt.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::ExternalService(_) | Self::Store(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
