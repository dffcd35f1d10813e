//! Engine tuning, deserialised from the `[engine]` table of the server config.

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Pipeline attempts per publish, including the first.
  pub max_attempts:              u32,
  pub initial_backoff_ms:        u64,
  pub max_backoff_ms:            u64,
  pub backoff_multiplier:        f64,
  /// Concurrent asset copies/purges within one step.
  pub asset_concurrency:         usize,
  /// Public base URL assets are served from; purge targets are built on it.
  pub asset_base_url:            String,
  /// A cached config-delivery token is reused while it has more than this
  /// long left to live.
  pub token_refresh_margin_secs: i64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_attempts:              5,
      initial_backoff_ms:        500,
      max_backoff_ms:            30_000,
      backoff_multiplier:        2.0,
      asset_concurrency:         4,
      asset_base_url:            "https://assets.example.com".to_string(),
      token_refresh_margin_secs: 300,
    }
  }
}

impl EngineConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts:  self.max_attempts.max(1),
      initial_delay: Duration::from_millis(self.initial_backoff_ms),
      max_delay:     Duration::from_millis(self.max_backoff_ms),
      multiplier:    self.backoff_multiplier,
    }
  }
}
