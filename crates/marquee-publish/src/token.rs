//! Cached config-delivery credentials.

use chrono::{Duration, Utc};
use marquee_core::services::{AuthToken, ConfigDelivery, ServiceError};
use tokio::sync::Mutex;
use tracing::debug;

/// Holds the last token issued by the config-delivery service and reuses it
/// until it is within `margin` of expiring.
#[derive(Debug)]
pub struct TokenCache {
  margin: Duration,
  cached: Mutex<Option<AuthToken>>,
}

impl TokenCache {
  pub fn new(margin: Duration) -> Self { Self { margin, cached: Mutex::new(None) } }

  /// A usable bearer token, authenticating (and checking the connection)
  /// only when the cached one is missing or about to expire.
  pub async fn token<D: ConfigDelivery>(&self, delivery: &D) -> Result<String, ServiceError> {
    let mut slot = self.cached.lock().await;
    if let Some(cached) = slot.as_ref().filter(|t| t.expires_at - Utc::now() > self.margin) {
      debug!("reusing cached config-delivery token");
      return Ok(cached.token.clone());
    }

    let fresh = delivery.authenticate().await?;
    delivery.check_connection(&fresh.token).await?;
    debug!(expires_at = %fresh.expires_at, "obtained config-delivery token");
    let token = fresh.token.clone();
    *slot = Some(fresh);
    Ok(token)
  }

  pub async fn clear(&self) { *self.cached.lock().await = None; }
}
