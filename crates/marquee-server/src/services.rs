//! Production implementations of the external collaborators.

use std::{
  io,
  path::{Component, Path, PathBuf},
  time::Duration,
};

use chrono::Utc;
use marquee_core::services::{
  AssetStore, AuthToken, ConfigDelivery, DeployRequest, EdgeCache, ServiceError, Services,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use crate::config::ServicesConfig;

pub type HttpServices = Services<LocalAssetStore, HttpEdgeCache, HttpConfigDelivery>;

pub fn build(cfg: &ServicesConfig) -> anyhow::Result<HttpServices> {
  let client = Client::builder()
    .timeout(Duration::from_secs(cfg.http_timeout_secs))
    .build()?;
  Ok(Services {
    assets:   LocalAssetStore::new(&cfg.asset_root),
    cache:    HttpEdgeCache {
      client:         client.clone(),
      purge_url:      cfg.edge_purge_url.clone(),
      invalidate_url: cfg.edge_invalidate_url.clone(),
      api_key:        cfg.edge_api_key.clone(),
    },
    delivery: HttpConfigDelivery {
      client,
      base_url: cfg.config_delivery_url.trim_end_matches('/').to_owned(),
      client_id: cfg.config_delivery_client_id.clone(),
      client_secret: cfg.config_delivery_client_secret.clone(),
    },
  })
}

/// Turn a transport error or non-2xx response into a [`ServiceError`].
async fn check(service: &'static str, sent: reqwest::Result<Response>) -> Result<Response, ServiceError> {
  let resp = sent.map_err(|e| ServiceError::new(service, e.to_string()))?;
  if resp.status().is_success() {
    return Ok(resp);
  }
  let status = resp.status();
  let body = resp.text().await.unwrap_or_default();
  Err(ServiceError::new(service, format!("{status}: {body}")))
}

// ─── Config delivery ─────────────────────────────────────────────────────────

pub struct HttpConfigDelivery {
  client:        Client,
  base_url:      String,
  client_id:     String,
  client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
  access_token: String,
  expires_in:   i64,
}

const DELIVERY: &str = "config-delivery";

impl ConfigDelivery for HttpConfigDelivery {
  async fn authenticate(&self) -> Result<AuthToken, ServiceError> {
    let sent = self
      .client
      .post(format!("{}/oauth/token", self.base_url))
      .json(&json!({
        "grant_type": "client_credentials",
        "client_id": self.client_id,
        "client_secret": self.client_secret,
      }))
      .send()
      .await;
    let token: TokenResponse = check(DELIVERY, sent)
      .await?
      .json()
      .await
      .map_err(|e| ServiceError::new(DELIVERY, format!("malformed token response: {e}")))?;
    Ok(AuthToken {
      token:      token.access_token,
      expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
    })
  }

  async fn check_connection<'a>(&'a self, token: &'a str) -> Result<(), ServiceError> {
    let sent = self
      .client
      .get(format!("{}/health", self.base_url))
      .bearer_auth(token)
      .send()
      .await;
    check(DELIVERY, sent).await.map(drop)
  }

  async fn deploy<'a>(&'a self, request: &'a DeployRequest, token: &'a str) -> Result<(), ServiceError> {
    let url = format!(
      "{}/environments/{}/stores/{}/products/{}/modules/{}",
      self.base_url, request.environment, request.store_id, request.product_id, request.kind
    );
    let sent = self
      .client
      .put(url)
      .bearer_auth(token)
      .json(&request.payload)
      .send()
      .await;
    check(DELIVERY, sent).await.map(drop)
  }
}

// ─── Edge cache ──────────────────────────────────────────────────────────────

pub struct HttpEdgeCache {
  client:         Client,
  purge_url:      String,
  invalidate_url: String,
  api_key:        String,
}

const EDGE: &str = "edge-cache";

impl EdgeCache for HttpEdgeCache {
  async fn purge<'a>(&'a self, asset_url: &'a str) -> Result<(), ServiceError> {
    let sent = self
      .client
      .post(&self.purge_url)
      .header("x-api-key", &self.api_key)
      .json(&json!({ "url": asset_url }))
      .send()
      .await;
    check(EDGE, sent).await.map(drop)
  }

  async fn invalidate<'a>(&'a self, path_prefix: &'a str) -> Result<(), ServiceError> {
    let sent = self
      .client
      .post(&self.invalidate_url)
      .header("x-api-key", &self.api_key)
      .json(&json!({ "paths": [format!("{path_prefix}*")] }))
      .send()
      .await;
    check(EDGE, sent).await.map(drop)
  }
}

// ─── Asset store ─────────────────────────────────────────────────────────────

/// Asset store over a local directory; keys are relative paths under `root`.
pub struct LocalAssetStore {
  root: PathBuf,
}

const ASSETS: &str = "assets";

impl LocalAssetStore {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  fn resolve(&self, key: &str) -> Result<PathBuf, ServiceError> {
    let rel = Path::new(key);
    let escapes = rel
      .components()
      .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if key.is_empty() || escapes {
      return Err(ServiceError::new(ASSETS, format!("invalid asset key {key:?}")));
    }
    Ok(self.root.join(rel))
  }
}

fn io_error(e: io::Error) -> ServiceError { ServiceError::new(ASSETS, e.to_string()) }

impl AssetStore for LocalAssetStore {
  async fn copy<'a>(&'a self, source_key: &'a str, dest_key: &'a str) -> Result<(), ServiceError> {
    let source = self.resolve(source_key)?;
    let dest = self.resolve(dest_key)?;
    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::copy(&source, &dest).await.map_err(io_error)?;
    Ok(())
  }

  async fn delete<'a>(&'a self, key: &'a str) -> Result<(), ServiceError> {
    match tokio::fs::remove_file(self.resolve(key)?).await {
      Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(e)),
      _ => Ok(()),
    }
  }
}
