//! Contracts for the external systems a publish pushes content into.
//!
//! Implementations live outside this crate (HTTP clients in the server,
//! counting mocks in tests). Every failure is reported as a
//! [`ServiceError`]; the engine treats all of them as transient.

use std::{fmt, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{environment::Environment, module::ModuleKind};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// A failed call to an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
  pub service: &'static str,
  pub message: String,
}

impl ServiceError {
  pub fn new(service: &'static str, message: impl Into<String>) -> Self {
    Self { service, message: message.into() }
  }
}

impl fmt::Display for ServiceError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.service, self.message)
  }
}

impl std::error::Error for ServiceError {}

// ─── Asset store ─────────────────────────────────────────────────────────────

/// Object storage holding published binary assets.
pub trait AssetStore: Send + Sync {
  fn copy<'a>(
    &'a self,
    source_key: &'a str,
    dest_key: &'a str,
  ) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;

  fn delete<'a>(&'a self, key: &'a str) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;
}

// ─── Edge cache ──────────────────────────────────────────────────────────────

/// CDN / image-proxy cache in front of the asset store.
pub trait EdgeCache: Send + Sync {
  /// Drop one cached asset URL.
  fn purge<'a>(&'a self, asset_url: &'a str) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;

  /// Invalidate every cached object under a path prefix.
  fn invalidate<'a>(
    &'a self,
    path_prefix: &'a str,
  ) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;
}

// ─── Config delivery ─────────────────────────────────────────────────────────

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
  pub token:      String,
  pub expires_at: DateTime<Utc>,
}

/// One module's configuration, addressed to one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
  pub environment: Environment,
  pub store_id:    String,
  pub product_id:  String,
  pub kind:        ModuleKind,
  pub payload:     serde_json::Value,
}

/// The service apps read their live configuration from.
pub trait ConfigDelivery: Send + Sync {
  fn authenticate(&self) -> impl Future<Output = Result<AuthToken, ServiceError>> + Send + '_;

  fn check_connection<'a>(
    &'a self,
    token: &'a str,
  ) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;

  fn deploy<'a>(
    &'a self,
    request: &'a DeployRequest,
    token: &'a str,
  ) -> impl Future<Output = Result<(), ServiceError>> + Send + 'a;
}

// ─── Bundle ──────────────────────────────────────────────────────────────────

/// The set of collaborators a publish talks to.
pub trait Integrations: Send + Sync + 'static {
  type Assets: AssetStore;
  type Cache: EdgeCache;
  type Delivery: ConfigDelivery;

  fn assets(&self) -> &Self::Assets;
  fn cache(&self) -> &Self::Cache;
  fn delivery(&self) -> &Self::Delivery;
}

/// Plain holder implementing [`Integrations`].
#[derive(Debug, Clone)]
pub struct Services<A, C, D> {
  pub assets:   A,
  pub cache:    C,
  pub delivery: D,
}

impl<A, C, D> Integrations for Services<A, C, D>
where
  A: AssetStore + 'static,
  C: EdgeCache + 'static,
  D: ConfigDelivery + 'static,
{
  type Assets = A;
  type Cache = C;
  type Delivery = D;

  fn assets(&self) -> &A { &self.assets }

  fn cache(&self) -> &C { &self.cache }

  fn delivery(&self) -> &D { &self.delivery }
}
