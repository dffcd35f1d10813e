//! Fixtures and counting mocks shared by the crate's tests.

use std::sync::{
  Mutex,
  atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

use chrono::{Duration, Utc};
use marquee_core::{
  module::{Module, ModuleKind, NewModule},
  services::{AssetStore, AuthToken, ConfigDelivery, DeployRequest, EdgeCache, ServiceError, Services},
  status::ModuleStatus,
};
use marquee_store_sqlite::SqliteRepository;
use uuid::Uuid;

use crate::{Engine, EngineConfig};

pub type TestEngine = Engine<SqliteRepository, Services<MockAssets, MockCache, MockDelivery>>;

/// An unsaved module with no content.
pub fn sample_module(kind: ModuleKind) -> Module {
  let n = NewModule::new(kind, "s1", "p1", "m");
  let now = Utc::now();
  Module {
    id:              Uuid::new_v4(),
    kind:            n.kind,
    store_id:        n.store_id,
    product_id:      n.product_id,
    name:            n.name,
    platform:        None,
    status:          ModuleStatus::Ready,
    is_default:      false,
    deployment:      Default::default(),
    promotion_id:    None,
    staged_id:       None,
    has_changes:     false,
    need_to_promote: false,
    promoted_at:     None,
    references:      Default::default(),
    attributes:      Default::default(),
    created_at:      now,
    updated_at:      now,
  }
}

pub fn test_config() -> EngineConfig {
  EngineConfig {
    max_attempts: 3,
    initial_backoff_ms: 1,
    max_backoff_ms: 2,
    asset_base_url: "https://cdn.test".into(),
    ..Default::default()
  }
}

pub async fn test_engine() -> TestEngine {
  test_engine_with(MockDelivery::default()).await
}

pub async fn test_engine_with(delivery: MockDelivery) -> TestEngine {
  let repo = SqliteRepository::open_in_memory().await.expect("in-memory store");
  let services = Services { assets: MockAssets::default(), cache: MockCache::default(), delivery };
  Engine::new(repo, services, test_config())
}

/// Consume one scripted failure, if any remain.
fn take_failure(remaining: &AtomicU32) -> bool {
  remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

// ─── Asset store ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockAssets {
  pub copies:    Mutex<Vec<(String, String)>>,
  pub fail_next: AtomicU32,
}

impl MockAssets {
  pub fn copy_count(&self) -> usize { self.copies.lock().unwrap().len() }
}

impl AssetStore for MockAssets {
  async fn copy<'a>(&'a self, source_key: &'a str, dest_key: &'a str) -> Result<(), ServiceError> {
    if take_failure(&self.fail_next) {
      return Err(ServiceError::new("assets", "copy failed"));
    }
    self.copies.lock().unwrap().push((source_key.to_owned(), dest_key.to_owned()));
    Ok(())
  }

  async fn delete<'a>(&'a self, _key: &'a str) -> Result<(), ServiceError> { Ok(()) }
}

// ─── Edge cache ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockCache {
  pub purged:      Mutex<Vec<String>>,
  pub invalidated: Mutex<Vec<String>>,
}

impl EdgeCache for MockCache {
  async fn purge<'a>(&'a self, asset_url: &'a str) -> Result<(), ServiceError> {
    self.purged.lock().unwrap().push(asset_url.to_owned());
    Ok(())
  }

  async fn invalidate<'a>(&'a self, path_prefix: &'a str) -> Result<(), ServiceError> {
    self.invalidated.lock().unwrap().push(path_prefix.to_owned());
    Ok(())
  }
}

// ─── Config delivery ─────────────────────────────────────────────────────────

pub struct MockDelivery {
  pub authentications: AtomicUsize,
  pub deployed:        Mutex<Vec<DeployRequest>>,
  /// Deploy calls to fail before succeeding again.
  pub fail_next:       AtomicU32,
  /// Make every deploy wait forever.
  pub hang:            AtomicBool,
  pub token_ttl:       Duration,
}

impl Default for MockDelivery {
  fn default() -> Self {
    Self {
      authentications: AtomicUsize::new(0),
      deployed:        Mutex::new(vec![]),
      fail_next:       AtomicU32::new(0),
      hang:            AtomicBool::new(false),
      token_ttl:       Duration::hours(1),
    }
  }
}

impl MockDelivery {
  pub fn deploy_count(&self) -> usize { self.deployed.lock().unwrap().len() }

  pub fn deployed_kinds(&self) -> Vec<ModuleKind> {
    self.deployed.lock().unwrap().iter().map(|r| r.kind).collect()
  }
}

impl ConfigDelivery for MockDelivery {
  async fn authenticate(&self) -> Result<AuthToken, ServiceError> {
    let n = self.authentications.fetch_add(1, Ordering::SeqCst);
    Ok(AuthToken { token: format!("token-{n}"), expires_at: Utc::now() + self.token_ttl })
  }

  async fn check_connection<'a>(&'a self, _token: &'a str) -> Result<(), ServiceError> { Ok(()) }

  async fn deploy<'a>(&'a self, request: &'a DeployRequest, _token: &'a str) -> Result<(), ServiceError> {
    if self.hang.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    if take_failure(&self.fail_next) {
      return Err(ServiceError::new("config-delivery", "503 service unavailable"));
    }
    self.deployed.lock().unwrap().push(request.clone());
    Ok(())
  }
}
