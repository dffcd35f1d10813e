//! The [`Engine`] handle: shared state behind every publishing operation.
//!
//! Operations are grouped by concern in sibling modules (`authoring`,
//! `recompute`, `publish`, `promotion`) as further `impl` blocks on this
//! type.

use std::sync::Arc;

use chrono::{Duration, Utc};
use marquee_core::{
  journal::PublishSnapshot,
  module::{Module, ModuleValue, ScopeSchema},
  services::Integrations,
  store::{ModuleQuery, ModuleRepository},
};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
  Error, Result, config::EngineConfig, locks::LockTable, retry::RetryPolicy, token::TokenCache,
};

pub struct Engine<R, I> {
  pub(crate) repo:          R,
  pub(crate) services:      I,
  pub(crate) config:        EngineConfig,
  pub(crate) retry:         RetryPolicy,
  pub(crate) locks:         LockTable,
  pub(crate) tokens:        TokenCache,
  pub(crate) asset_permits: Arc<Semaphore>,
}

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  pub fn new(repo: R, services: I, config: EngineConfig) -> Self {
    Self {
      retry: config.retry_policy(),
      tokens: TokenCache::new(Duration::seconds(config.token_refresh_margin_secs)),
      asset_permits: Arc::new(Semaphore::new(config.asset_concurrency.max(1))),
      locks: LockTable::default(),
      repo,
      services,
      config,
    }
  }

  pub fn repository(&self) -> &R { &self.repo }

  pub fn services(&self) -> &I { &self.services }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ─── Reads ──────────────────────────────────────────────────────────────

  pub async fn get_module(&self, id: Uuid) -> Result<Module> { self.load(id).await }

  pub async fn list_modules(&self, query: &ModuleQuery) -> Result<Vec<Module>> {
    self.repo.list_modules(query).await.map_err(Error::store)
  }

  pub async fn module_values(&self, id: Uuid) -> Result<Vec<ModuleValue>> {
    self.load(id).await?;
    self.values(id).await
  }

  /// Publish snapshots for a module, oldest first.
  pub async fn history(&self, id: Uuid) -> Result<Vec<PublishSnapshot>> {
    self.load(id).await?;
    self.repo.list_snapshots(id).await.map_err(Error::store)
  }

  pub async fn get_schema(&self, store_id: &str, product_id: &str) -> Result<Option<ScopeSchema>> {
    self.repo.get_schema(store_id, product_id).await.map_err(Error::store)
  }

  pub async fn put_schema(&self, store_id: &str, product_id: &str, schema: &ScopeSchema) -> Result<()> {
    self.repo.put_schema(store_id, product_id, schema).await.map_err(Error::store)
  }

  // ─── Helpers ────────────────────────────────────────────────────────────

  pub(crate) async fn find(&self, id: Uuid) -> Result<Option<Module>> {
    self.repo.get_module(id).await.map_err(Error::store)
  }

  pub(crate) async fn load(&self, id: Uuid) -> Result<Module> {
    self.find(id).await?.ok_or_else(|| Error::NotFound(format!("module {id}")))
  }

  pub(crate) async fn values(&self, id: Uuid) -> Result<Vec<ModuleValue>> {
    self.repo.list_values(id).await.map_err(Error::store)
  }

  pub(crate) async fn save(&self, module: &mut Module) -> Result<()> {
    module.check_links()?;
    module.updated_at = Utc::now();
    self.repo.update_module(module).await.map_err(Error::store)
  }

  pub(crate) async fn save_value(&self, value: &ModuleValue) -> Result<()> {
    self.repo.save_value(value).await.map_err(Error::store)
  }
}
