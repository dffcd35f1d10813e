//! The `ModuleRepository` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `marquee-store-sqlite`).
//! The engine and HTTP layers depend on this abstraction, not on any concrete
//! backend. Persistence only: no status rules live behind this trait.

use std::future::Future;

use uuid::Uuid;

use crate::{
  environment::Environment,
  journal::{PublishJob, PublishSnapshot},
  module::{Module, ModuleKind, ModuleValue, NewModule, ScopeSchema},
  status::ModuleStatus,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`ModuleRepository::list_modules`]. Every `None` field is
/// unconstrained.
#[derive(Debug, Clone, Default)]
pub struct ModuleQuery {
  pub kind:        Option<ModuleKind>,
  pub store_id:    Option<String>,
  pub product_id:  Option<String>,
  pub status:      Option<ModuleStatus>,
  pub is_default:  Option<bool>,
  /// Only modules currently live in this environment.
  pub deployed_to: Option<Environment>,
  /// Only modules whose campaign references include this id.
  pub referencing: Option<Uuid>,
}

impl ModuleQuery {
  /// Modules of one kind within a store/product.
  pub fn scope(kind: ModuleKind, store_id: &str, product_id: &str) -> Self {
    Self {
      kind: Some(kind),
      store_id: Some(store_id.to_owned()),
      product_id: Some(product_id.to_owned()),
      ..Default::default()
    }
  }

  pub fn live_in(mut self, env: Environment) -> Self {
    self.status = Some(ModuleStatus::Live);
    self.deployed_to = Some(env);
    self
  }

  pub fn referencing(mut self, id: Uuid) -> Self {
    self.referencing = Some(id);
    self
  }

  /// Evaluate the query against a module in memory. Backends may push some
  /// constraints down to storage and finish with this.
  pub fn matches(&self, m: &Module) -> bool {
    self.kind.is_none_or(|k| m.kind == k)
      && self.store_id.as_deref().is_none_or(|s| m.store_id == s)
      && self.product_id.as_deref().is_none_or(|p| m.product_id == p)
      && self.status.as_ref().is_none_or(|s| &m.status == s)
      && self.is_default.is_none_or(|d| m.is_default == d)
      && self.deployed_to.as_ref().is_none_or(|e| m.deployment.is_live_in(e))
      && self
        .referencing
        .is_none_or(|id| m.references.entries().iter().any(|(_, r)| *r == id))
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a module persistence backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ModuleRepository: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Modules ───────────────────────────────────────────────────────────

  /// Persist a new module in `draft` with an empty deployment.
  fn create_module(
    &self,
    input: NewModule,
  ) -> impl Future<Output = Result<Module, Self::Error>> + Send + '_;

  /// Retrieve a module by id. Returns `None` if not found.
  fn get_module(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Module>, Self::Error>> + Send + '_;

  fn list_modules<'a>(
    &'a self,
    query: &'a ModuleQuery,
  ) -> impl Future<Output = Result<Vec<Module>, Self::Error>> + Send + 'a;

  /// Overwrite a module's mutable fields. Errors if the module is missing.
  fn update_module<'a>(
    &'a self,
    module: &'a Module,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete a module and its values. Returns `false` if it did not exist.
  fn delete_module(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Atomically make `id` the default of its (kind, store, product) scope if
  /// that scope has no default yet. Returns whether the claim succeeded.
  fn claim_default(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Values ────────────────────────────────────────────────────────────

  fn list_values(
    &self,
    module_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ModuleValue>, Self::Error>> + Send + '_;

  /// Insert or replace the value for `(module_id, key)`.
  fn save_value<'a>(
    &'a self,
    value: &'a ModuleValue,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_value(
    &self,
    value_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Scope schema ──────────────────────────────────────────────────────

  fn get_schema<'a>(
    &'a self,
    store_id: &'a str,
    product_id: &'a str,
  ) -> impl Future<Output = Result<Option<ScopeSchema>, Self::Error>> + Send + 'a;

  fn put_schema<'a>(
    &'a self,
    store_id: &'a str,
    product_id: &'a str,
    schema: &'a ScopeSchema,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Journal ───────────────────────────────────────────────────────────

  /// Append a history snapshot. Snapshots are never updated.
  fn append_snapshot<'a>(
    &'a self,
    snapshot: &'a PublishSnapshot,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Snapshots for a module, oldest first.
  fn list_snapshots(
    &self,
    module_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PublishSnapshot>, Self::Error>> + Send + '_;

  /// Insert or replace a publish job.
  fn save_job<'a>(
    &'a self,
    job: &'a PublishJob,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The running job for a module, if any.
  fn open_job(
    &self,
    module_id: Uuid,
  ) -> impl Future<Output = Result<Option<PublishJob>, Self::Error>> + Send + '_;
}
