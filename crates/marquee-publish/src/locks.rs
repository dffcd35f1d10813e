//! In-process mutual exclusion for module read-modify-write cycles.
//!
//! A module lock guards one module row for a single load/mutate/save cycle;
//! no other module lock is taken while it is held. A
//! scope lock guards a (kind, store, product) scope and is held across a
//! finalize, so that at most one module per scope can be made live in an
//! environment at a time. Scope locks are always acquired before module
//! locks. A publish lock marks a module whose pipeline is being driven in
//! this process and is only ever tried, never waited on. A promotion lock
//! serialises promote and pull for one staged/promoted pair and is taken
//! before any module lock.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use marquee_core::module::{Module, ModuleKind};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
  Module(Uuid),
  /// Held for the whole of a publish or resume of the root module.
  Publish(Uuid),
  /// Held across a promote or pull, keyed by the staged module.
  Promotion(Uuid),
  Scope { kind: ModuleKind, store_id: String, product_id: String },
}

impl LockKey {
  pub fn scope_of(module: &Module) -> Self {
    Self::Scope {
      kind:       module.kind,
      store_id:   module.store_id.clone(),
      product_id: module.product_id.clone(),
    }
  }
}

#[derive(Debug, Default)]
pub struct LockTable {
  entries: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
  pub async fn lock(&self, key: LockKey) -> OwnedMutexGuard<()> {
    self.entry(key).lock_owned().await
  }

  /// Like [`lock`](Self::lock) but gives up instead of waiting.
  pub fn try_lock(&self, key: LockKey) -> Option<OwnedMutexGuard<()>> {
    self.entry(key).try_lock_owned().ok()
  }

  fn entry(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    // Entries only the table itself still holds are idle.
    entries.retain(|_, m| Arc::strong_count(m) > 1);
    entries.entry(key).or_default().clone()
  }
}
