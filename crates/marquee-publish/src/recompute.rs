//! Status recomputation per module kind.
//!
//! [`derive_status`] is pure; this module gathers its inputs from storage.
//! Kinds differ in where children come from and what blocks them:
//!
//! - schema kinds (app copy, sku, store copy) must cover every required key;
//! - a selector config is blocked by any sku it ranks that is still a draft,
//!   and rows naming a sku that no longer exists drop to incomplete;
//! - a campaign's children are its references, and it is blocked while any
//!   referenced module is missing or a draft.

use std::collections::{BTreeSet, HashMap};

use marquee_core::{
  module::{DimensionKey, Module, ModuleKind, References, ValueKey},
  services::Integrations,
  status::{ModuleStatus, StatusInputs, ValueStatus, derive_status},
  store::ModuleRepository,
};
use tracing::debug;
use uuid::Uuid;

use crate::{Engine, Error, Result, locks::LockKey};

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  /// Recompute and persist a module's status.
  pub async fn recompute(&self, id: Uuid) -> Result<Module> {
    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    if self.refresh_status(&mut module).await? {
      self.save(&mut module).await?;
    }
    Ok(module)
  }

  /// Re-derive `module.status` in place, returning whether it changed. The
  /// caller holds the module lock and saves the module.
  pub(crate) async fn refresh_status(&self, module: &mut Module) -> Result<bool> {
    let next = match module.kind {
      ModuleKind::Campaign => self.campaign_status(module).await?,
      ModuleKind::SelectorConfig => self.selector_status(module).await?,
      _ => self.schema_status(module).await?,
    };
    if next == module.status {
      return Ok(false);
    }
    debug!(module_id = %module.id, from = %module.status, to = %next, "status changed");
    module.status = next;
    Ok(true)
  }

  async fn schema_status(&self, module: &Module) -> Result<ModuleStatus> {
    let values = self.values(module.id).await?;
    let required = match module.kind.has_required_schema() {
      true => self
        .get_schema(&module.store_id, &module.product_id)
        .await?
        .map(|s| s.required_keys(module.kind, module.platform.as_deref())),
      false => None,
    };
    let children: Vec<_> = values.iter().map(|v| (v.key.clone(), v.status)).collect();
    Ok(derive(module, &children, required.as_ref(), false))
  }

  async fn selector_status(&self, module: &Module) -> Result<ModuleStatus> {
    let mut values = self.values(module.id).await?;
    let mut skus: HashMap<Uuid, Option<ModuleStatus>> = HashMap::new();
    let mut blocked = false;

    for value in &mut values {
      let DimensionKey::CountrySku { sku_id, .. } = &value.key.dimension else { continue };
      let sku_id = *sku_id;
      let sku_status = match skus.get(&sku_id) {
        Some(s) => s.clone(),
        None => {
          let s = self
            .find(sku_id)
            .await?
            .filter(|m| m.kind == ModuleKind::Sku)
            .map(|m| m.status);
          skus.insert(sku_id, s.clone());
          s
        }
      };
      match sku_status {
        None if value.status != ValueStatus::Incomplete => {
          debug!(module_id = %module.id, %sku_id, "selector row names a missing sku");
          value.status = ValueStatus::Incomplete;
          self.save_value(value).await?;
        }
        Some(ModuleStatus::Draft) => blocked = true,
        _ => {}
      }
    }

    let children: Vec<_> = values.iter().map(|v| (v.key.clone(), v.status)).collect();
    Ok(derive(module, &children, None, blocked))
  }

  async fn campaign_status(&self, module: &Module) -> Result<ModuleStatus> {
    let mut blocked = false;
    let mut children = vec![];
    for (kind, id) in module.references.entries() {
      match self.find(id).await? {
        Some(sub) if sub.kind == kind && sub.status != ModuleStatus::Draft => {}
        _ => blocked = true,
      }
      children.push((reference_key(kind), ValueStatus::Saved));
    }
    let required: BTreeSet<_> = References::REQUIRED.into_iter().map(reference_key).collect();
    Ok(derive(module, &children, Some(&required), blocked))
  }

  /// Fail with `Validation` unless the module is publishable as it stands.
  pub(crate) async fn ensure_publishable(&self, id: Uuid) -> Result<Module> {
    let module = self.recompute(id).await?;
    if module.status == ModuleStatus::Draft {
      return Err(Error::Validation(format!(
        "{} {} is incomplete",
        module.kind, module.id
      )));
    }
    Ok(module)
  }
}

/// Campaign child key for one reference slot.
fn reference_key(kind: ModuleKind) -> ValueKey {
  ValueKey::new("reference", DimensionKey::Slot { name: kind.as_str().to_owned() })
}

fn derive(
  module: &Module,
  children: &[(ValueKey, ValueStatus)],
  required: Option<&BTreeSet<ValueKey>>,
  blocked: bool,
) -> ModuleStatus {
  derive_status(&StatusInputs {
    current: &module.status,
    deployment: &module.deployment,
    children,
    required,
    blocked,
    settled: &module.kind.settled_status(),
  })
}
