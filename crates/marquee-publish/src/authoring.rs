//! Editor operations: creating modules, editing their content and forcing
//! their status.

use marquee_core::{
  module::{Module, ModuleValue, NewModule, References, Role, ValueKey},
  services::Integrations,
  status::{ModuleStatus, ValueStatus},
  store::{ModuleQuery, ModuleRepository},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Engine, Error, Result, locks::LockKey};

/// Manual status changes an editor can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOverride {
  /// Mark live without running a publish.
  ForcePublish,
  /// Mark ended.
  Archive,
}

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  /// Create a module. The first module of a scope becomes its default; later
  /// ones start with a copy of the default's values.
  pub async fn create_module(&self, input: NewModule) -> Result<Module> {
    if input.kind.is_composite() {
      self.check_references(&input.store_id, &input.product_id, &input.references).await?;
    } else if !input.references.is_empty() {
      return Err(Error::Validation(format!("{} modules carry no references", input.kind)));
    }

    let module = self.repo.create_module(input).await.map_err(Error::store)?;
    if self.repo.claim_default(module.id).await.map_err(Error::store)? {
      debug!(module_id = %module.id, "module is the scope default");
    } else if !module.kind.is_composite() {
      self.seed_from_default(&module).await?;
    }

    info!(module_id = %module.id, kind = %module.kind, store_id = %module.store_id, "module created");
    self.recompute(module.id).await
  }

  async fn seed_from_default(&self, module: &Module) -> Result<()> {
    let mut query = ModuleQuery::scope(module.kind, &module.store_id, &module.product_id);
    query.is_default = Some(true);
    let Some(default) = self.list_modules(&query).await?.into_iter().next() else {
      return Ok(());
    };

    let values = self.values(default.id).await?;
    for v in &values {
      let status = match v.status.is_settled() {
        true => ValueStatus::Saved,
        false => ValueStatus::Incomplete,
      };
      self.save_value(&ModuleValue::new(module.id, v.key.clone(), v.value.clone(), status)).await?;
    }
    debug!(module_id = %module.id, default_id = %default.id, seeded = values.len(), "seeded from default");
    Ok(())
  }

  /// Set one child value. A null value marks the key incomplete.
  pub async fn set_value(&self, id: Uuid, key: ValueKey, value: serde_json::Value) -> Result<Module> {
    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    ensure_editable(&module)?;
    if module.kind.is_composite() {
      return Err(Error::Validation(format!(
        "campaign {id} content is set through its references"
      )));
    }

    let status = match value.is_null() {
      true => ValueStatus::Incomplete,
      false => ValueStatus::Saved,
    };
    self.save_value(&ModuleValue::new(id, key, value, status)).await?;

    if module.role() == Role::Staged {
      module.need_to_promote = true;
    }
    self.refresh_status(&mut module).await?;
    self.save(&mut module).await?;
    Ok(module)
  }

  /// Replace a campaign's references.
  pub async fn set_references(&self, id: Uuid, references: References) -> Result<Module> {
    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    ensure_editable(&module)?;
    if !module.kind.is_composite() {
      return Err(Error::Validation(format!("{} modules carry no references", module.kind)));
    }
    self.check_references(&module.store_id, &module.product_id, &references).await?;

    module.references = references;
    if module.role() == Role::Staged {
      module.need_to_promote = true;
    }
    self.refresh_status(&mut module).await?;
    self.save(&mut module).await?;
    Ok(module)
  }

  pub async fn override_status(&self, id: Uuid, action: StatusOverride) -> Result<Module> {
    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    if module.status.is_publish_in_progress() {
      return Err(Error::Conflict(format!("{} {id} is being published", module.kind)));
    }
    module.status = match action {
      StatusOverride::ForcePublish => ModuleStatus::Live,
      StatusOverride::Archive => ModuleStatus::Ended,
    };
    self.save(&mut module).await?;
    info!(module_id = %id, ?action, status = %module.status, "status overridden");
    Ok(module)
  }

  /// Every reference must exist, be of the slot's kind and share the
  /// campaign's store and product.
  async fn check_references(&self, store_id: &str, product_id: &str, refs: &References) -> Result<()> {
    for (kind, id) in refs.entries() {
      let target = self
        .find(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{kind} {id}")))?;
      if target.kind != kind || target.store_id != store_id || target.product_id != product_id {
        return Err(Error::Validation(format!(
          "{id} is not a {kind} of store {store_id} product {product_id}"
        )));
      }
    }
    Ok(())
  }
}

/// Content of a module being published, or of a promoted mirror, is not
/// edited directly.
fn ensure_editable(module: &Module) -> Result<()> {
  if module.status.is_publish_in_progress() {
    return Err(Error::Conflict(format!("{} {} is being published", module.kind, module.id)));
  }
  if module.role() == Role::Promoted {
    return Err(Error::Conflict(format!(
      "{} {} is promoted; edit its staged counterpart",
      module.kind, module.id
    )));
  }
  Ok(())
}
