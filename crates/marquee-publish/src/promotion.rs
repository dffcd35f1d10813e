//! Copying a staged module's content into its promoted counterpart.
//!
//! The first promote creates the counterpart and links the pair. Later
//! promotes never overwrite: they compare the two sides and flag the
//! promoted module as having changes to pull. A pull either accepts those
//! changes (copying them over) or declines them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use marquee_core::{
  module::{Module, ModuleValue, NewModule, References, Role, ValueKey},
  services::Integrations,
  store::ModuleRepository,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{Engine, Error, Result, locks::LockKey};

/// What a promote did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "module", rename_all = "snake_case")]
pub enum PromoteOutcome {
  /// A promoted counterpart was created and populated.
  Created(Module),
  /// The counterpart differs and is now flagged as having changes.
  ChangesPending(Module),
  /// The counterpart already matches.
  UpToDate(Module),
}

impl PromoteOutcome {
  /// The promoted counterpart.
  pub fn module(&self) -> &Module {
    match self {
      Self::Created(m) | Self::ChangesPending(m) | Self::UpToDate(m) => m,
    }
  }
}

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  pub async fn promote(&self, staged_id: Uuid) -> Result<PromoteOutcome> {
    let _promotion = self.locks.lock(LockKey::Promotion(staged_id)).await;

    let staged = self.load(staged_id).await?;
    if staged.role() == Role::Promoted {
      return Err(Error::Conflict(format!("{} {staged_id} is itself a promoted module", staged.kind)));
    }
    if staged.status.is_publish_in_progress() {
      return Err(Error::Conflict(format!("{} {staged_id} is being published", staged.kind)));
    }
    let staged_values = self.values(staged_id).await?;
    let references = self.promoted_references(&staged).await?;

    let Some(promoted_id) = staged.promotion_id else {
      return self.create_counterpart(&staged, references, &staged_values).await;
    };

    let promoted = self
      .find(promoted_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("promoted counterpart {promoted_id} of {staged_id}")))?;
    let promoted_values = self.values(promoted_id).await?;

    let differs = Content::staged(&staged, &references, &staged_values)
      != Content::promoted(&promoted, &promoted_values);

    self.mark_promoted(staged_id, None).await?;

    if !differs {
      info!(module_id = %staged_id, %promoted_id, "promotion up to date");
      return Ok(PromoteOutcome::UpToDate(promoted));
    }

    let _guard = self.locks.lock(LockKey::Module(promoted_id)).await;
    let mut promoted = self.load(promoted_id).await?;
    promoted.has_changes = true;
    self.save(&mut promoted).await?;
    info!(module_id = %staged_id, %promoted_id, "promoted module has changes to pull");
    Ok(PromoteOutcome::ChangesPending(promoted))
  }

  /// Accept or decline the pending changes on a promoted module.
  pub async fn pull(&self, promoted_id: Uuid, accept_changes: bool) -> Result<Module> {
    let promoted = self.load(promoted_id).await?;
    let Some(staged_id) = promoted.staged_id else {
      return Err(Error::Conflict(format!("{} {promoted_id} is not a promoted module", promoted.kind)));
    };
    let _promotion = self.locks.lock(LockKey::Promotion(staged_id)).await;

    if !accept_changes {
      let _guard = self.locks.lock(LockKey::Module(promoted_id)).await;
      let mut promoted = self.load(promoted_id).await?;
      promoted.has_changes = false;
      self.save(&mut promoted).await?;
      info!(module_id = %promoted_id, "promoted changes declined");
      return Ok(promoted);
    }

    let staged = self
      .find(staged_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("staged counterpart {staged_id} of {promoted_id}")))?;
    let staged_values = self.values(staged_id).await?;
    let references = self.promoted_references(&staged).await?;

    let _guard = self.locks.lock(LockKey::Module(promoted_id)).await;
    let mut promoted = self.load(promoted_id).await?;
    if promoted.status.is_publish_in_progress() {
      return Err(Error::Conflict(format!("{} {promoted_id} is being published", promoted.kind)));
    }

    promoted.name = staged.name.clone();
    promoted.platform = staged.platform.clone();
    promoted.attributes = staged.attributes.clone();
    promoted.references = references;

    let keep: BTreeSet<&ValueKey> = staged_values.iter().map(|v| &v.key).collect();
    for stale in self.values(promoted_id).await? {
      if !keep.contains(&stale.key) {
        self.repo.delete_value(stale.id).await.map_err(Error::store)?;
      }
    }
    self.copy_values(promoted_id, &staged_values).await?;

    promoted.has_changes = false;
    promoted.promoted_at = Some(Utc::now());
    self.refresh_status(&mut promoted).await?;
    self.save(&mut promoted).await?;
    info!(module_id = %promoted_id, %staged_id, "promoted changes pulled");
    Ok(promoted)
  }

  async fn create_counterpart(
    &self,
    staged: &Module,
    references: References,
    staged_values: &[ModuleValue],
  ) -> Result<PromoteOutcome> {
    let mut input = NewModule::new(staged.kind, &staged.store_id, &staged.product_id, &staged.name);
    input.platform = staged.platform.clone();
    input.references = references;
    input.attributes = staged.attributes.clone();

    let mut promoted = self.repo.create_module(input).await.map_err(Error::store)?;
    self.copy_values(promoted.id, staged_values).await?;

    let now = Utc::now();
    promoted.staged_id = Some(staged.id);
    promoted.promoted_at = Some(now);
    self.refresh_status(&mut promoted).await?;
    self.save(&mut promoted).await?;

    self.mark_promoted(staged.id, Some((promoted.id, now))).await?;
    info!(module_id = %staged.id, promoted_id = %promoted.id, kind = %staged.kind, "module promoted");
    Ok(PromoteOutcome::Created(promoted))
  }

  /// Clear `need_to_promote` on the staged side, linking it if this is the
  /// first promotion.
  async fn mark_promoted(
    &self,
    staged_id: Uuid,
    link: Option<(Uuid, chrono::DateTime<Utc>)>,
  ) -> Result<()> {
    let _guard = self.locks.lock(LockKey::Module(staged_id)).await;
    let mut staged = self.load(staged_id).await?;
    staged.need_to_promote = false;
    if let Some((promoted_id, at)) = link {
      staged.promotion_id = Some(promoted_id);
      staged.promoted_at = Some(at);
    }
    self.save(&mut staged).await
  }

  async fn copy_values(&self, target: Uuid, values: &[ModuleValue]) -> Result<()> {
    for v in values {
      let copy = ModuleValue::new(target, v.key.clone(), v.value.clone(), v.status.promoted());
      self.save_value(&copy).await?;
    }
    Ok(())
  }

  /// The staged module's references rewritten to their promoted
  /// counterparts. Every referenced module must already be promoted.
  async fn promoted_references(&self, staged: &Module) -> Result<References> {
    let mut counterparts = HashMap::new();
    for (kind, id) in staged.references.entries() {
      let promotion_id = self.find(id).await?.and_then(|m| m.promotion_id);
      counterparts.insert(id, (kind, promotion_id));
    }
    staged.references.try_map(|id| match counterparts.get(&id) {
      Some((_, Some(promoted))) => Ok(*promoted),
      Some((kind, None)) => Err(Error::Conflict(format!(
        "{kind} {id} must be promoted before campaign {}",
        staged.id
      ))),
      None => Err(Error::NotFound(format!("module {id}"))),
    })
  }
}

// ─── Comparison ──────────────────────────────────────────────────────────────

/// The parts of a module a promotion carries across, in comparable form.
#[derive(Debug, PartialEq)]
struct Content<'a> {
  name:       &'a str,
  platform:   Option<&'a str>,
  attributes: &'a serde_json::Map<String, serde_json::Value>,
  references: &'a References,
  /// Per key: the value and whether it would be settled on the promoted side.
  values:     BTreeMap<&'a ValueKey, (&'a serde_json::Value, bool)>,
}

impl<'a> Content<'a> {
  fn staged(module: &'a Module, references: &'a References, values: &'a [ModuleValue]) -> Self {
    Self {
      name: &module.name,
      platform: module.platform.as_deref(),
      attributes: &module.attributes,
      references,
      values: values
        .iter()
        .map(|v| (&v.key, (&v.value, v.status.promoted().is_settled())))
        .collect(),
    }
  }

  fn promoted(module: &'a Module, values: &'a [ModuleValue]) -> Self {
    Self {
      name: &module.name,
      platform: module.platform.as_deref(),
      attributes: &module.attributes,
      references: &module.references,
      values: values.iter().map(|v| (&v.key, (&v.value, v.status.is_settled()))).collect(),
    }
  }
}
