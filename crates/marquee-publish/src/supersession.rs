//! Making a module the only live one of its scope in an environment.
//!
//! Runs inside a finalize step while the scope lock is held.

use chrono::Utc;
use marquee_core::{
  environment::Environment,
  module::{Module, ModuleKind},
  services::Integrations,
  status::ValueStatus,
  store::{ModuleQuery, ModuleRepository},
};
use tracing::info;
use uuid::Uuid;

use crate::{Engine, Result, locks::LockKey};

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  /// Retire `env` from every other module of `module`'s scope that is live
  /// there. Returns the ids of the modules that were retired.
  pub(crate) async fn supersede(&self, module: &Module, env: &Environment) -> Result<Vec<Uuid>> {
    let mut query = ModuleQuery::scope(module.kind, &module.store_id, &module.product_id);
    query.deployed_to = Some(env.clone());
    let siblings = self.list_modules(&query).await?;

    let mut retired = vec![];
    for sibling in siblings.into_iter().filter(|s| s.id != module.id) {
      let _guard = self.locks.lock(LockKey::Module(sibling.id)).await;
      let Some(mut sibling) = self.find(sibling.id).await? else { continue };
      if !sibling.deployment.retire(env) {
        continue;
      }
      if sibling.deployment.deployed_to.is_empty() && sibling.kind.tracks_value_retirement() {
        self.end_published_values(sibling.id).await?;
      }
      self.refresh_status(&mut sibling).await?;
      self.save(&mut sibling).await?;

      info!(
        module_id = %sibling.id,
        superseded_by = %module.id,
        environment = %env,
        still_live_in = sibling.deployment.deployed_to.len(),
        "module superseded"
      );
      retired.push(sibling.id);
    }
    Ok(retired)
  }

  /// Point campaigns live in `env` at `module` wherever they referenced one
  /// of the `retired` modules.
  pub(crate) async fn repoint_campaigns(
    &self,
    module: &Module,
    env: &Environment,
    retired: &[Uuid],
  ) -> Result<()> {
    for old in retired {
      let mut query = ModuleQuery::scope(ModuleKind::Campaign, &module.store_id, &module.product_id)
        .referencing(*old);
      query.deployed_to = Some(env.clone());

      for campaign in self.list_modules(&query).await? {
        let _guard = self.locks.lock(LockKey::Module(campaign.id)).await;
        let Some(mut campaign) = self.find(campaign.id).await? else { continue };
        if campaign.references.repoint(module.kind, *old, module.id) {
          self.save(&mut campaign).await?;
          info!(
            campaign_id = %campaign.id,
            from = %old,
            to = %module.id,
            kind = %module.kind,
            "campaign reference repointed"
          );
        }
      }
    }
    Ok(())
  }

  async fn end_published_values(&self, module_id: Uuid) -> Result<()> {
    for mut value in self.values(module_id).await? {
      if value.status == ValueStatus::Published {
        value.status = ValueStatus::Ended;
        value.updated_at = Utc::now();
        self.save_value(&value).await?;
      }
    }
    Ok(())
  }
}
