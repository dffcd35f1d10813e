//! Publishing a module (and, for a campaign, its sub-resources) to an
//! environment.
//!
//! A publish is planned as an ordered list of [`PublishStep`]s, executed by
//! the checkpointed pipeline, and tracked by a persisted [`PublishJob`].
//! Every module involved is held in `publish_progress-<env>` for the
//! duration; if the run fails or is cancelled, those still in progress are
//! restored to the status they had before.

use chrono::Utc;
use futures::future::try_join_all;
use marquee_core::{
  environment::Environment,
  journal::{JobState, PriorStatus, PublishJob, PublishSnapshot},
  module::{Module, ModuleKind, Role},
  services::{AssetStore, ConfigDelivery, DeployRequest, EdgeCache, Integrations},
  status::{ModuleStatus, ValueStatus},
  store::ModuleRepository,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Engine, Error, Result,
  locks::LockKey,
  payload::{content_hash, module_payload},
  pipeline::{PipelineStep, StepLedger, StepRunner, run_pipeline},
};

// ─── Steps ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
  /// Copy binary assets into the environment's area and purge the cache.
  CopyAssets,
  /// Push the module's configuration to config delivery.
  Deliver,
  /// Supersede siblings, mark the module live and snapshot it.
  Finalize,
}

impl PublishAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::CopyAssets => "copy-assets",
      Self::Deliver => "deliver",
      Self::Finalize => "finalize",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishStep {
  name:          String,
  pub action:    PublishAction,
  pub kind:      ModuleKind,
  pub module_id: Uuid,
}

impl PublishStep {
  pub fn new(action: PublishAction, kind: ModuleKind, module_id: Uuid) -> Self {
    Self {
      name: format!("{}:{}:{}", action.as_str(), kind, module_id),
      action,
      kind,
      module_id,
    }
  }
}

impl PipelineStep for PublishStep {
  fn name(&self) -> &str { &self.name }
}

/// The ordered steps that publish `module`.
///
/// A campaign publishes its app copy, sku, selector config, image
/// collections and store copy (whichever are set) before delivering and
/// finalizing itself.
pub fn plan(module: &Module) -> Vec<PublishStep> {
  let mut steps = vec![];
  if module.kind.is_composite() {
    for (kind, id) in module.references.entries() {
      leaf_steps(&mut steps, kind, id);
    }
    steps.push(PublishStep::new(PublishAction::Deliver, module.kind, module.id));
    steps.push(PublishStep::new(PublishAction::Finalize, module.kind, module.id));
  } else {
    leaf_steps(&mut steps, module.kind, module.id);
  }
  steps
}

fn leaf_steps(steps: &mut Vec<PublishStep>, kind: ModuleKind, id: Uuid) {
  if kind.has_assets() {
    steps.push(PublishStep::new(PublishAction::CopyAssets, kind, id));
  }
  steps.push(PublishStep::new(PublishAction::Deliver, kind, id));
  steps.push(PublishStep::new(PublishAction::Finalize, kind, id));
}

/// Staged modules publish only to dev; promoted ones never do.
fn check_stage(module: &Module, env: &Environment) -> Result<()> {
  match module.role() {
    Role::Staged if *env != Environment::DEV => Err(Error::Conflict(format!(
      "{} {} is staged and may only be published to {}",
      module.kind,
      module.id,
      Environment::DEV
    ))),
    Role::Promoted if *env == Environment::DEV => Err(Error::Conflict(format!(
      "{} {} is promoted and may not be published to {}",
      module.kind,
      module.id,
      Environment::DEV
    ))),
    _ => Ok(()),
  }
}

// ─── Runner ──────────────────────────────────────────────────────────────────

struct PublishRun<'e, R, I> {
  engine:      &'e Engine<R, I>,
  environment: Environment,
  job:         Mutex<PublishJob>,
}

impl<R: ModuleRepository, I: Integrations> StepRunner for PublishRun<'_, R, I> {
  type Step = PublishStep;

  async fn run<'a>(&'a self, step: &'a PublishStep) -> Result<()> {
    match step.action {
      PublishAction::CopyAssets => self.engine.copy_assets(step.module_id, &self.environment).await,
      PublishAction::Deliver => self.engine.deliver(step.module_id, &self.environment).await,
      PublishAction::Finalize => self.engine.finalize(step.module_id, &self.environment).await,
    }
  }

  async fn checkpoint<'a>(&'a self, ledger: &'a StepLedger) -> Result<()> {
    let mut job = self.job.lock().await;
    job.completed_steps = ledger.completed().to_vec();
    job.updated_at = Utc::now();
    self.engine.repo.save_job(&job).await.map_err(Error::store)
  }
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl<R: ModuleRepository, I: Integrations> Engine<R, I> {
  /// Publish a module to `environment`, returning it once live.
  ///
  /// Fails with `Validation` before anything is touched if the module or a
  /// campaign sub-resource is incomplete, and with `Conflict` if any of them
  /// is already being published.
  pub async fn publish(
    &self,
    id: Uuid,
    environment: Environment,
    cancel: CancellationToken,
  ) -> Result<Module> {
    let _publishing = self
      .locks
      .try_lock(LockKey::Publish(id))
      .ok_or_else(|| Error::Conflict(format!("module {id} is already being published")))?;

    let module = self.load(id).await?;
    check_stage(&module, &environment)?;

    let mut members = vec![];
    if module.kind.is_composite() {
      for (kind, sub_id) in module.references.entries() {
        let sub = self.find(sub_id).await?.ok_or_else(|| {
          Error::NotFound(format!("{kind} {sub_id} referenced by campaign {id}"))
        })?;
        if sub.kind != kind || sub.store_id != module.store_id || sub.product_id != module.product_id {
          return Err(Error::Validation(format!(
            "campaign {id} references {sub_id} outside its {kind} scope"
          )));
        }
        check_stage(&sub, &environment)?;
        if !members.contains(&sub_id) {
          members.push(sub_id);
        }
      }
    }
    members.push(id);

    for member in &members {
      self.ensure_publishable(*member).await?;
    }
    let priors = self.claim(&members, &environment).await?;

    let job = PublishJob::start(id, environment.clone(), priors);
    if let Err(e) = self.repo.save_job(&job).await {
      self.restore(&job.prior_statuses, &environment).await;
      return Err(Error::store(e));
    }

    let steps = plan(&module);
    info!(
      module_id = %id,
      kind = %module.kind,
      environment = %environment,
      steps = steps.len(),
      "publish started"
    );
    self.drive(job, steps, cancel).await
  }

  /// Continue the interrupted publish of a module from its last checkpoint.
  pub async fn resume(&self, id: Uuid, cancel: CancellationToken) -> Result<Module> {
    let _publishing = self
      .locks
      .try_lock(LockKey::Publish(id))
      .ok_or_else(|| Error::Conflict(format!("module {id} is already being published")))?;

    let module = self.load(id).await?;
    let job = self
      .repo
      .open_job(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::Conflict(format!("module {id} has no interrupted publish")))?;
    if module.status != ModuleStatus::PublishInProgress(job.environment.clone()) {
      self.close_stale(job).await;
      return Err(Error::Conflict(format!(
        "module {id} is {} and no longer being published",
        module.status
      )));
    }

    let steps = plan(&module);
    info!(
      module_id = %id,
      environment = %job.environment,
      completed = job.completed_steps.len(),
      steps = steps.len(),
      "publish resumed"
    );
    self.drive(job, steps, cancel).await
  }

  async fn drive(
    &self,
    job: PublishJob,
    steps: Vec<PublishStep>,
    cancel: CancellationToken,
  ) -> Result<Module> {
    let module_id = job.module_id;
    let environment = job.environment.clone();
    let mut ledger = StepLedger::from_completed(job.completed_steps.clone());

    let run = PublishRun { engine: self, environment: environment.clone(), job: Mutex::new(job) };
    let outcome = run_pipeline(&run, &steps, &mut ledger, &self.retry, &cancel).await;

    let mut job = run.job.into_inner();
    job.completed_steps = ledger.completed().to_vec();
    job.updated_at = Utc::now();

    match outcome {
      Ok(()) => {
        job.state = JobState::Succeeded;
        self.repo.save_job(&job).await.map_err(Error::store)?;
        info!(module_id = %module_id, environment = %environment, "publish finished");
        self.load(module_id).await
      }
      Err(err) => {
        warn!(
          module_id = %module_id,
          environment = %environment,
          error = %err,
          "publish failed, rolling back"
        );
        self.restore(&job.prior_statuses, &environment).await;
        job.state = JobState::Failed;
        job.error = Some(err.to_string());
        if let Err(e) = self.repo.save_job(&job).await {
          warn!(module_id = %module_id, error = %e, "could not close failed publish job");
        }
        Err(err)
      }
    }
  }

  /// Close a running job whose module has already left
  /// `publish_progress-<env>`.
  async fn close_stale(&self, mut job: PublishJob) {
    job.state = JobState::Failed;
    job.error = Some("module no longer in progress".to_owned());
    job.updated_at = Utc::now();
    if let Err(e) = self.repo.save_job(&job).await {
      warn!(module_id = %job.module_id, error = %e, "could not close stale publish job");
    }
  }

  /// Put every member into `publish_progress-<env>`, recording what each was
  /// before. All-or-nothing: a conflict part way restores those claimed.
  async fn claim(&self, members: &[Uuid], env: &Environment) -> Result<Vec<PriorStatus>> {
    let mut priors = vec![];
    for id in members {
      match self.claim_one(*id, env).await {
        Ok(prior) => priors.push(prior),
        Err(e) => {
          self.restore(&priors, env).await;
          return Err(e);
        }
      }
    }
    Ok(priors)
  }

  async fn claim_one(&self, id: Uuid, env: &Environment) -> Result<PriorStatus> {
    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    if module.status.is_publish_in_progress() {
      return Err(Error::Conflict(format!(
        "{} {} is already being published ({})",
        module.kind, id, module.status
      )));
    }
    let prior = PriorStatus { module_id: id, status: module.status.clone() };
    module.status = ModuleStatus::PublishInProgress(env.clone());
    self.save(&mut module).await?;
    Ok(prior)
  }

  /// Roll modules still in progress for `env` back to their prior status.
  /// Modules that already finalized keep their new status.
  pub(crate) async fn restore(&self, priors: &[PriorStatus], env: &Environment) {
    for prior in priors {
      if let Err(e) = self.restore_one(prior, env).await {
        warn!(module_id = %prior.module_id, error = %e, "could not restore module status");
      }
    }
  }

  async fn restore_one(&self, prior: &PriorStatus, env: &Environment) -> Result<()> {
    let _guard = self.locks.lock(LockKey::Module(prior.module_id)).await;
    let Some(mut module) = self.find(prior.module_id).await? else { return Ok(()) };
    if module.status != ModuleStatus::PublishInProgress(env.clone()) {
      return Ok(());
    }
    // Supersession may have retired it since the claim.
    module.status = prior.status.clone();
    self.refresh_status(&mut module).await?;
    self.save(&mut module).await?;
    debug!(module_id = %module.id, status = %module.status, "status restored");
    Ok(())
  }

  // ─── Step bodies ────────────────────────────────────────────────────────

  async fn copy_assets(&self, id: Uuid, env: &Environment) -> Result<()> {
    let module = self.load(id).await?;
    let values = self.values(id).await?;
    let prefix = format!("{env}/{}/{}/{}", module.store_id, module.product_id, module.id);
    let base_url = self.config.asset_base_url.trim_end_matches('/');

    let copies = values.iter().filter(|v| v.status.is_settled()).map(|value| {
      let permits = self.asset_permits.clone();
      let prefix = &prefix;
      async move {
        let source = value.value.as_str().ok_or_else(|| {
          Error::Validation(format!("asset value {} is not a storage key", value.id))
        })?;
        let dest = format!("{prefix}/{}", source.trim_start_matches('/'));

        let _permit = permits.acquire_owned().await.map_err(|_| Error::Cancelled)?;
        self.services.assets().copy(source, &dest).await?;
        self.services.cache().purge(&format!("{base_url}/{dest}")).await?;
        Ok::<_, Error>(())
      }
    });
    let copied = try_join_all(copies).await?.len();

    self.services.cache().invalidate(&format!("/{prefix}/")).await?;
    debug!(module_id = %id, environment = %env, copied, "assets copied");
    Ok(())
  }

  async fn deliver(&self, id: Uuid, env: &Environment) -> Result<()> {
    let module = self.load(id).await?;
    let values = self.values(id).await?;
    let request = DeployRequest {
      environment: env.clone(),
      store_id:    module.store_id.clone(),
      product_id:  module.product_id.clone(),
      kind:        module.kind,
      payload:     module_payload(&module, &values),
    };

    let token = self.tokens.token(self.services.delivery()).await?;
    self.services.delivery().deploy(&request, &token).await?;
    debug!(module_id = %id, kind = %module.kind, environment = %env, "configuration delivered");
    Ok(())
  }

  async fn finalize(&self, id: Uuid, env: &Environment) -> Result<()> {
    let module = self.load(id).await?;
    let _scope = self.locks.lock(LockKey::scope_of(&module)).await;

    let retired = self.supersede(&module, env).await?;
    if !module.kind.is_composite() && !retired.is_empty() {
      self.repoint_campaigns(&module, env, &retired).await?;
    }

    let _guard = self.locks.lock(LockKey::Module(id)).await;
    let mut module = self.load(id).await?;
    let mut values = self.values(id).await?;
    for value in values.iter_mut().filter(|v| v.status == ValueStatus::Saved) {
      value.status = ValueStatus::Published;
      value.updated_at = Utc::now();
      self.save_value(value).await?;
    }
    module.deployment.deploy(env.clone());
    module.status = ModuleStatus::Live;
    self.save(&mut module).await?;

    let content = module_payload(&module, &values);
    let snapshot = PublishSnapshot {
      id: Uuid::new_v4(),
      module_id: id,
      kind: module.kind,
      environment: env.clone(),
      content_hash: content_hash(&content),
      content,
      published_at: Utc::now(),
    };
    self.repo.append_snapshot(&snapshot).await.map_err(Error::store)?;

    info!(
      module_id = %id,
      kind = %module.kind,
      environment = %env,
      superseded = retired.len(),
      "module live"
    );
    Ok(())
  }
}
