//! Engine behaviour end to end, against an in-memory store and counting
//! mocks.

use std::{sync::atomic::Ordering, time::Duration};

use marquee_core::{
  environment::Environment,
  journal::{PriorStatus, PublishJob},
  module::{Axis, DimensionKey, FieldSpec, Module, ModuleKind, NewModule, References, ScopeSchema, ValueKey},
  status::{ModuleStatus, ValueStatus},
  store::{ModuleQuery, ModuleRepository},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  Error, PromoteOutcome, StatusOverride,
  pipeline::PipelineStep,
  publish::{PublishAction, PublishStep},
  testing::{MockDelivery, TestEngine, test_engine, test_engine_with},
};

fn title() -> ValueKey { ValueKey::new("title", DimensionKey::Global) }

async fn ready(e: &TestEngine, kind: ModuleKind, name: &str) -> Module {
  let m = e.create_module(NewModule::new(kind, "s1", "p1", name)).await.unwrap();
  let m = e.set_value(m.id, title(), json!(format!("{name} content"))).await.unwrap();
  assert_eq!(m.status, kind.settled_status(), "{name} should be publishable");
  m
}

async fn publish(e: &TestEngine, id: Uuid, env: Environment) -> Result<Module, Error> {
  e.publish(id, env, CancellationToken::new()).await
}

async fn value_statuses(e: &TestEngine, id: Uuid) -> Vec<ValueStatus> {
  e.module_values(id).await.unwrap().into_iter().map(|v| v.status).collect()
}

// ─── Publish ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_makes_module_live_and_snapshots_it() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;

  let live = publish(&e, a.id, Environment::PROD).await.unwrap();
  assert_eq!(live.status, ModuleStatus::Live);
  assert!(live.deployment.is_live_in(&Environment::PROD));
  assert_eq!(value_statuses(&e, a.id).await, [ValueStatus::Published]);
  assert_eq!(e.services().delivery.deploy_count(), 1);

  let history = e.history(a.id).await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].environment, Environment::PROD);
  assert_eq!(history[0].content_hash.len(), 64);
  assert!(e.repository().open_job(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn draft_module_fails_validation_without_side_effects() {
  let e = test_engine().await;
  let m = e.create_module(NewModule::new(ModuleKind::AppCopy, "s1", "p1", "a")).await.unwrap();
  e.set_value(m.id, title(), Value::Null).await.unwrap();

  let err = publish(&e, m.id, Environment::STG).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)), "{err}");
  assert_eq!(e.get_module(m.id).await.unwrap().status, ModuleStatus::Draft);
  assert_eq!(e.services().delivery.deploy_count(), 0);
  assert_eq!(e.services().delivery.authentications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn publish_missing_module_is_not_found() {
  let e = test_engine().await;
  let err = publish(&e, Uuid::new_v4(), Environment::STG).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn module_already_in_progress_conflicts() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  let mut m = e.get_module(a.id).await.unwrap();
  m.status = ModuleStatus::PublishInProgress(Environment::STG);
  e.repository().update_module(&m).await.unwrap();

  let err = publish(&e, a.id, Environment::PROD).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)), "{err}");
  assert_eq!(
    e.get_module(a.id).await.unwrap().status,
    ModuleStatus::PublishInProgress(Environment::STG)
  );
}

// ─── Supersession ────────────────────────────────────────────────────────────

#[tokio::test]
async fn superseding_in_one_environment_keeps_the_other() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  let b = ready(&e, ModuleKind::AppCopy, "b").await;
  publish(&e, a.id, Environment::STG).await.unwrap();
  publish(&e, a.id, Environment::PROD).await.unwrap();

  let b = publish(&e, b.id, Environment::STG).await.unwrap();
  assert!(b.deployment.deployed_to.is_exactly(&Environment::STG));
  assert_eq!(b.status, ModuleStatus::Live);

  let a = e.get_module(a.id).await.unwrap();
  assert!(a.deployment.deployed_to.is_exactly(&Environment::PROD));
  assert_eq!(a.deployment.ended_on, Some(Environment::STG));
  assert_eq!(a.status, ModuleStatus::Live);
  assert_eq!(value_statuses(&e, a.id).await, [ValueStatus::Published]);
}

#[tokio::test]
async fn fully_superseded_module_ends_with_its_values() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  let b = ready(&e, ModuleKind::AppCopy, "b").await;
  publish(&e, a.id, Environment::STG).await.unwrap();
  publish(&e, b.id, Environment::STG).await.unwrap();

  let a = e.get_module(a.id).await.unwrap();
  assert!(a.deployment.deployed_to.is_empty());
  assert_eq!(a.deployment.ended_on, Some(Environment::STG));
  assert_eq!(a.status, ModuleStatus::Ended);
  assert_eq!(value_statuses(&e, a.id).await, [ValueStatus::Ended]);
}

#[tokio::test]
async fn one_live_module_per_scope_and_environment() {
  let e = test_engine().await;
  let other = e.create_module(NewModule::new(ModuleKind::AppCopy, "s2", "p1", "other")).await.unwrap();
  e.set_value(other.id, title(), json!("other")).await.unwrap();
  publish(&e, other.id, Environment::PROD).await.unwrap();

  let mut last = None;
  for name in ["a", "b", "c"] {
    let m = ready(&e, ModuleKind::AppCopy, name).await;
    publish(&e, m.id, Environment::PROD).await.unwrap();
    last = Some(m.id);
  }

  let query = ModuleQuery::scope(ModuleKind::AppCopy, "s1", "p1").live_in(Environment::PROD);
  let live = e.list_modules(&query).await.unwrap();
  assert_eq!(live.len(), 1);
  assert_eq!(Some(live[0].id), last);

  // A different store is a different scope.
  assert!(e.get_module(other.id).await.unwrap().deployment.is_live_in(&Environment::PROD));
}

// ─── Retry, rollback, cancellation, resume ───────────────────────────────────

#[tokio::test]
async fn transient_failures_retry_without_repeating_earlier_steps() {
  let e = test_engine().await;
  let images = e.create_module(NewModule::new(ModuleKind::ImageCollection, "s1", "p1", "hero")).await.unwrap();
  let slot = |n: &str| ValueKey::new("image", DimensionKey::Slot { name: n.into() });
  e.set_value(images.id, slot("a"), json!("uploads/a.png")).await.unwrap();
  e.set_value(images.id, slot("b"), json!("uploads/b.png")).await.unwrap();

  // Delivery (step two) fails on attempts one and two.
  e.services().delivery.fail_next.store(2, Ordering::SeqCst);
  let live = publish(&e, images.id, Environment::STG).await.unwrap();

  assert_eq!(live.status, ModuleStatus::Live);
  assert_eq!(e.services().assets.copy_count(), 2);
  assert_eq!(e.services().delivery.deploy_count(), 1);
  assert_eq!(e.services().cache.purged.lock().unwrap().len(), 2);

  let copies = e.services().assets.copies.lock().unwrap().clone();
  let prefix = format!("stg/s1/p1/{}/", images.id);
  assert!(copies.iter().all(|(_, dest)| dest.starts_with(&prefix)));
  assert_eq!(*e.services().cache.invalidated.lock().unwrap(), [format!("/{prefix}")]);
}

#[tokio::test]
async fn image_slots_with_the_same_file_name_land_apart() {
  let e = test_engine().await;
  let images = e.create_module(NewModule::new(ModuleKind::ImageCollection, "s1", "p1", "hero")).await.unwrap();
  let slot = |n: &str| ValueKey::new("image", DimensionKey::Slot { name: n.into() });
  e.set_value(images.id, slot("a"), json!("a/hero.png")).await.unwrap();
  e.set_value(images.id, slot("b"), json!("b/hero.png")).await.unwrap();

  publish(&e, images.id, Environment::STG).await.unwrap();

  let mut dests: Vec<_> =
    e.services().assets.copies.lock().unwrap().iter().map(|(_, d)| d.clone()).collect();
  dests.sort();
  dests.dedup();
  assert_eq!(dests, [
    format!("stg/s1/p1/{}/a/hero.png", images.id),
    format!("stg/s1/p1/{}/b/hero.png", images.id),
  ]);
}

#[tokio::test]
async fn exhausted_retries_roll_back() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  e.services().delivery.fail_next.store(10, Ordering::SeqCst);

  let err = publish(&e, a.id, Environment::PROD).await.unwrap_err();
  assert!(matches!(err, Error::ExternalService(_)), "{err}");

  let a = e.get_module(a.id).await.unwrap();
  assert_eq!(a.status, ModuleStatus::Ready);
  assert!(a.deployment.deployed_to.is_empty());
  assert!(e.history(a.id).await.unwrap().is_empty());
  assert!(e.repository().open_job(a.id).await.unwrap().is_none());
  // Three attempts, all failing.
  assert_eq!(e.services().delivery.fail_next.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn cancellation_rolls_back() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  e.services().delivery.hang.store(true, Ordering::SeqCst);

  let cancel = CancellationToken::new();
  let (result, ()) = tokio::join!(e.publish(a.id, Environment::PROD, cancel.clone()), async {
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
  });

  assert!(matches!(result, Err(Error::Cancelled)));
  assert_eq!(e.get_module(a.id).await.unwrap().status, ModuleStatus::Ready);
}

#[tokio::test]
async fn resume_continues_from_checkpoint() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;

  // Simulate a process that died after delivering.
  let mut m = e.get_module(a.id).await.unwrap();
  m.status = ModuleStatus::PublishInProgress(Environment::PROD);
  e.repository().update_module(&m).await.unwrap();
  let mut job = PublishJob::start(a.id, Environment::PROD, vec![PriorStatus {
    module_id: a.id,
    status:    ModuleStatus::Ready,
  }]);
  let delivered = PublishStep::new(PublishAction::Deliver, ModuleKind::AppCopy, a.id);
  job.completed_steps.push(delivered.name().to_owned());
  e.repository().save_job(&job).await.unwrap();

  let live = e.resume(a.id, CancellationToken::new()).await.unwrap();
  assert_eq!(live.status, ModuleStatus::Live);
  assert!(live.deployment.is_live_in(&Environment::PROD));
  assert_eq!(e.services().delivery.deploy_count(), 0);
  assert!(e.repository().open_job(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn rollback_rederives_status_of_a_module_retired_meanwhile() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  publish(&e, a.id, Environment::STG).await.unwrap();
  let b = ready(&e, ModuleKind::AppCopy, "b").await;

  // `a` was part way into prod when the process died.
  let mut m = e.get_module(a.id).await.unwrap();
  m.status = ModuleStatus::PublishInProgress(Environment::PROD);
  e.repository().update_module(&m).await.unwrap();
  let job = PublishJob::start(a.id, Environment::PROD, vec![PriorStatus {
    module_id: a.id,
    status:    ModuleStatus::Live,
  }]);
  e.repository().save_job(&job).await.unwrap();

  // `b` takes over stg, leaving `a` live nowhere.
  publish(&e, b.id, Environment::STG).await.unwrap();
  let m = e.get_module(a.id).await.unwrap();
  assert_eq!(m.status, ModuleStatus::PublishInProgress(Environment::PROD));
  assert!(m.deployment.deployed_to.is_empty());

  e.services().delivery.fail_next.store(10, Ordering::SeqCst);
  let err = e.resume(a.id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, Error::ExternalService(_)), "{err}");

  let a = e.get_module(a.id).await.unwrap();
  assert_eq!(a.status, ModuleStatus::Ended);
  assert_eq!(a.deployment.ended_on, Some(Environment::STG));
  assert_eq!(e.recompute(a.id).await.unwrap().status, ModuleStatus::Ended);
}

#[tokio::test]
async fn resume_rejects_module_no_longer_in_progress() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  // A job left running although the module was already restored.
  let job = PublishJob::start(a.id, Environment::PROD, vec![PriorStatus {
    module_id: a.id,
    status:    ModuleStatus::Ready,
  }]);
  e.repository().save_job(&job).await.unwrap();
  e.set_value(a.id, title(), Value::Null).await.unwrap();

  let err = e.resume(a.id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)), "{err}");
  assert_eq!(e.services().delivery.deploy_count(), 0);
  assert_eq!(e.get_module(a.id).await.unwrap().status, ModuleStatus::Draft);
  assert!(e.repository().open_job(a.id).await.unwrap().is_none());

  // In progress, but for another environment than the job's.
  let b = ready(&e, ModuleKind::AppCopy, "b").await;
  let mut m = e.get_module(b.id).await.unwrap();
  m.status = ModuleStatus::PublishInProgress(Environment::STG);
  e.repository().update_module(&m).await.unwrap();
  let job = PublishJob::start(b.id, Environment::PROD, vec![]);
  e.repository().save_job(&job).await.unwrap();
  let err = e.resume(b.id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)), "{err}");
  assert_eq!(e.services().delivery.deploy_count(), 0);
}

#[tokio::test]
async fn resume_without_open_job_conflicts() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  let err = e.resume(a.id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn token_is_reused_until_near_expiry() {
  let e = test_engine().await;
  for name in ["a", "b"] {
    let m = ready(&e, ModuleKind::StoreCopy, name).await;
    publish(&e, m.id, Environment::STG).await.unwrap();
  }
  assert_eq!(e.services().delivery.authentications.load(Ordering::SeqCst), 1);

  let short_lived = MockDelivery { token_ttl: chrono::Duration::minutes(2), ..Default::default() };
  let e = test_engine_with(short_lived).await;
  for name in ["a", "b"] {
    let m = ready(&e, ModuleKind::StoreCopy, name).await;
    publish(&e, m.id, Environment::STG).await.unwrap();
  }
  assert_eq!(e.services().delivery.authentications.load(Ordering::SeqCst), 2);
}

// ─── Campaigns ───────────────────────────────────────────────────────────────

async fn campaign(e: &TestEngine, refs: References) -> Module {
  let mut input = NewModule::new(ModuleKind::Campaign, "s1", "p1", "launch");
  input.references = refs;
  e.create_module(input).await.unwrap()
}

#[tokio::test]
async fn campaign_without_selector_config_publishes_in_order() {
  let e = test_engine().await;
  let copy = ready(&e, ModuleKind::AppCopy, "copy").await;
  let sku = ready(&e, ModuleKind::Sku, "sku").await;
  let images = e.create_module(NewModule::new(ModuleKind::ImageCollection, "s1", "p1", "hero")).await.unwrap();
  e.set_value(images.id, title(), json!("uploads/hero.png")).await.unwrap();

  let c = campaign(&e, References {
    app_copy: Some(copy.id),
    sku: Some(sku.id),
    image_collections: vec![images.id],
    ..Default::default()
  })
  .await;
  assert_eq!(c.status, ModuleStatus::Complete);

  let c = publish(&e, c.id, Environment::STG).await.unwrap();
  assert_eq!(c.status, ModuleStatus::Live);
  assert_eq!(e.services().delivery.deployed_kinds(), [
    ModuleKind::AppCopy,
    ModuleKind::Sku,
    ModuleKind::ImageCollection,
    ModuleKind::Campaign,
  ]);
  for id in [copy.id, sku.id, images.id] {
    assert!(e.get_module(id).await.unwrap().deployment.is_live_in(&Environment::STG));
  }
}

#[tokio::test]
async fn campaign_missing_required_reference_is_draft() {
  let e = test_engine().await;
  let copy = ready(&e, ModuleKind::AppCopy, "copy").await;
  let c = campaign(&e, References { app_copy: Some(copy.id), ..Default::default() }).await;
  assert_eq!(c.status, ModuleStatus::Draft);

  let err = publish(&e, c.id, Environment::STG).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn campaign_with_draft_sub_resource_fails_validation() {
  let e = test_engine().await;
  let copy = ready(&e, ModuleKind::AppCopy, "copy").await;
  let sku = e.create_module(NewModule::new(ModuleKind::Sku, "s1", "p1", "sku")).await.unwrap();
  let c = campaign(&e, References { app_copy: Some(copy.id), sku: Some(sku.id), ..Default::default() }).await;
  assert_eq!(c.status, ModuleStatus::Draft);

  let err = publish(&e, c.id, Environment::STG).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  assert_eq!(e.get_module(copy.id).await.unwrap().status, ModuleStatus::Ready);
  assert_eq!(e.services().delivery.deploy_count(), 0);
}

#[tokio::test]
async fn campaign_reference_must_match_kind() {
  let e = test_engine().await;
  let sku = ready(&e, ModuleKind::Sku, "sku").await;
  let mut input = NewModule::new(ModuleKind::Campaign, "s1", "p1", "launch");
  input.references.app_copy = Some(sku.id);
  let err = e.create_module(input).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn live_campaigns_follow_superseded_references() {
  let e = test_engine().await;
  let old_copy = ready(&e, ModuleKind::AppCopy, "old").await;
  let sku = ready(&e, ModuleKind::Sku, "sku").await;
  let c = campaign(&e, References { app_copy: Some(old_copy.id), sku: Some(sku.id), ..Default::default() }).await;
  publish(&e, c.id, Environment::STG).await.unwrap();

  let new_copy = ready(&e, ModuleKind::AppCopy, "new").await;
  publish(&e, new_copy.id, Environment::STG).await.unwrap();

  let c = e.get_module(c.id).await.unwrap();
  assert_eq!(c.references.app_copy, Some(new_copy.id));
  assert_eq!(c.references.sku, Some(sku.id));
  assert_eq!(e.get_module(old_copy.id).await.unwrap().status, ModuleStatus::Ended);
}

// ─── Status recomputation ────────────────────────────────────────────────────

#[tokio::test]
async fn sku_needs_every_schema_combination() {
  let e = test_engine().await;
  let schema = ScopeSchema {
    countries: vec!["us".into(), "ca".into()],
    languages: vec!["en".into(), "fr".into(), "es".into()],
    fields:    vec![FieldSpec { kind: ModuleKind::Sku, name: "name".into(), axis: Axis::Locale, platform: None }],
  };
  e.put_schema("s1", "p1", &schema).await.unwrap();

  let sku = e.create_module(NewModule::new(ModuleKind::Sku, "s1", "p1", "sku")).await.unwrap();
  let combos: Vec<_> = ["us", "ca"]
    .into_iter()
    .flat_map(|c| ["en", "fr", "es"].map(move |l| (c, l)))
    .collect();

  let mut status = ModuleStatus::Draft;
  for (i, (country, language)) in combos.iter().enumerate() {
    let key = ValueKey::new("name", DimensionKey::Locale {
      country:  (*country).into(),
      language: (*language).into(),
    });
    status = e.set_value(sku.id, key, json!("Pro plan")).await.unwrap().status;
    if i < combos.len() - 1 {
      assert_eq!(status, ModuleStatus::Draft, "after {} of 6", i + 1);
    }
  }
  assert_eq!(status, ModuleStatus::Ready);
}

#[tokio::test]
async fn selector_config_waits_for_draft_skus() {
  let e = test_engine().await;
  let sku = e.create_module(NewModule::new(ModuleKind::Sku, "s1", "p1", "sku")).await.unwrap();
  let sel = e.create_module(NewModule::new(ModuleKind::SelectorConfig, "s1", "p1", "sel")).await.unwrap();
  let row = ValueKey::new("position", DimensionKey::CountrySku { country: "us".into(), sku_id: sku.id });

  let sel_now = e.set_value(sel.id, row, json!(1)).await.unwrap();
  assert_eq!(sel_now.status, ModuleStatus::Draft);

  e.set_value(sku.id, title(), json!("Pro")).await.unwrap();
  assert_eq!(e.recompute(sel.id).await.unwrap().status, ModuleStatus::Complete);
}

#[tokio::test]
async fn selector_row_for_missing_sku_is_incomplete() {
  let e = test_engine().await;
  let sel = e.create_module(NewModule::new(ModuleKind::SelectorConfig, "s1", "p1", "sel")).await.unwrap();
  let row = ValueKey::new("position", DimensionKey::CountrySku {
    country: "us".into(),
    sku_id:  Uuid::new_v4(),
  });

  let sel = e.set_value(sel.id, row, json!(1)).await.unwrap();
  assert_eq!(sel.status, ModuleStatus::Draft);
  assert_eq!(value_statuses(&e, sel.id).await, [ValueStatus::Incomplete]);
}

// ─── Authoring ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_module_is_default_and_seeds_later_ones() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  assert!(e.get_module(a.id).await.unwrap().is_default);

  let b = e.create_module(NewModule::new(ModuleKind::AppCopy, "s1", "p1", "b")).await.unwrap();
  assert!(!b.is_default);
  assert_eq!(b.status, ModuleStatus::Ready);
  let seeded = e.module_values(b.id).await.unwrap();
  assert_eq!(seeded.len(), 1);
  assert_eq!(seeded[0].value, json!("a content"));
  assert_eq!(seeded[0].status, ValueStatus::Saved);
}

#[tokio::test]
async fn status_overrides() {
  let e = test_engine().await;
  let a = ready(&e, ModuleKind::AppCopy, "a").await;
  let a = e.override_status(a.id, StatusOverride::ForcePublish).await.unwrap();
  assert_eq!(a.status, ModuleStatus::Live);
  let a = e.override_status(a.id, StatusOverride::Archive).await.unwrap();
  assert_eq!(a.status, ModuleStatus::Ended);
}

// ─── Promotion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn promotion_round_trip() {
  let e = test_engine().await;
  let staged = ready(&e, ModuleKind::AppCopy, "copy").await;
  publish(&e, staged.id, Environment::DEV).await.unwrap();

  let PromoteOutcome::Created(promoted) = e.promote(staged.id).await.unwrap() else {
    panic!("first promote creates the counterpart");
  };
  assert_eq!(promoted.staged_id, Some(staged.id));
  assert_eq!(promoted.status, ModuleStatus::Ready);
  assert_eq!(e.get_module(staged.id).await.unwrap().promotion_id, Some(promoted.id));
  assert_eq!(value_statuses(&e, promoted.id).await, [ValueStatus::Saved]);

  assert!(matches!(e.promote(staged.id).await.unwrap(), PromoteOutcome::UpToDate(_)));

  // An edit flags the pair but leaves the promoted content alone.
  let edited = e.set_value(staged.id, title(), json!("revised")).await.unwrap();
  assert!(edited.need_to_promote);
  let outcome = e.promote(staged.id).await.unwrap();
  assert!(matches!(outcome, PromoteOutcome::ChangesPending(_)));
  assert!(outcome.module().has_changes);
  assert!(!e.get_module(staged.id).await.unwrap().need_to_promote);
  assert_eq!(e.module_values(promoted.id).await.unwrap()[0].value, json!("copy content"));

  let declined = e.pull(promoted.id, false).await.unwrap();
  assert!(!declined.has_changes);
  assert_eq!(e.module_values(promoted.id).await.unwrap()[0].value, json!("copy content"));

  e.promote(staged.id).await.unwrap();
  let pulled = e.pull(promoted.id, true).await.unwrap();
  assert!(!pulled.has_changes);
  assert_eq!(e.module_values(promoted.id).await.unwrap()[0].value, json!("revised"));

  assert!(matches!(e.promote(staged.id).await.unwrap(), PromoteOutcome::UpToDate(_)));
}

#[tokio::test]
async fn stage_rules_bind_promotion_pairs() {
  let e = test_engine().await;
  let staged = ready(&e, ModuleKind::AppCopy, "copy").await;
  publish(&e, staged.id, Environment::DEV).await.unwrap();
  let promoted = e.promote(staged.id).await.unwrap().module().clone();

  assert!(matches!(publish(&e, staged.id, Environment::PROD).await, Err(Error::Conflict(_))));
  assert!(matches!(publish(&e, promoted.id, Environment::DEV).await, Err(Error::Conflict(_))));
  publish(&e, promoted.id, Environment::PROD).await.unwrap();

  let err = e.set_value(promoted.id, title(), json!("direct")).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)));
  assert!(matches!(e.promote(promoted.id).await, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn promoted_sku_goes_live_in_prod() {
  let e = test_engine().await;
  let staged = ready(&e, ModuleKind::Sku, "sku").await;
  publish(&e, staged.id, Environment::DEV).await.unwrap();
  assert_eq!(value_statuses(&e, staged.id).await, [ValueStatus::Published]);

  let promoted = e.promote(staged.id).await.unwrap().module().clone();
  assert_eq!(promoted.status, ModuleStatus::Ready);
  assert_eq!(value_statuses(&e, promoted.id).await, [ValueStatus::Saved]);

  let live = publish(&e, promoted.id, Environment::PROD).await.unwrap();
  assert_eq!(live.status, ModuleStatus::Live);
  assert!(live.deployment.is_live_in(&Environment::PROD));
}

#[tokio::test]
async fn campaign_promotion_requires_promoted_references() {
  let e = test_engine().await;
  let copy = ready(&e, ModuleKind::AppCopy, "copy").await;
  let sku = ready(&e, ModuleKind::Sku, "sku").await;
  let c = campaign(&e, References { app_copy: Some(copy.id), sku: Some(sku.id), ..Default::default() }).await;

  assert!(matches!(e.promote(c.id).await, Err(Error::Conflict(_))));

  publish(&e, copy.id, Environment::DEV).await.unwrap();
  publish(&e, sku.id, Environment::DEV).await.unwrap();
  let copy_p = e.promote(copy.id).await.unwrap().module().id;
  let sku_p = e.promote(sku.id).await.unwrap().module().id;

  let promoted = e.promote(c.id).await.unwrap().module().clone();
  assert_eq!(promoted.references.app_copy, Some(copy_p));
  assert_eq!(promoted.references.sku, Some(sku_p));
  assert_eq!(promoted.status, ModuleStatus::Complete);
}
