//! Handlers for `/modules` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/modules` | Optional `kind`, `store_id`, `product_id`, `status`, `environment`, `is_default` |
//! | `POST` | `/modules` | Body: [`NewModule`]; returns 201 + the module |
//! | `GET`  | `/modules/:id` | Module with its values |
//! | `PUT`  | `/modules/:id/values` | Body: [`SetValueBody`] |
//! | `PUT`  | `/modules/:id/references` | Body: [`References`] (campaigns only) |
//! | `POST` | `/modules/:id/status` | Body: `{"action":"force_publish"\|"archive"}` |
//! | `POST` | `/modules/:id/recompute` | |
//! | `GET`  | `/modules/:id/history` | Publish snapshots, oldest first |
//! | `POST` | `/modules/:id/publish` | Body: `{"environment":"stg"}` |
//! | `POST` | `/modules/:id/resume` | Continue an interrupted publish |
//! | `POST` | `/modules/:id/promote` | Returns a [`PromoteOutcome`] |
//! | `POST` | `/modules/:id/pull` | Body: `{"accept_changes":true}` |

use std::{future::Future, time::Duration};

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use marquee_core::{
  environment::Environment,
  journal::PublishSnapshot,
  module::{DimensionKey, Module, ModuleKind, ModuleValue, NewModule, References, ValueKey},
  services::Integrations,
  status::ModuleStatus,
  store::{ModuleQuery, ModuleRepository},
};
use marquee_publish::{PromoteOutcome, StatusOverride};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub kind:        Option<ModuleKind>,
  pub store_id:    Option<String>,
  pub product_id:  Option<String>,
  pub status:      Option<ModuleStatus>,
  /// Only modules currently deployed to this environment.
  pub environment: Option<Environment>,
  pub is_default:  Option<bool>,
}

impl From<ListParams> for ModuleQuery {
  fn from(p: ListParams) -> Self {
    ModuleQuery {
      kind:        p.kind,
      store_id:    p.store_id,
      product_id:  p.product_id,
      status:      p.status,
      is_default:  p.is_default,
      deployed_to: p.environment,
      referencing: None,
    }
  }
}

/// `GET /modules`
pub async fn list<R, I>(
  State(state): State<ApiState<R, I>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Module>>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let modules = state.engine.list_modules(&params.into()).await?;
  Ok(Json(modules))
}

// ─── Create / get ────────────────────────────────────────────────────────────

/// `POST /modules`
pub async fn create<R, I>(
  State(state): State<ApiState<R, I>>,
  Json(body): Json<NewModule>,
) -> Result<impl IntoResponse, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let module = state.engine.create_module(body).await?;
  Ok((StatusCode::CREATED, Json(module)))
}

/// A module together with its child values.
#[derive(Debug, Serialize)]
pub struct ModuleView {
  #[serde(flatten)]
  pub module: Module,
  pub values: Vec<ModuleValue>,
}

/// `GET /modules/:id`
pub async fn get_one<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ModuleView>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let module = state.engine.get_module(id).await?;
  let values = state.engine.module_values(id).await?;
  Ok(Json(ModuleView { module, values }))
}

// ─── Editing ─────────────────────────────────────────────────────────────────

/// JSON body accepted by `PUT /modules/:id/values`. A `null` value marks the
/// key incomplete.
#[derive(Debug, Deserialize)]
pub struct SetValueBody {
  pub field:     String,
  pub dimension: DimensionKey,
  #[serde(default)]
  pub value:     serde_json::Value,
}

/// `PUT /modules/:id/values`
pub async fn set_value<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
  Json(body): Json<SetValueBody>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let key = ValueKey::new(body.field, body.dimension);
  Ok(Json(state.engine.set_value(id, key, body.value).await?))
}

/// `PUT /modules/:id/references`
pub async fn set_references<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
  Json(body): Json<References>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.set_references(id, body).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub action: StatusOverride,
}

/// `POST /modules/:id/status`
pub async fn override_status<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
  Json(body): Json<StatusBody>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.override_status(id, body.action).await?))
}

/// `POST /modules/:id/recompute`
pub async fn recompute<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.recompute(id).await?))
}

/// `GET /modules/:id/history`
pub async fn history<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<PublishSnapshot>>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.history(id).await?))
}

// ─── Publishing ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PublishBody {
  pub environment: Environment,
}

/// `POST /modules/:id/publish`
pub async fn publish<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
  Json(body): Json<PublishBody>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let engine = state.engine.clone();
  let module = detached(state.publish_timeout, move |cancel| async move {
    engine.publish(id, body.environment, cancel).await
  })
  .await?;
  Ok(Json(module))
}

/// `POST /modules/:id/resume`
pub async fn resume<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let engine = state.engine.clone();
  let module = detached(state.publish_timeout, move |cancel| async move {
    engine.resume(id, cancel).await
  })
  .await?;
  Ok(Json(module))
}

/// Run a publish on its own task so it always reaches a rollback or a
/// finish. The task is cancelled when `timeout` elapses or when the request
/// is dropped.
async fn detached<T, F, Fut>(timeout: Duration, op: F) -> Result<T, ApiError>
where
  F: FnOnce(CancellationToken) -> Fut,
  Fut: Future<Output = marquee_publish::Result<T>> + Send + 'static,
  T: Send + 'static,
{
  let cancel = CancellationToken::new();
  let _on_drop = cancel.clone().drop_guard();
  let mut task = tokio::spawn(op(cancel.clone()));

  let joined = tokio::select! {
    joined = &mut task => joined,
    _ = tokio::time::sleep(timeout) => {
      warn!(timeout_secs = timeout.as_secs(), "publish timed out, cancelling");
      cancel.cancel();
      task.await
    }
  };
  match joined {
    Ok(result) => result.map_err(ApiError::from),
    Err(e) => Err(ApiError::Internal(Box::new(e))),
  }
}

// ─── Promotion ───────────────────────────────────────────────────────────────

/// `POST /modules/:id/promote`
pub async fn promote<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
) -> Result<Json<PromoteOutcome>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.promote(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PullBody {
  pub accept_changes: bool,
}

/// `POST /modules/:id/pull`
pub async fn pull<R, I>(
  State(state): State<ApiState<R, I>>,
  Path(id): Path<Uuid>,
  Json(body): Json<PullBody>,
) -> Result<Json<Module>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Ok(Json(state.engine.pull(id, body.accept_changes).await?))
}
