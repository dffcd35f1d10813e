//! Handlers for `/schemas` endpoints: the required-field schema of a
//! store/product.

use axum::{
  Json,
  extract::{Path, State},
};
use marquee_core::{module::ScopeSchema, services::Integrations, store::ModuleRepository};

use crate::{ApiState, error::ApiError};

/// `GET /schemas/:store_id/:product_id`
pub async fn get_one<R, I>(
  State(state): State<ApiState<R, I>>,
  Path((store_id, product_id)): Path<(String, String)>,
) -> Result<Json<ScopeSchema>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  let schema = state
    .engine
    .get_schema(&store_id, &product_id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("no schema for {store_id}/{product_id}")))?;
  Ok(Json(schema))
}

/// `PUT /schemas/:store_id/:product_id`. Replaces the schema wholesale.
pub async fn replace<R, I>(
  State(state): State<ApiState<R, I>>,
  Path((store_id, product_id)): Path<(String, String)>,
  Json(schema): Json<ScopeSchema>,
) -> Result<Json<ScopeSchema>, ApiError>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  state.engine.put_schema(&store_id, &product_id, &schema).await?;
  Ok(Json(schema))
}
