//! JSON REST API for the Marquee publishing engine.
//!
//! Exposes an axum [`Router`] backed by an [`Engine`] over any
//! [`ModuleRepository`] and set of [`Integrations`]. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", marquee_api::api_router(ApiState::new(engine, timeout)))
//! ```

pub mod error;
pub mod modules;
pub mod schemas;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{get, post, put},
};
use marquee_core::{services::Integrations, store::ModuleRepository};
use marquee_publish::Engine;

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct ApiState<R, I> {
  pub engine:          Arc<Engine<R, I>>,
  /// Upper bound on one publish or resume before it is cancelled and
  /// rolled back.
  pub publish_timeout: Duration,
}

impl<R, I> ApiState<R, I> {
  pub fn new(engine: Arc<Engine<R, I>>, publish_timeout: Duration) -> Self {
    Self { engine, publish_timeout }
  }
}

impl<R, I> Clone for ApiState<R, I> {
  fn clone(&self) -> Self {
    Self { engine: self.engine.clone(), publish_timeout: self.publish_timeout }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<R, I>(state: ApiState<R, I>) -> Router<()>
where
  R: ModuleRepository + 'static,
  I: Integrations,
{
  Router::new()
    // Modules
    .route("/modules", get(modules::list::<R, I>).post(modules::create::<R, I>))
    .route("/modules/{id}", get(modules::get_one::<R, I>))
    .route("/modules/{id}/values", put(modules::set_value::<R, I>))
    .route("/modules/{id}/references", put(modules::set_references::<R, I>))
    .route("/modules/{id}/status", post(modules::override_status::<R, I>))
    .route("/modules/{id}/recompute", post(modules::recompute::<R, I>))
    .route("/modules/{id}/history", get(modules::history::<R, I>))
    // Publishing
    .route("/modules/{id}/publish", post(modules::publish::<R, I>))
    .route("/modules/{id}/resume", post(modules::resume::<R, I>))
    // Promotion
    .route("/modules/{id}/promote", post(modules::promote::<R, I>))
    .route("/modules/{id}/pull", post(modules::pull::<R, I>))
    // Required-field schemas
    .route(
      "/schemas/{store_id}/{product_id}",
      get(schemas::get_one::<R, I>).put(schemas::replace::<R, I>),
    )
    .with_state(state)
}
