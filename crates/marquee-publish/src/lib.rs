//! The Marquee publishing engine.
//!
//! [`Engine`] owns a [`ModuleRepository`](marquee_core::store::ModuleRepository)
//! and the external [`Integrations`](marquee_core::services::Integrations) and
//! exposes every editor-facing operation: authoring, status recomputation,
//! publishing (with retry, resume and rollback), supersession and promotion.

#![allow(async_fn_in_trait)]

mod authoring;
pub mod config;
mod engine;
pub mod error;
pub mod locks;
pub mod payload;
pub mod pipeline;
mod promotion;
pub mod publish;
mod recompute;
pub mod retry;
mod supersession;
pub mod token;

pub use authoring::StatusOverride;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use promotion::PromoteOutcome;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;
