//! Publish journal: the persisted job record that lets a publish resume, and
//! the append-only history of published content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{environment::Environment, module::ModuleKind, status::ModuleStatus};

// ─── History ─────────────────────────────────────────────────────────────────

/// The content of a module as it was published. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSnapshot {
  pub id:           Uuid,
  pub module_id:    Uuid,
  pub kind:         ModuleKind,
  pub environment:  Environment,
  pub content:      serde_json::Value,
  /// SHA-256 hex digest of the serialised `content`.
  pub content_hash: String,
  pub published_at: DateTime<Utc>,
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
  Running,
  Succeeded,
  Failed,
}

impl JobState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
    }
  }
}

/// A module's status just before the publish that owns this job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorStatus {
  pub module_id: Uuid,
  pub status:    ModuleStatus,
}

/// One publish of one module into one environment.
///
/// `completed_steps` is checkpointed after every step so a restarted process
/// can continue without repeating external side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishJob {
  pub id:              Uuid,
  pub module_id:       Uuid,
  pub environment:     Environment,
  pub state:           JobState,
  pub completed_steps: Vec<String>,
  pub prior_statuses:  Vec<PriorStatus>,
  pub error:           Option<String>,
  pub started_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl PublishJob {
  pub fn start(module_id: Uuid, environment: Environment, prior_statuses: Vec<PriorStatus>) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      module_id,
      environment,
      state: JobState::Running,
      completed_steps: vec![],
      prior_statuses,
      error: None,
      started_at: now,
      updated_at: now,
    }
  }

  pub fn is_open(&self) -> bool { self.state == JobState::Running }
}
