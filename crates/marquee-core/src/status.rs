//! Module and value lifecycle statuses, and the ordered derivation of a
//! module's status from its deployment state and its children.
//!
//! The persisted string forms (`draft`, `ready`, `complete`, `live`, `ended`,
//! `publish_progress-<env>`) are read directly by other systems and must not
//! change.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  environment::{Deployment, Environment},
  module::ValueKey,
};

// ─── ModuleStatus ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModuleStatus {
  Draft,
  Ready,
  Complete,
  Live,
  Ended,
  /// An in-flight publish into the carried environment.
  PublishInProgress(Environment),
}

impl ModuleStatus {
  const IN_PROGRESS_PREFIX: &'static str = "publish_progress-";

  pub fn is_publish_in_progress(&self) -> bool {
    matches!(self, Self::PublishInProgress(_))
  }

  /// Ready or complete: every required value is present and saved.
  pub fn is_settled(&self) -> bool { matches!(self, Self::Ready | Self::Complete) }
}

impl fmt::Display for ModuleStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Draft => f.write_str("draft"),
      Self::Ready => f.write_str("ready"),
      Self::Complete => f.write_str("complete"),
      Self::Live => f.write_str("live"),
      Self::Ended => f.write_str("ended"),
      Self::PublishInProgress(env) => write!(f, "{}{env}", Self::IN_PROGRESS_PREFIX),
    }
  }
}

impl FromStr for ModuleStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "draft" => Ok(Self::Draft),
      "ready" => Ok(Self::Ready),
      "complete" => Ok(Self::Complete),
      "live" => Ok(Self::Live),
      "ended" => Ok(Self::Ended),
      other => match other.strip_prefix(Self::IN_PROGRESS_PREFIX) {
        Some(env) => Ok(Self::PublishInProgress(env.parse()?)),
        None => Err(Error::UnknownModuleStatus(other.to_owned())),
      },
    }
  }
}

impl TryFrom<String> for ModuleStatus {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<ModuleStatus> for String {
  fn from(s: ModuleStatus) -> Self { s.to_string() }
}

// ─── ValueStatus ─────────────────────────────────────────────────────────────

/// Status of a single child value row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueStatus {
  Incomplete,
  Saved,
  Published,
  Ended,
}

impl ValueStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Incomplete => "incomplete",
      Self::Saved => "saved",
      Self::Published => "published",
      Self::Ended => "ended",
    }
  }

  /// Saved or better.
  pub fn is_settled(self) -> bool { !matches!(self, Self::Incomplete) }

  /// The status a value carries when copied from a staged module into its
  /// promoted counterpart: content that went out in dev is accepted as saved,
  /// anything else has to be reviewed again.
  pub fn promoted(self) -> Self {
    match self {
      Self::Published | Self::Ended => Self::Saved,
      Self::Incomplete | Self::Saved => Self::Incomplete,
    }
  }
}

impl FromStr for ValueStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "incomplete" => Ok(Self::Incomplete),
      "saved" => Ok(Self::Saved),
      "published" => Ok(Self::Published),
      "ended" => Ok(Self::Ended),
      other => Err(Error::UnknownValueStatus(other.to_owned())),
    }
  }
}

// ─── Derivation ──────────────────────────────────────────────────────────────

/// Everything the status derivation looks at. Nothing else may influence the
/// outcome.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
  pub current:    &'a ModuleStatus,
  pub deployment: &'a Deployment,
  /// Key and status of every child value currently present.
  pub children:   &'a [(ValueKey, ValueStatus)],
  /// Keys that must all be present, for kinds with a required-field schema.
  pub required:   Option<&'a BTreeSet<ValueKey>>,
  /// A referenced sub-resource is itself still a draft (or missing).
  pub blocked:    bool,
  /// What a complete module settles to: `Ready` or `Complete` per kind.
  pub settled:    &'a ModuleStatus,
}

/// Compute a module's status. Rules are checked strictly in order; the first
/// match wins.
pub fn derive_status(inputs: &StatusInputs<'_>) -> ModuleStatus {
  let StatusInputs { current, deployment, children, required, blocked, settled } = *inputs;

  // 1. An in-flight publish is never clobbered.
  if current.is_publish_in_progress() {
    return current.clone();
  }
  // 2.
  if deployment.deployed_to.is_empty() && deployment.ended_on.is_some() {
    return ModuleStatus::Ended;
  }
  // 3.
  if !deployment.deployed_to.is_empty() {
    return ModuleStatus::Live;
  }
  // 4.
  if children.iter().any(|(_, s)| *s == ValueStatus::Ended) {
    return ModuleStatus::Ended;
  }
  // 5.
  if children.iter().any(|(_, s)| *s == ValueStatus::Published) {
    return ModuleStatus::Live;
  }
  // 6.
  if children.is_empty()
    || !required_keys_observed(children, required)
    || children.iter().any(|(_, s)| *s == ValueStatus::Incomplete)
  {
    return ModuleStatus::Draft;
  }
  // 7.
  if blocked {
    return ModuleStatus::Draft;
  }
  settled.clone()
}

/// The number of required combinations observed among the children must equal
/// the number required.
fn required_keys_observed(
  children: &[(ValueKey, ValueStatus)],
  required: Option<&BTreeSet<ValueKey>>,
) -> bool {
  let Some(required) = required else { return true };
  let present: BTreeSet<&ValueKey> = children.iter().map(|(k, _)| k).collect();
  let observed = required.iter().filter(|k| present.contains(k)).count();
  observed == required.len()
}
