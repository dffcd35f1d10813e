//! Deployment environments and the set of environments a module is live in.
//!
//! Environment codes are part of the externally observed contract: they are
//! short lowercase strings (`dev`, `stg`, `prod`, plus store-specific QA codes
//! such as `stg-qa` that are introduced over time). The set is open; nothing
//! in the engine enumerates the known codes.

use std::{borrow::Cow, collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Environment ─────────────────────────────────────────────────────────────

/// A single deployment environment code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Environment(Cow<'static, str>);

impl Environment {
  pub const DEV: Environment = Environment(Cow::Borrowed("dev"));
  pub const STG: Environment = Environment(Cow::Borrowed("stg"));
  pub const PROD: Environment = Environment(Cow::Borrowed("prod"));

  const MAX_LEN: usize = 32;

  /// Parse and validate an environment code.
  pub fn new(code: impl Into<String>) -> Result<Self> {
    let code = code.into();
    let valid = !code.is_empty()
      && code.len() <= Self::MAX_LEN
      && !code.starts_with('-')
      && !code.ends_with('-')
      && code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
      return Err(Error::InvalidEnvironment(code));
    }
    Ok(Self(Cow::Owned(code)))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for Environment {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::new(s) }
}

impl TryFrom<String> for Environment {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::new(s) }
}

impl From<Environment> for String {
  fn from(env: Environment) -> Self { env.0.into_owned() }
}

// ─── EnvironmentSet ──────────────────────────────────────────────────────────

/// The environments a module is currently the live one in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentSet(BTreeSet<Environment>);

impl EnvironmentSet {
  pub fn new() -> Self { Self::default() }

  pub fn contains(&self, env: &Environment) -> bool { self.0.contains(env) }

  /// Returns `true` if `env` was not already present.
  pub fn add(&mut self, env: Environment) -> bool { self.0.insert(env) }

  /// Returns `true` if `env` was present. Removing an absent code is a no-op.
  pub fn remove(&mut self, env: &Environment) -> bool { self.0.remove(env) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn iter(&self) -> impl Iterator<Item = &Environment> { self.0.iter() }

  /// True when the set holds exactly `env` and nothing else.
  pub fn is_exactly(&self, env: &Environment) -> bool {
    self.0.len() == 1 && self.0.contains(env)
  }

  pub fn clear(&mut self) { self.0.clear(); }
}

impl FromIterator<Environment> for EnvironmentSet {
  fn from_iter<T: IntoIterator<Item = Environment>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl<'a> IntoIterator for &'a EnvironmentSet {
  type Item = &'a Environment;
  type IntoIter = std::collections::btree_set::Iter<'a, Environment>;

  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

// ─── Deployment ──────────────────────────────────────────────────────────────

/// Where a module is live, and the one environment it was last retired from.
///
/// `ended_on` is a single slot: retiring from a second environment overwrites
/// the first. A code is never in `deployed_to` and `ended_on` at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
  pub deployed_to: EnvironmentSet,
  pub ended_on:    Option<Environment>,
}

impl Deployment {
  /// Mark the module live in `env`, clearing `ended_on` if it names `env`.
  pub fn deploy(&mut self, env: Environment) {
    if self.ended_on.as_ref() == Some(&env) {
      self.ended_on = None;
    }
    self.deployed_to.add(env);
  }

  /// Retire the module from `env`. Returns `false` (and changes nothing) if
  /// the module was not live there.
  pub fn retire(&mut self, env: &Environment) -> bool {
    if !self.deployed_to.remove(env) {
      return false;
    }
    self.ended_on = Some(env.clone());
    true
  }

  pub fn is_live_in(&self, env: &Environment) -> bool {
    self.deployed_to.contains(env)
  }

  /// Live nowhere, but remembers an environment it ended on.
  pub fn is_retired(&self) -> bool {
    self.deployed_to.is_empty() && self.ended_on.is_some()
  }
}
