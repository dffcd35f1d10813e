//! Ordered, checkpointed step execution with retry and cancellation.
//!
//! A pipeline is a fixed list of named steps. Each step that succeeds is
//! recorded in a [`StepLedger`] and checkpointed through the runner; a later
//! attempt (in the same call after a backoff, or a fresh call seeded from a
//! persisted ledger) skips every step already recorded. Steps therefore run
//! their external side effects at most once per successful completion.

use std::future::Future;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result, retry::RetryPolicy};

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Names of the steps that have completed, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLedger {
  completed: Vec<String>,
}

impl StepLedger {
  pub fn from_completed(completed: Vec<String>) -> Self { Self { completed } }

  pub fn is_done(&self, step: &str) -> bool { self.completed.iter().any(|s| s == step) }

  pub fn mark(&mut self, step: &str) {
    if !self.is_done(step) {
      self.completed.push(step.to_owned());
    }
  }

  pub fn completed(&self) -> &[String] { &self.completed }
}

// ─── Runner ──────────────────────────────────────────────────────────────────

pub trait PipelineStep: Send + Sync {
  /// Stable identifier, unique within one pipeline.
  fn name(&self) -> &str;
}

/// Executes the steps of one pipeline.
pub trait StepRunner: Sync {
  type Step: PipelineStep;

  fn run<'a>(&'a self, step: &'a Self::Step) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Persist progress after a step completes.
  fn checkpoint<'a>(&'a self, ledger: &'a StepLedger) -> impl Future<Output = Result<()>> + Send + 'a;
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// Run `steps` to completion, retrying failed attempts under `policy`.
///
/// Non-retryable errors end the run immediately. When attempts are
/// exhausted the last error is returned. Cancellation is observed between
/// steps, while a step is in flight, and during backoff.
pub async fn run_pipeline<R: StepRunner>(
  runner: &R,
  steps: &[R::Step],
  ledger: &mut StepLedger,
  policy: &RetryPolicy,
  cancel: &CancellationToken,
) -> Result<()> {
  let mut attempt = 1;
  loop {
    let err = match run_attempt(runner, steps, ledger, cancel).await {
      Ok(()) => return Ok(()),
      Err(err) => err,
    };
    if !err.is_retryable() {
      return Err(err);
    }
    if attempt >= policy.max_attempts {
      warn!(attempt, error = %err, "pipeline attempts exhausted");
      return Err(err);
    }

    let delay = policy.delay_after(attempt);
    warn!(
      attempt,
      max_attempts = policy.max_attempts,
      delay_ms = delay.as_millis() as u64,
      error = %err,
      "pipeline attempt failed, retrying"
    );
    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(Error::Cancelled),
      _ = sleep(delay) => {}
    }
    attempt += 1;
  }
}

async fn run_attempt<R: StepRunner>(
  runner: &R,
  steps: &[R::Step],
  ledger: &mut StepLedger,
  cancel: &CancellationToken,
) -> Result<()> {
  for step in steps {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    if ledger.is_done(step.name()) {
      debug!(step = step.name(), "step already completed, skipping");
      continue;
    }

    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(Error::Cancelled),
      result = runner.run(step) => result?,
    }
    ledger.mark(step.name());
    runner.checkpoint(ledger).await?;
    debug!(step = step.name(), "step completed");
  }
  Ok(())
}
