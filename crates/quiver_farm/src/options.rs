use std::time::Duration;

use anyhow::anyhow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FromEnvError {
  #[error("Invalid value for {0}: {1}")]
  InvalidKey(String, anyhow::Error),
}

fn optional_var(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_var(key: &str) -> Result<Option<usize>, FromEnvError> {
  let Some(value) = optional_var(key) else {
    return Ok(None);
  };

  match value.trim().parse::<usize>() {
    Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
    _ => Err(FromEnvError::InvalidKey(
      key.to_string(),
      anyhow!("Expected a positive integer, got {}", value),
    )),
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FarmOptions {
  /// Size of the worker pool
  pub max_concurrent_workers: usize,

  /// Calls a worker may have outstanding at once
  pub max_concurrent_calls_per_worker: usize,

  /// Grace period between asking a worker to exit and killing it
  pub forced_kill_time: Duration,

  /// Run calls locally while copies prime the remote workers
  pub warm_workers: bool,

  /// Allow calls to run in the coordinating process at all
  pub use_local_worker: bool,
}

impl Default for FarmOptions {
  fn default() -> Self {
    Self {
      max_concurrent_workers: num_cpus::get_physical().max(1),
      max_concurrent_calls_per_worker: 5,
      forced_kill_time: Duration::from_millis(500),
      warm_workers: true,
      use_local_worker: true,
    }
  }
}

impl FarmOptions {
  /// Defaults, with `QUIVER_WORKERS` and `QUIVER_MAX_CONCURRENT_CALLS` overriding the pool size
  /// and the calls per worker
  pub fn from_env() -> Result<Self, FromEnvError> {
    let mut options = Self::default();

    if let Some(workers) = parse_var("QUIVER_WORKERS")? {
      options.max_concurrent_workers = workers;
    }

    if let Some(calls) = parse_var("QUIVER_MAX_CONCURRENT_CALLS")? {
      options.max_concurrent_calls_per_worker = calls;
    }

    Ok(options)
  }

  /// Remote workers are only worth starting when there is more than one, or when calls may
  /// not run locally
  pub fn should_start_remote_workers(&self) -> bool {
    self.max_concurrent_workers > 1 || !self.use_local_worker
  }
}
