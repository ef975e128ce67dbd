use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::Child;

/// The channel to a freshly started worker
pub struct SpawnedWorker {
  /// Messages for the worker
  pub stdin: Box<dyn AsyncWrite + Send + Unpin>,

  /// Messages from the worker
  pub stdout: Box<dyn AsyncRead + Send + Unpin>,

  pub process: WorkerProcess,
}

/// A handle on the running worker
pub enum WorkerProcess {
  Os(tokio::process::Child),
  Task(JoinHandle<()>),
}

impl WorkerProcess {
  /// Resolves once the worker has exited
  pub async fn wait(&mut self) {
    match self {
      WorkerProcess::Os(child) => {
        if let Err(error) = child.wait().await {
          tracing::debug!("Failed to wait for worker process: {error}");
        }
      }
      WorkerProcess::Task(handle) => {
        let _ = handle.await;
      }
    }
  }

  pub fn kill(&mut self) {
    match self {
      WorkerProcess::Os(child) => {
        if let Err(error) = child.start_kill() {
          tracing::debug!("Failed to kill worker process: {error}");
        }
      }
      WorkerProcess::Task(handle) => handle.abort(),
    }
  }
}

/// Starts workers for the farm
pub trait WorkerSpawner: Send + Sync {
  fn spawn(&self) -> anyhow::Result<SpawnedWorker>;
}

/// Runs each worker as an OS process speaking the line protocol over stdio
#[derive(Clone, Debug)]
pub struct ProcessSpawner {
  program: PathBuf,
  args: Vec<String>,
}

impl ProcessSpawner {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }
}

impl WorkerSpawner for ProcessSpawner {
  fn spawn(&self) -> anyhow::Result<SpawnedWorker> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

    let stdin = child.stdin.take().context("Worker stdin is not piped")?;
    let stdout = child.stdout.take().context("Worker stdout is not piped")?;

    Ok(SpawnedWorker {
      stdin: Box::new(stdin),
      stdout: Box::new(stdout),
      process: WorkerProcess::Os(child),
    })
  }
}

/// Runs each worker as a task on the current runtime, connected through in-memory pipes
///
/// Workers started this way behave like processes on the wire, which makes the farm testable
/// without building a worker binary.
#[derive(Clone)]
pub struct InProcessSpawner {
  new_child: Arc<dyn Fn() -> Child + Send + Sync>,
}

impl InProcessSpawner {
  pub fn new<F>(new_child: F) -> Self
  where
    F: Fn() -> Child + Send + Sync + 'static,
  {
    Self {
      new_child: Arc::new(new_child),
    }
  }
}

impl WorkerSpawner for InProcessSpawner {
  fn spawn(&self) -> anyhow::Result<SpawnedWorker> {
    let (coordinator, worker) = tokio::io::duplex(64 * 1024);
    let (coordinator_read, coordinator_write) = tokio::io::split(coordinator);
    let (worker_read, worker_write) = tokio::io::split(worker);

    let child = (self.new_child)();
    let handle = tokio::spawn(async move {
      if let Err(error) = child.run(worker_read, worker_write).await {
        tracing::debug!("In-process worker failed: {error}");
      }
    });

    Ok(SpawnedWorker {
      stdin: Box::new(coordinator_write),
      stdout: Box::new(coordinator_read),
      process: WorkerProcess::Task(handle),
    })
  }
}
