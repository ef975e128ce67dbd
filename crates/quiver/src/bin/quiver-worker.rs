//! Worker process of the quiver farm, speaks the farm protocol over stdin and stdout
use std::sync::Arc;

use quiver::farm::Child;
use quiver::file_system::os_file_system::OsFileSystem;
use quiver::logging::initialize_worker_tracing;
use quiver::worker::worker_modules;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let child = Child::new(worker_modules(Arc::new(OsFileSystem)));

  // Stdout carries the protocol, so every log line goes through the coordinator
  initialize_worker_tracing(child.master_caller())?;

  child.run(tokio::io::stdin(), tokio::io::stdout()).await
}
