//! Configures `tracing_subscriber` for the coordinator, and forwards worker logs to it
//!
//! Workers use their stdout for the wire protocol, so they never print. Their events travel
//! to the coordinator as `log` calls and are printed there, in one place.
use std::fmt::Write;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use quiver_core::types::LogLevel;
use quiver_farm::MasterCallerRef;
use serde::Deserialize;
use serde::Serialize;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Level;
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

pub const LOG_ENV_VAR: &str = "QUIVER_LOG";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// A log event recorded in a worker
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
  pub level: String,
  pub target: String,
  pub message: String,
}

fn default_directive(level: LogLevel) -> &'static str {
  match level {
    LogLevel::None => "off",
    LogLevel::Error => "error",
    LogLevel::Warn => "warn",
    LogLevel::Info => "info",
    LogLevel::Verbose => "debug",
  }
}

/// Installs the global subscriber of the coordinating process
///
/// `QUIVER_LOG` takes precedence over `level` and accepts `EnvFilter` directives. Calling
/// this again leaves the first subscriber in place.
pub fn initialize_tracing(level: LogLevel) -> anyhow::Result<()> {
  if INITIALIZED.swap(true, Ordering::AcqRel) {
    tracing::warn!("Tracing is already initialized");
    return Ok(());
  }

  let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
    .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

  let layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_filter(filter);

  tracing::subscriber::set_global_default(Registry::default().with(layer))?;

  Ok(())
}

/// Installs the global subscriber of a worker process, which forwards every event
pub fn initialize_worker_tracing(master: MasterCallerRef) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
  let subscriber = Registry::default().with(WorkerLogLayer::new(master).with_filter(filter));

  tracing::subscriber::set_global_default(subscriber)?;
  Ok(())
}

/// Prints an event forwarded by a worker through the coordinator's subscriber
pub fn emit(event: &LogEvent) {
  let target = event.target.as_str();
  let message = event.message.as_str();

  match event.level.as_str() {
    "ERROR" => tracing::error!(target: "quiver::worker", source = target, "{message}"),
    "WARN" => tracing::warn!(target: "quiver::worker", source = target, "{message}"),
    "INFO" => tracing::info!(target: "quiver::worker", source = target, "{message}"),
    "DEBUG" => tracing::debug!(target: "quiver::worker", source = target, "{message}"),
    _ => tracing::trace!(target: "quiver::worker", source = target, "{message}"),
  }
}

/// Turns every event into a fire-and-forget `log` call to the coordinator
pub struct WorkerLogLayer {
  master: MasterCallerRef,
}

impl WorkerLogLayer {
  pub fn new(master: MasterCallerRef) -> Self {
    Self { master }
  }
}

impl<S: Subscriber> Layer<S> for WorkerLogLayer {
  fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
    let metadata = event.metadata();

    // Forwarding must not log, or every forwarded event would produce another one
    if metadata.target().starts_with("quiver_farm") {
      return;
    }

    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);

    let log = LogEvent {
      level: level_name(metadata.level()).to_string(),
      target: metadata.target().to_string(),
      message: visitor.finish(),
    };

    if let Ok(log) = serde_json::to_value(log) {
      self.master.notify("log", vec![log]);
    }
  }
}

fn level_name(level: &Level) -> &'static str {
  match *level {
    Level::ERROR => "ERROR",
    Level::WARN => "WARN",
    Level::INFO => "INFO",
    Level::DEBUG => "DEBUG",
    Level::TRACE => "TRACE",
  }
}

/// Collects the message of an event, followed by its other fields as `name=value`
#[derive(Default)]
struct MessageVisitor {
  message: String,
  fields: String,
}

impl Visit for MessageVisitor {
  fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
    if field.name() == "message" {
      let _ = write!(self.message, "{value:?}");
    } else {
      let _ = write!(self.fields, " {}={value:?}", field.name());
    }
  }

  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      self.message.push_str(value);
    } else {
      let _ = write!(self.fields, " {}={value}", field.name());
    }
  }
}

impl MessageVisitor {
  fn finish(self) -> String {
    self.message + &self.fields
  }
}
