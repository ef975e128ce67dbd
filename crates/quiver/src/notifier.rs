//! Tells live-reload clients about finished builds
use indexmap::IndexMap;
use parking_lot::Mutex;
use quiver_core::types::FileType;
use quiver_core::types::Generated;
use serde::Serialize;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::pretty_error;
use crate::error::PrettyError;
use crate::error::QuiverError;

/// An asset a rebuild processed again
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedAsset {
  pub id: String,

  #[serde(skip)]
  pub file_type: Option<FileType>,

  pub generated: Generated,

  /// Dependency names mapped to the ids of the assets they resolved to
  pub deps: IndexMap<String, String>,
}

/// Receives the outcome of every build
#[mockall::automock]
pub trait BuildNotifier: Send + Sync {
  fn emit_update(&self, assets: &[ChangedAsset]);

  fn emit_error(&self, error: &QuiverError);
}

/// Events sent to live-reload clients, serialized as JSON
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrEvent {
  Update { assets: Vec<ChangedAsset> },
  Reload,
  Error { error: PrettyError },
  ErrorResolved,
}

#[derive(Default)]
struct HubState {
  subscribers: Vec<UnboundedSender<String>>,

  /// Serialized error event of the last failed build, until a build succeeds
  unresolved_error: Option<String>,
}

/// Broadcasts build events to every subscribed client
///
/// A client subscribing while the last build is failing receives that error first. The next
/// successful build resolves the error before sending its update.
#[derive(Default)]
pub struct HmrHub {
  state: Mutex<HubState>,
}

impl HmrHub {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self) -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();
    let mut state = self.state.lock();

    if let Some(error) = &state.unresolved_error {
      let _ = tx.send(error.clone());
    }

    state.subscribers.push(tx);
    rx
  }

  pub fn subscribers(&self) -> usize {
    self.state.lock().subscribers.len()
  }

  fn broadcast(state: &mut HubState, event: &HmrEvent) {
    let message = match serde_json::to_string(event) {
      Ok(message) => message,
      Err(error) => {
        tracing::error!("Failed to serialize hmr event: {error}");
        return;
      }
    };

    state
      .subscribers
      .retain(|subscriber| subscriber.send(message.clone()).is_ok());
  }
}

impl BuildNotifier for HmrHub {
  fn emit_update(&self, assets: &[ChangedAsset]) {
    let mut state = self.state.lock();

    if state.unresolved_error.take().is_some() {
      HmrHub::broadcast(&mut state, &HmrEvent::ErrorResolved);
    }

    if assets.is_empty() {
      return;
    }

    // Html cannot be swapped in place
    let event = if assets
      .iter()
      .any(|asset| asset.file_type == Some(FileType::Html))
    {
      HmrEvent::Reload
    } else {
      HmrEvent::Update {
        assets: assets.to_vec(),
      }
    };

    tracing::debug!("Sending hmr update for {} assets", assets.len());
    HmrHub::broadcast(&mut state, &event);
  }

  fn emit_error(&self, error: &QuiverError) {
    let event = HmrEvent::Error {
      error: pretty_error(error),
    };

    let mut state = self.state.lock();
    state.unresolved_error = serde_json::to_string(&event).ok();
    HmrHub::broadcast(&mut state, &event);
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_core::diagnostic::Diagnostic;
  use quiver_core::types::RenditionValue;
  use serde_json::json;
  use serde_json::Value;

  use super::*;

  fn changed(id: &str, file_type: FileType) -> ChangedAsset {
    let mut generated = Generated::new();
    generated.insert(FileType::Js, RenditionValue::from("module.exports = 1;"));

    let mut deps = IndexMap::new();
    deps.insert(String::from("./b"), String::from("b.js"));

    ChangedAsset {
      id: id.to_string(),
      file_type: Some(file_type),
      generated,
      deps,
    }
  }

  fn next(rx: &mut UnboundedReceiver<String>) -> Value {
    serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
  }

  #[test]
  fn broadcasts_updates() {
    let hub = HmrHub::new();
    let mut first = hub.subscribe();
    let mut second = hub.subscribe();

    hub.emit_update(&[changed("a.js", FileType::Js)]);

    let expected = json!({
      "type": "update",
      "assets": [{
        "id": "a.js",
        "generated": { "js": "module.exports = 1;" },
        "deps": { "./b": "b.js" },
      }],
    });
    assert_eq!(next(&mut first), expected);
    assert_eq!(next(&mut second), expected);
  }

  #[test]
  fn html_changes_reload() {
    let hub = HmrHub::new();
    let mut rx = hub.subscribe();

    hub.emit_update(&[changed("a.js", FileType::Js), changed("index.html", FileType::Html)]);

    assert_eq!(next(&mut rx), json!({ "type": "reload" }));
  }

  #[test]
  fn errors_are_replayed_until_resolved() {
    let hub = HmrHub::new();
    let mut rx = hub.subscribe();

    hub.emit_error(&QuiverError::Diagnostic(Diagnostic::new("Unexpected token")));
    assert_eq!(
      next(&mut rx),
      json!({ "type": "error", "error": { "message": "Unexpected token" } })
    );

    let mut late = hub.subscribe();
    assert_eq!(next(&mut late)["type"], json!("error"));

    hub.emit_update(&[changed("a.js", FileType::Js)]);
    assert_eq!(next(&mut rx), json!({ "type": "error-resolved" }));
    assert_eq!(next(&mut rx)["type"], json!("update"));

    let mut fresh = hub.subscribe();
    assert!(fresh.try_recv().is_err());
  }

  #[test]
  fn closed_subscribers_are_dropped() {
    let hub = HmrHub::new();
    let rx = hub.subscribe();
    let _kept = hub.subscribe();
    drop(rx);

    hub.emit_update(&[changed("a.js", FileType::Js)]);

    assert_eq!(hub.subscribers(), 1);
  }
}
