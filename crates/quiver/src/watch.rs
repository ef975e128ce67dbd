use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
  Create,
  Update,
  Delete,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
  pub path: PathBuf,
  pub kind: WatchEventType,
}

impl WatchEvent {
  pub fn update(path: impl Into<PathBuf>) -> Self {
    WatchEvent {
      path: path.into(),
      kind: WatchEventType::Update,
    }
  }

  pub fn delete(path: impl Into<PathBuf>) -> Self {
    WatchEvent {
      path: path.into(),
      kind: WatchEventType::Delete,
    }
  }
}

pub type WatchEvents = Vec<WatchEvent>;
