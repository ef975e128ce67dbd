use quiver_core::diagnostic::Diagnostic;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Failures of the farm itself, as opposed to failures of the work it runs
#[derive(Debug, Error, PartialEq)]
pub enum FarmError {
  #[error("Cannot add a worker call while the worker farm is ending")]
  Ending,

  #[error("The worker farm is not running")]
  Stopped,

  #[error("Failed to start a worker: {0}")]
  Spawn(String),

  #[error("Failed to initialize a worker: {0}")]
  Init(String),

  #[error("Worker call was dropped before it completed")]
  Dropped,
}

/// An error serialized across the process boundary
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
  pub message: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  /// Structured diagnostic, when the original error carried one
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub diagnostic: Option<Diagnostic>,
}

impl From<&anyhow::Error> for RemoteError {
  fn from(error: &anyhow::Error) -> Self {
    RemoteError {
      message: error.to_string(),
      stack: Some(format!("{:?}", error)),
      name: Some(String::from("Error")),
      diagnostic: error.downcast_ref::<Diagnostic>().cloned(),
    }
  }
}

impl From<RemoteError> for anyhow::Error {
  fn from(error: RemoteError) -> Self {
    match error.diagnostic {
      Some(diagnostic) => anyhow::Error::new(diagnostic),
      None => anyhow::Error::new(Diagnostic {
        message: error.message,
        stack: error.stack,
        name: error.name,
        ..Diagnostic::default()
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;
  use quiver_core::diagnostic::CodeFrame;

  use super::*;

  #[test]
  fn diagnostics_survive_the_round_trip() {
    let diagnostic =
      Diagnostic::new("Unexpected token").with_code_frame(CodeFrame::from(PathBuf::from("a.js")));
    let error = anyhow::Error::new(diagnostic.clone());

    let json = serde_json::to_string(&RemoteError::from(&error)).unwrap();
    let error: anyhow::Error = serde_json::from_str::<RemoteError>(&json).unwrap().into();

    assert_eq!(error.downcast_ref::<Diagnostic>(), Some(&diagnostic));
  }

  #[test]
  fn plain_errors_keep_their_message() {
    let error: anyhow::Error = RemoteError::from(&anyhow::anyhow!("boom")).into();

    assert_eq!(error.to_string(), "boom");
    assert_eq!(
      error.downcast_ref::<Diagnostic>().and_then(|d| d.name.clone()),
      Some(String::from("Error"))
    );
  }
}
