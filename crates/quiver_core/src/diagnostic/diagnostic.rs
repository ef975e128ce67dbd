use std::fmt::Display;
use std::fmt::Formatter;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::types::JSONObject;

use super::CodeFrame;

/// This is a user facing error for quiver.
///
/// Usually but not always this is linked to a source-code location.
#[derive(Error, Debug, Deserialize, PartialEq, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  /// A summary user-facing message
  pub message: String,

  /// Indicates where this diagnostic was emitted from
  pub origin: Option<String>,

  /// A stacktrace of the error (optional)
  pub stack: Option<String>,

  /// Name of the error (optional)
  pub name: Option<String>,

  /// A list of files with source-code highlights
  pub code_frames: Option<Vec<CodeFrame>>,

  /// Hints for the user
  pub hints: Option<Vec<String>>,

  /// Diagnostic specific metadata (optional)
  pub meta: Option<JSONObject>,
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.message)
  }
}

impl Diagnostic {
  pub fn new(message: impl Into<String>) -> Self {
    Diagnostic {
      message: message.into(),
      ..Diagnostic::default()
    }
  }

  pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = Some(origin.into());
    self
  }

  pub fn with_code_frame(mut self, code_frame: CodeFrame) -> Self {
    self.code_frames.get_or_insert_with(Vec::new).push(code_frame);
    self
  }

  pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
    self.hints.get_or_insert_with(Vec::new).push(hint.into());
    self
  }

  pub fn name_matches<N: AsRef<str>>(&self, name: N) -> bool {
    self.name.as_ref().is_some_and(|n| n == name.as_ref())
  }

  /// File path of the first code frame
  pub fn file_path(&self) -> Option<&PathBuf> {
    self
      .code_frames
      .as_ref()
      .and_then(|frames| frames.first())
      .and_then(|frame| frame.file_path.as_ref())
  }

  /// Formats the diagnostic as `file:line:column: message`, followed by the rendered code
  /// frame when one is available
  pub fn pretty(&self) -> String {
    let mut message = if self.message.is_empty() {
      String::from("Unknown error")
    } else {
      self.message.clone()
    };

    let frame = self.code_frames.as_ref().and_then(|frames| frames.first());
    if let Some(path) = frame.and_then(|frame| frame.file_path.as_ref()) {
      let mut file_name = path.display().to_string();
      if let Some(highlight) = frame.and_then(|frame| frame.code_highlights.first()) {
        file_name += &format!(":{}:{}", highlight.start.line, highlight.start.column);
      }

      message = format!("{}: {}", file_name, message);
    }

    match frame.and_then(CodeFrame::render).or_else(|| self.stack.clone()) {
      Some(detail) => format!("{}\n{}", message, detail),
      None => message,
    }
  }
}
