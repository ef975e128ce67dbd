use anyhow::anyhow;
use quiver_core::diagnostic::Diagnostic;
use quiver_core::diagnostic::Diagnostics;
use serde::Serialize;

/// A build failure in the form reported to notifiers and users
#[derive(Clone, Debug, PartialEq)]
pub enum QuiverError {
  Diagnostic(Diagnostic),
  Diagnostics(Diagnostics),
  Unknown(String),
}

impl Serialize for QuiverError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    match self {
      QuiverError::Diagnostic(diagnostic) => diagnostic.serialize(serializer),
      QuiverError::Diagnostics(diagnostics) => diagnostics.serialize(serializer),
      QuiverError::Unknown(message) => message.serialize(serializer),
    }
  }
}

impl From<&anyhow::Error> for QuiverError {
  fn from(error: &anyhow::Error) -> Self {
    if let Some(diagnostic) = error.downcast_ref::<Diagnostic>() {
      Self::Diagnostic(diagnostic.clone())
    } else if let Some(diagnostics) = error.downcast_ref::<Diagnostics>() {
      Self::Diagnostics(diagnostics.clone())
    } else if let Some(message) = error.downcast_ref::<String>() {
      Self::Unknown(message.clone())
    } else {
      Self::Unknown(error.to_string())
    }
  }
}

impl From<QuiverError> for anyhow::Error {
  fn from(value: QuiverError) -> Self {
    match value {
      QuiverError::Diagnostic(diagnostic) => anyhow!(diagnostic),
      QuiverError::Diagnostics(diagnostics) => anyhow!(diagnostics),
      QuiverError::Unknown(message) => anyhow!(message),
    }
  }
}

/// The message and detail shown for a failed build
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PrettyError {
  pub message: String,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
}

/// Formats an error as `file:line:column: message`, with the code frame as its detail
pub fn pretty_error(error: &QuiverError) -> PrettyError {
  let diagnostic = match error {
    QuiverError::Diagnostic(diagnostic) => Some(diagnostic),
    QuiverError::Diagnostics(diagnostics) => diagnostics.as_ref().first(),
    QuiverError::Unknown(message) => {
      return PrettyError {
        message: if message.is_empty() {
          String::from("Unknown error")
        } else {
          message.clone()
        },
        stack: None,
      };
    }
  };

  let Some(diagnostic) = diagnostic else {
    return PrettyError {
      message: String::from("Unknown error"),
      stack: None,
    };
  };

  let pretty = diagnostic.pretty();
  match pretty.split_once('\n') {
    Some((message, stack)) => PrettyError {
      message: message.to_string(),
      stack: Some(stack.to_string()),
    },
    None => PrettyError {
      message: pretty,
      stack: None,
    },
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;
  use quiver_core::diagnostic::CodeFrame;
  use quiver_core::diagnostic::CodeHighlight;

  use super::*;

  #[test]
  fn recovers_diagnostics_from_anyhow() {
    let diagnostic = Diagnostic::new("Unexpected token");
    let error = anyhow::Error::new(diagnostic.clone());

    assert_eq!(QuiverError::from(&error), QuiverError::Diagnostic(diagnostic));
    assert_eq!(
      QuiverError::from(&anyhow!("boom")),
      QuiverError::Unknown(String::from("boom"))
    );
  }

  #[test]
  fn pretty_errors_prefix_the_location() {
    let diagnostic = Diagnostic::new("Unexpected token").with_code_frame(CodeFrame::new(
      PathBuf::from("src/a.js"),
      String::from("let a = ;"),
      CodeHighlight::from([1, 9]),
    ));

    let pretty = pretty_error(&QuiverError::Diagnostic(diagnostic));

    assert_eq!(pretty.message, "src/a.js:1:9: Unexpected token");
    assert!(pretty.stack.is_some_and(|stack| stack.contains("let a = ;")));
  }

  #[test]
  fn empty_messages_are_unknown() {
    let pretty = pretty_error(&QuiverError::Unknown(String::new()));

    assert_eq!(
      pretty,
      PrettyError {
        message: String::from("Unknown error"),
        stack: None
      }
    );
  }
}
