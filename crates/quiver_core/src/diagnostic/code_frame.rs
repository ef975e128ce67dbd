use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::CodeHighlight;

/// Lines of context printed around a highlighted line
const CONTEXT_LINES: usize = 2;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CodeFrame {
  /// Source-code of the file at the time of error
  pub code: Option<String>,

  /// Path to the source file if applicable.
  pub file_path: Option<PathBuf>,

  /// List of source-code highlight messages
  pub code_highlights: Vec<CodeHighlight>,
}

impl From<PathBuf> for CodeFrame {
  fn from(path: PathBuf) -> Self {
    CodeFrame {
      code: None,
      code_highlights: Vec::new(),
      file_path: Some(path),
    }
  }
}

impl CodeFrame {
  pub fn new(file_path: PathBuf, code: String, highlight: CodeHighlight) -> Self {
    CodeFrame {
      code: Some(code),
      file_path: Some(file_path),
      code_highlights: vec![highlight],
    }
  }

  /// Renders the frame as text, marking each highlighted line with `>` and placing a caret
  /// under the highlighted column.
  ///
  /// Returns `None` when there is no source or nothing is highlighted.
  pub fn render(&self) -> Option<String> {
    let code = self.code.as_ref()?;
    let highlight = self.code_highlights.first()?;
    let lines = code.lines().collect::<Vec<&str>>();
    if lines.is_empty() {
      return None;
    }

    let line = highlight.start.line.clamp(1, lines.len());
    let first = line.saturating_sub(CONTEXT_LINES).max(1);
    let last = (highlight.end.line.max(line) + CONTEXT_LINES).min(lines.len());
    let gutter = last.to_string().len();

    let mut output = Vec::new();
    for number in first..=last {
      let source = lines[number - 1];
      let marker = if number >= line && number <= highlight.end.line.max(line) {
        ">"
      } else {
        " "
      };

      output.push(
        format!("{} {:>gutter$} | {}", marker, number, source)
          .trim_end()
          .to_string(),
      );

      if number == line {
        let column = highlight.start.column.max(1);
        let width = if highlight.end.line == highlight.start.line {
          highlight.end.column.saturating_sub(column) + 1
        } else {
          1
        };

        let mut pointer = format!(
          "  {:>gutter$} | {}{}",
          "",
          " ".repeat(column - 1),
          "^".repeat(width.max(1))
        );
        if let Some(message) = &highlight.message {
          pointer.push(' ');
          pointer.push_str(message);
        }

        output.push(pointer);
      }
    }

    Some(output.join("\n"))
  }
}
