use serde::Deserialize;
use serde::Serialize;

/// A line and column position within a source file
///
/// Both are 1-based.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Location {
  pub line: usize,
  pub column: usize,
}

/// A range within a source file
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
  pub start: Location,
  pub end: Location,
}

impl SourceLocation {
  pub fn at(line: usize, column: usize) -> Self {
    SourceLocation {
      start: Location { line, column },
      end: Location { line, column },
    }
  }
}
