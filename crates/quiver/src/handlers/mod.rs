//! The builtin asset handlers
use quiver_core::types::SourceLocation;

pub use self::css::*;
pub use self::glob::*;
pub use self::js::*;
pub use self::json::*;
pub use self::raw::*;

mod css;
mod glob;
pub(crate) mod js;
mod json;
mod raw;

/// Joins a public url and a bundle path with exactly one slash between them
pub fn url_join(public_url: &str, path: &str) -> String {
  format!(
    "{}/{}",
    public_url.trim_end_matches('/'),
    path.trim_start_matches("./").trim_start_matches('/')
  )
}

/// 1-based line and column of a byte offset
pub(crate) fn location_at(code: &str, offset: usize) -> SourceLocation {
  let before = &code[..offset.min(code.len())];
  let line = before.matches('\n').count() + 1;
  let column = before
    .rfind('\n')
    .map(|newline| before.len() - newline)
    .unwrap_or(before.len() + 1);

  SourceLocation::at(line, column)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn joins_urls() {
    assert_eq!(url_join("/", "a.js"), "/a.js");
    assert_eq!(url_join("/dist/", "./a.js"), "/dist/a.js");
    assert_eq!(url_join("https://cdn.example.com", "a.js"), "https://cdn.example.com/a.js");
  }

  #[test]
  fn locates_offsets() {
    let code = "a\nbc\nd";

    assert_eq!(location_at(code, 0), SourceLocation::at(1, 1));
    assert_eq!(location_at(code, 3), SourceLocation::at(2, 2));
    assert_eq!(location_at(code, 5), SourceLocation::at(3, 1));
  }
}
