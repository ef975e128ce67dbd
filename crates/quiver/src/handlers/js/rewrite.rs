//! Source level edits that only touch code, never strings or comments

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::scanner::scan;
use super::scanner::Scan;
use crate::pipeline::HandlerError;

pub static REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?:^|[^.\w$])(?P<kw>require)\s*\(\s*['"](?P<spec>[^'"\n]+)['"]\s*\)"#)
    .expect("require regex should compile")
});

pub static DYNAMIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?:^|[^.\w$])(?P<kw>import)\s*\(\s*['"](?P<spec>[^'"\n]+)['"]\s*\)"#)
    .expect("dynamic import regex should compile")
});

/// Specifiers of `import … from`, `export … from` and bare `import '…'` statements
pub static STATIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r#"(?:^|[^.\w$])(?P<kw>import|export)(?:\s+[^;'"()]*?\bfrom\s*|\s*\*\s*from\s*|\s*\{[^;'"()]*?\}\s*from\s*|\s*)['"](?P<spec>[^'"\n]+)['"]"#,
  )
  .expect("static import regex should compile")
});

/// A call of `regex` in code, with the keyword offset and specifier
pub struct Call<'a> {
  pub keyword: usize,
  pub range: Range<usize>,
  pub specifier: &'a str,
}

/// Matches of a call pattern that start in code
pub fn calls<'a>(code: &'a str, scan: &Scan, regex: &Regex) -> Vec<Call<'a>> {
  regex
    .captures_iter(&scan.masked)
    .filter_map(|captures| {
      let keyword = captures.name("kw")?;
      let specifier = captures.name("spec")?;
      let whole = captures.get(0)?;

      scan.is_code(keyword.start()).then(|| Call {
        keyword: keyword.start(),
        range: keyword.start()..whole.end(),
        specifier: &code[specifier.range()],
      })
    })
    .collect()
}

/// Replaces every call matched by `regex`, leaving calls the closure returns `None` for
pub fn replace_calls(
  code: &str,
  regex: &Regex,
  mut replace: impl FnMut(&str) -> Option<String>,
) -> Result<String, HandlerError> {
  let scan = scan(code)?;
  let edits = calls(code, &scan, regex)
    .into_iter()
    .filter_map(|call| replace(call.specifier).map(|replacement| (call.range, replacement)))
    .collect();

  Ok(apply(code, edits))
}

/// Identifiers in code, skipping property names after a `.`
pub fn identifiers(code: &str, scan: &Scan) -> Vec<Range<usize>> {
  let bytes = code.as_bytes();
  let mut identifiers = Vec::new();
  let mut offset = 0;

  while offset < bytes.len() {
    let byte = bytes[offset];
    let starts_identifier = (byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$')
      && scan.is_code(offset)
      && (offset == 0 || !is_identifier_byte(bytes[offset - 1]));

    if !starts_identifier {
      offset += 1;
      continue;
    }

    let start = offset;
    while offset < bytes.len() && is_identifier_byte(bytes[offset]) {
      offset += 1;
    }

    let before = code[..start].trim_end();
    if !before.ends_with('.') || before.ends_with("...") {
      identifiers.push(start..offset);
    }
  }

  identifiers
}

fn is_identifier_byte(byte: u8) -> bool {
  byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

/// Applies non-overlapping edits
pub fn apply(code: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
  edits.sort_by_key(|(range, _)| range.start);

  let mut output = String::with_capacity(code.len());
  let mut last = 0;
  for (range, replacement) in edits {
    if range.start < last {
      continue;
    }

    output.push_str(&code[last..range.start]);
    output.push_str(&replacement);
    last = range.end;
  }

  output.push_str(&code[last..]);
  output
}

/// A JSON string literal, which is also a valid script string literal
pub fn quote(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn finds_calls_outside_strings_and_comments() {
    let code = "const a = require('./a');\n// require('./b')\nconst c = \"require('./c')\";\nfoo.require('./d');";
    let scan = scan(code).unwrap();

    let specifiers = calls(code, &scan, &REQUIRE_RE)
      .iter()
      .map(|call| call.specifier)
      .collect::<Vec<_>>();

    assert_eq!(specifiers, vec!["./a"]);
  }

  #[test]
  fn finds_static_imports() {
    let code = "import a from './a';\nimport { b,\n  c } from \"./b\";\nimport './c';\nexport * from './d';\nexport { e } from './e';\nimport * as f from './f';";
    let scan = scan(code).unwrap();

    let specifiers = calls(code, &scan, &STATIC_IMPORT_RE)
      .iter()
      .map(|call| call.specifier)
      .collect::<Vec<_>>();

    assert_eq!(specifiers, vec!["./a", "./b", "./c", "./d", "./e", "./f"]);
  }

  #[test]
  fn replaces_calls() {
    let code = "import('./a').then(run);";

    assert_eq!(
      replace_calls(code, &DYNAMIC_IMPORT_RE, |specifier| Some(format!(
        "require.load({})",
        quote(specifier)
      )))
      .unwrap(),
      "require.load(\"./a\").then(run);"
    );
  }

  #[test]
  fn lists_identifiers() {
    let code = "a.b + c(...d, 'e', 1e5)";
    let scan = scan(code).unwrap();

    let names = identifiers(code, &scan)
      .into_iter()
      .map(|range| &code[range])
      .collect::<Vec<_>>();

    assert_eq!(names, vec!["a", "c", "d"]);
  }
}
