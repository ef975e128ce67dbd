//! Just enough of a lexer to split scripts into top level statements and to tell code
//! apart from strings and comments.

use crate::handlers::location_at;
use crate::pipeline::HandlerError;

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
  Code,
  Str(char, usize),
  Template(usize),
  Regex(usize, bool),
  LineComment,
  BlockComment(usize),
}

#[derive(Debug, Default)]
pub struct Scan {
  /// The source with comments blanked out, byte offsets are unchanged
  pub masked: String,

  /// Whether each byte is code, rather than part of a string, regex or comment
  pub in_code: Vec<bool>,

  pub in_comment: Vec<bool>,

  /// Depth of enclosing braces at each byte
  pub braces: Vec<u32>,

  /// Innermost open bracket at each byte, `'\0'` at the top level
  pub enclosing: Vec<char>,

  /// Offsets of newlines outside any bracket, string or comment
  pub boundaries: Vec<usize>,
}

impl Scan {
  pub fn is_code(&self, offset: usize) -> bool {
    self.in_code.get(offset).copied().unwrap_or(false)
  }

  /// Whether the byte is part of a string, template or regex literal
  pub fn in_literal(&self, offset: usize) -> bool {
    !self.is_code(offset) && !self.in_comment.get(offset).copied().unwrap_or(false)
  }

  pub fn enclosing(&self, offset: usize) -> char {
    self.enclosing.get(offset).copied().unwrap_or_default()
  }

  pub fn brace_depth(&self, offset: usize) -> u32 {
    self.braces.get(offset).copied().unwrap_or(0)
  }

  /// Offset where the top level statement containing `offset` starts
  pub fn statement_start(&self, offset: usize) -> usize {
    let index = self.boundaries.partition_point(|boundary| *boundary < offset);
    match index {
      0 => 0,
      index => self.boundaries[index - 1] + 1,
    }
  }
}

pub fn scan(code: &str) -> Result<Scan, HandlerError> {
  let mut scan = Scan {
    masked: String::with_capacity(code.len()),
    in_code: Vec::with_capacity(code.len()),
    in_comment: Vec::with_capacity(code.len()),
    braces: Vec::with_capacity(code.len()),
    enclosing: Vec::with_capacity(code.len()),
    boundaries: Vec::new(),
  };

  let mut state = State::Code;
  let mut stack: Vec<(char, usize)> = Vec::new();
  let mut braces = 0;
  let mut previous_significant = None;
  let mut chars = code.char_indices().peekable();

  while let Some((offset, c)) = chars.next() {
    let next = chars.peek().map(|(_, next)| *next);

    match state {
      State::Code => match c {
        '/' if next == Some('/') => {
          state = State::LineComment;
          emit(&mut scan, c, false, true, braces, top(&stack));
          continue;
        }
        '/' if next == Some('*') => {
          state = State::BlockComment(offset);
          emit(&mut scan, c, false, true, braces, top(&stack));
          chars.next();
          emit(&mut scan, '*', false, true, braces, top(&stack));
          continue;
        }
        '/' if starts_regex(previous_significant) => {
          state = State::Regex(offset, false);
          emit(&mut scan, c, false, false, braces, top(&stack));
        }
        '\'' | '"' => {
          state = State::Str(c, offset);
          emit(&mut scan, c, false, false, braces, top(&stack));
        }
        '`' => {
          state = State::Template(offset);
          emit(&mut scan, c, false, false, braces, top(&stack));
        }
        '(' | '[' | '{' => {
          emit(&mut scan, c, true, false, braces, top(&stack));
          stack.push((c, offset));
          if c == '{' {
            braces += 1;
          }
        }
        ')' | ']' | '}' => {
          let expected = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
          };

          match stack.pop() {
            Some((open, _)) if open == expected => {}
            _ => {
              return Err(HandlerError::at(
                format!("Unexpected token '{c}'"),
                location_at(code, offset),
              ))
            }
          }

          if c == '}' {
            braces = braces.saturating_sub(1);
          }
          emit(&mut scan, c, true, false, braces, top(&stack));
        }
        '\n' => {
          if stack.is_empty() {
            scan.boundaries.push(offset);
          }
          emit(&mut scan, c, true, false, braces, top(&stack));
        }
        c => emit(&mut scan, c, true, false, braces, top(&stack)),
      },
      State::Str(quote, start) => {
        if c == '\n' {
          return Err(HandlerError::at(
            "Unterminated string constant",
            location_at(code, start),
          ));
        }

        emit(&mut scan, c, false, false, braces, top(&stack));
        if c == '\\' {
          if let Some((_, escaped)) = chars.next() {
            emit(&mut scan, escaped, false, false, braces, top(&stack));
          }
        } else if c == quote {
          state = State::Code;
        }
      }
      State::Template(_) => {
        emit(&mut scan, c, false, false, braces, top(&stack));
        if c == '\\' {
          if let Some((_, escaped)) = chars.next() {
            emit(&mut scan, escaped, false, false, braces, top(&stack));
          }
        } else if c == '`' {
          state = State::Code;
        }
      }
      State::Regex(start, in_class) => {
        if c == '\n' {
          return Err(HandlerError::at(
            "Unterminated regular expression",
            location_at(code, start),
          ));
        }

        emit(&mut scan, c, false, false, braces, top(&stack));
        match c {
          '\\' => {
            if let Some((_, escaped)) = chars.next() {
              emit(&mut scan, escaped, false, false, braces, top(&stack));
            }
          }
          '[' => state = State::Regex(start, true),
          ']' if in_class => state = State::Regex(start, false),
          '/' if !in_class => state = State::Code,
          _ => {}
        }
      }
      State::LineComment => {
        if c == '\n' {
          state = State::Code;
          if stack.is_empty() {
            scan.boundaries.push(offset);
          }
          emit(&mut scan, c, true, false, braces, top(&stack));
        } else {
          emit(&mut scan, c, false, true, braces, top(&stack));
        }
      }
      State::BlockComment(_) => {
        emit(&mut scan, c, false, true, braces, top(&stack));
        if c == '*' && next == Some('/') {
          chars.next();
          emit(&mut scan, '/', false, true, braces, top(&stack));
          state = State::Code;
          continue;
        }
      }
    }

    if state == State::Code && !c.is_whitespace() {
      previous_significant = Some(c);
    }
  }

  match state {
    State::Str(_, start) => Err(HandlerError::at(
      "Unterminated string constant",
      location_at(code, start),
    )),
    State::Template(start) => Err(HandlerError::at(
      "Unterminated template",
      location_at(code, start),
    )),
    State::BlockComment(start) => Err(HandlerError::at(
      "Unterminated comment",
      location_at(code, start),
    )),
    _ => match stack.last() {
      Some((open, offset)) => Err(HandlerError::at(
        format!("Unexpected end of input, '{open}' is never closed"),
        location_at(code, *offset),
      )),
      None => Ok(scan),
    },
  }
}

fn top(stack: &[(char, usize)]) -> char {
  stack.last().map(|(open, _)| *open).unwrap_or_default()
}

fn emit(scan: &mut Scan, c: char, is_code: bool, masked: bool, braces: u32, enclosing: char) {
  let width = c.len_utf8();
  if masked && c != '\n' {
    scan.masked.extend(std::iter::repeat(' ').take(width));
  } else {
    scan.masked.push(c);
  }
  scan.in_code.extend(std::iter::repeat(is_code).take(width));
  scan.in_comment.extend(std::iter::repeat(masked).take(width));
  scan.braces.extend(std::iter::repeat(braces).take(width));
  scan.enclosing.extend(std::iter::repeat(enclosing).take(width));
}

/// A slash starts a regular expression unless it follows something that ends an operand
fn starts_regex(previous: Option<char>) -> bool {
  match previous {
    None => true,
    Some(c) => !(c.is_alphanumeric() || matches!(c, '_' | '$' | ')' | ']' | '}' | '"' | '\'' | '`')),
  }
}

/// Splits a script into its top level statements
///
/// Lines that continue an expression, such as a chained `.then()`, stay with the statement
/// they continue. Blank lines between statements are dropped.
pub fn split_statements(code: &str, scan: &Scan) -> Vec<String> {
  let mut statements: Vec<String> = Vec::new();
  let mut start = 0;

  let ends = scan
    .boundaries
    .iter()
    .copied()
    .chain(std::iter::once(code.len()));

  for end in ends {
    let chunk = code[start.min(end)..end].trim_end();
    start = end + 1;

    if chunk.trim().is_empty() {
      continue;
    }

    match statements.last_mut() {
      Some(last) if continues(last, chunk) => {
        last.push('\n');
        last.push_str(chunk);
      }
      _ => statements.push(chunk.to_string()),
    }
  }

  statements
}

fn continues(previous: &str, line: &str) -> bool {
  let line = line.trim_start();
  let previous = previous.trim_end();

  [".", "?", ":", ",", "&&", "||"]
    .iter()
    .any(|operator| line.starts_with(operator))
    || ["=", ",", "&&", "||", "?", "+", "=>"]
      .iter()
      .any(|operator| previous.ends_with(operator))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn statements(code: &str) -> Vec<String> {
    split_statements(code, &scan(code).unwrap())
  }

  #[test]
  fn splits_top_level_statements() {
    assert_eq!(
      statements("import a from './a';\n\nfunction f() {\n  return a;\n}\nf();\n"),
      vec![
        "import a from './a';",
        "function f() {\n  return a;\n}",
        "f();"
      ]
    );
  }

  #[test]
  fn keeps_continued_expressions_together() {
    assert_eq!(
      statements("fetch(url)\n  .then(render);\nconst x =\n  1;"),
      vec!["fetch(url)\n  .then(render);", "const x =\n  1;"]
    );
  }

  #[test]
  fn ignores_brackets_in_strings_comments_and_regexes() {
    let code = "const a = '{';\n// }\n/* ( */\nconst b = /[}]/g;\nconst c = `${'('}`;";

    assert_eq!(statements(code).len(), 5);
  }

  #[test]
  fn masks_comments_and_marks_strings() {
    let code = "a(); // require('x')\nb('y');";
    let scan = scan(code).unwrap();

    assert!(!scan.masked.contains("require"));
    assert_eq!(scan.masked.len(), code.len());
    assert!(scan.is_code(0));
    assert!(!scan.is_code(code.find('y').unwrap()));
  }

  #[test]
  fn tracks_brace_depth() {
    let code = "if (a) {\n  require('b');\n}";
    let scan = scan(code).unwrap();

    assert_eq!(scan.brace_depth(code.find("require").unwrap()), 1);
    assert_eq!(scan.statement_start(code.find("require").unwrap()), 0);
  }

  #[test]
  fn reports_unbalanced_brackets() {
    let error = scan("function f() {\n  return 1;\n").unwrap_err();

    assert_eq!(error.loc.map(|loc| loc.start.line), Some(1));

    let error = scan("a = 1;\n)").unwrap_err();
    assert_eq!(error.message, "Unexpected token ')'");
  }
}
