//! Recognizes the module level `import` and `export` statement forms

use std::sync::LazyLock;

use regex::Regex;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?s)^\s*import\s+([^'"]+?)\s*from\s*['"]([^'"]*)['"]\s*;?\s*$"#)
    .expect("import regex should compile")
});

static BARE_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?s)^\s*import\s*['"]([^'"]*)['"]\s*;?\s*$"#)
    .expect("bare import regex should compile")
});

static EXPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r#"(?s)^\s*export\s*(\*(?:\s*as\s+([\w$]+))?|\{[^}]*\})\s*from\s*['"]([^'"]*)['"]\s*;?\s*$"#,
  )
  .expect("export from regex should compile")
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?s)^\s*export\s*\{([^}]*)\}\s*;?\s*$").expect("export list regex should compile")
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?s)^\s*export\s+default\s+(.*)$").expect("export default regex should compile")
});

static EXPORT_DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?s)^\s*export\s+(.*)$").expect("export declaration regex should compile")
});

static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*(?:(?:var|let|const)\s+|(?:async\s+)?function\s*\*?\s*|class\s+)([\w$]+)")
    .expect("declaration regex should compile")
});

#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
  Default(String),
  Namespace(String),
  Named { local: String, imported: String },
}

impl Binding {
  pub fn local(&self) -> &str {
    match self {
      Binding::Default(local) | Binding::Namespace(local) => local,
      Binding::Named { local, .. } => local,
    }
  }

  /// The export name the binding reads, `*` for namespaces
  pub fn imported(&self) -> &str {
    match self {
      Binding::Default(_) => "default",
      Binding::Namespace(_) => "*",
      Binding::Named { imported, .. } => imported,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExportFrom {
  All,
  Namespace(String),

  /// `(imported, exported)` pairs
  Named(Vec<(String, String)>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModuleStatement {
  Import {
    bindings: Vec<Binding>,
    source: String,
  },
  ExportFrom {
    names: ExportFrom,
    source: String,
  },
  ExportDefault {
    expression: String,
    /// Name of a declared function or class
    declared: Option<String>,
  },
  ExportDeclaration {
    declaration: String,
    name: String,
  },
  /// `(local, exported)` pairs
  ExportList(Vec<(String, String)>),

  /// An `export` this scanner does not understand, such as destructuring
  UnsupportedExport,

  Other,
}

impl ModuleStatement {
  pub fn is_module_syntax(&self) -> bool {
    !matches!(self, ModuleStatement::Other)
  }
}

pub fn classify(statement: &str) -> ModuleStatement {
  let trimmed = statement.trim_start();
  if !trimmed.starts_with("import") && !trimmed.starts_with("export") {
    return ModuleStatement::Other;
  }

  if let Some(captures) = BARE_IMPORT_RE.captures(statement) {
    return ModuleStatement::Import {
      bindings: Vec::new(),
      source: captures[1].to_string(),
    };
  }

  if let Some(captures) = IMPORT_RE.captures(statement) {
    return ModuleStatement::Import {
      bindings: parse_import_clause(&captures[1]),
      source: captures[2].to_string(),
    };
  }

  if let Some(captures) = EXPORT_FROM_RE.captures(statement) {
    let names = match (captures.get(1), captures.get(2)) {
      (_, Some(namespace)) => ExportFrom::Namespace(namespace.as_str().to_string()),
      (Some(clause), None) if clause.as_str().starts_with('{') => ExportFrom::Named(
        parse_specifiers(clause.as_str().trim_matches(['{', '}'])),
      ),
      _ => ExportFrom::All,
    };

    return ModuleStatement::ExportFrom {
      names,
      source: captures[3].to_string(),
    };
  }

  if let Some(captures) = EXPORT_LIST_RE.captures(statement) {
    return ModuleStatement::ExportList(parse_specifiers(&captures[1]));
  }

  if let Some(captures) = EXPORT_DEFAULT_RE.captures(statement) {
    let expression = captures[1].to_string();
    return ModuleStatement::ExportDefault {
      declared: declared_name(&expression).filter(|_| {
        let expression = expression.trim_start();
        expression.starts_with("function")
          || expression.starts_with("async")
          || expression.starts_with("class")
      }),
      expression,
    };
  }

  if let Some(captures) = EXPORT_DECLARATION_RE.captures(statement) {
    let declaration = captures[1].to_string();
    return match declared_name(&declaration) {
      Some(name) => ModuleStatement::ExportDeclaration { declaration, name },
      None => ModuleStatement::UnsupportedExport,
    };
  }

  // `import(...)` and identifiers such as `imported` start the same way
  ModuleStatement::Other
}

/// Name introduced by a `var`, `let`, `const`, `function` or `class` statement
pub fn declared_name(statement: &str) -> Option<String> {
  DECLARATION_RE
    .captures(statement)
    .map(|captures| captures[1].to_string())
    .filter(|name| name != "extends")
}

fn parse_import_clause(clause: &str) -> Vec<Binding> {
  let (head, named) = match clause.find('{') {
    Some(start) => {
      let end = clause[start..]
        .find('}')
        .map(|end| start + end)
        .unwrap_or(clause.len());
      (&clause[..start], Some(&clause[start + 1..end]))
    }
    None => (clause, None),
  };

  let mut bindings = Vec::new();
  for part in head.split(',').map(str::trim).filter(|part| !part.is_empty()) {
    match part.strip_prefix('*') {
      Some(namespace) => bindings.push(Binding::Namespace(
        namespace.trim().trim_start_matches("as").trim().to_string(),
      )),
      None => bindings.push(Binding::Default(part.to_string())),
    }
  }

  if let Some(named) = named {
    for (imported, local) in parse_specifiers(named) {
      bindings.push(Binding::Named { local, imported });
    }
  }

  bindings
}

/// Parses `a, b as c` into `(a, a)` and `(b, c)`
fn parse_specifiers(specifiers: &str) -> Vec<(String, String)> {
  specifiers
    .split(',')
    .map(str::trim)
    .filter(|specifier| !specifier.is_empty())
    .map(|specifier| {
      let mut parts = specifier.split_whitespace();
      let first = parts.next().unwrap_or_default().to_string();
      match (parts.next(), parts.next()) {
        (Some("as"), Some(second)) => (first, second.to_string()),
        _ => (first.clone(), first),
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn classifies_imports() {
    assert_eq!(
      classify("import React, { useState as state, useMemo } from 'react';"),
      ModuleStatement::Import {
        bindings: vec![
          Binding::Default(String::from("React")),
          Binding::Named {
            local: String::from("state"),
            imported: String::from("useState")
          },
          Binding::Named {
            local: String::from("useMemo"),
            imported: String::from("useMemo")
          },
        ],
        source: String::from("react"),
      }
    );

    assert_eq!(
      classify("import * as utils from \"./utils\""),
      ModuleStatement::Import {
        bindings: vec![Binding::Namespace(String::from("utils"))],
        source: String::from("./utils"),
      }
    );

    assert_eq!(
      classify("import './polyfill';"),
      ModuleStatement::Import {
        bindings: Vec::new(),
        source: String::from("./polyfill"),
      }
    );
  }

  #[test]
  fn classifies_exports() {
    assert_eq!(
      classify("export * from './a';"),
      ModuleStatement::ExportFrom {
        names: ExportFrom::All,
        source: String::from("./a"),
      }
    );
    assert_eq!(
      classify("export { a as b, c } from './a';"),
      ModuleStatement::ExportFrom {
        names: ExportFrom::Named(vec![
          (String::from("a"), String::from("b")),
          (String::from("c"), String::from("c")),
        ]),
        source: String::from("./a"),
      }
    );
    assert_eq!(
      classify("export { x, y as z };"),
      ModuleStatement::ExportList(vec![
        (String::from("x"), String::from("x")),
        (String::from("y"), String::from("z")),
      ])
    );
    assert_eq!(
      classify("export default function App() {\n  return 1;\n}"),
      ModuleStatement::ExportDefault {
        expression: String::from("function App() {\n  return 1;\n}"),
        declared: Some(String::from("App")),
      }
    );
    assert_eq!(
      classify("export default a + b;"),
      ModuleStatement::ExportDefault {
        expression: String::from("a + b;"),
        declared: None,
      }
    );
    assert_eq!(
      classify("export const answer = 42;"),
      ModuleStatement::ExportDeclaration {
        declaration: String::from("const answer = 42;"),
        name: String::from("answer"),
      }
    );
    assert_eq!(
      classify("export const { a } = b;"),
      ModuleStatement::UnsupportedExport
    );
  }

  #[test]
  fn ignores_other_statements() {
    assert_eq!(classify("import('./lazy').then(run);"), ModuleStatement::Other);
    assert_eq!(classify("imported = 1;"), ModuleStatement::Other);
    assert_eq!(classify("console.log(1);"), ModuleStatement::Other);
  }
}
