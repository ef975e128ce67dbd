//! Prepares a module to share one scope with the rest of its bundle
//!
//! Top level names are renamed to be unique per module, `exports` becomes a per module
//! object and imports of bundled modules become `$quiver$require(id, specifier)`
//! placeholders, which the concatenating packager replaces once it knows where each
//! module ends up.

use std::collections::HashSet;

use quiver_core::types::JSONObject;
use serde_json::json;
use serde_json::Value;

use super::commonjs::first_line;
use super::rewrite::apply;
use super::rewrite::identifiers;
use super::rewrite::quote;
use super::rewrite::replace_calls;
use super::rewrite::DYNAMIC_IMPORT_RE;
use super::rewrite::REQUIRE_RE;
use super::scanner::scan;
use super::syntax::classify;
use super::syntax::declared_name;
use super::syntax::Binding;
use super::syntax::ExportFrom;
use super::syntax::ModuleStatement;
use crate::pipeline::HandlerError;

#[derive(Debug, Default, PartialEq)]
pub struct Hoisted {
  pub code: String,

  /// Local name to `[specifier, imported name]`
  pub imports: JSONObject,

  /// Exported name to the renamed local, or `[specifier, name]` for re-exports
  pub exports: JSONObject,

  /// Specifiers of `export *` statements
  pub wildcards: Vec<String>,

  pub is_es6_module: bool,
}

/// `$<id>$<kind>`, the name of a per module binding such as its exports object
pub fn module_identifier(id: &str, kind: &str) -> String {
  format!("${}${}", to_identifier(id), kind)
}

pub fn to_identifier(id: &str) -> String {
  id.chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

fn renamed(id: &str, name: &str) -> String {
  format!("${}$var${}", to_identifier(id), name)
}

pub fn hoist(
  id: &str,
  statements: &[String],
  is_dependency: &dyn Fn(&str) -> bool,
) -> Result<Hoisted, HandlerError> {
  let exports_name = module_identifier(id, "exports");
  let mut hoisted = Hoisted::default();
  let mut declared = HashSet::new();
  let mut body = Vec::with_capacity(statements.len());

  let require = |source: &str| {
    if is_dependency(source) {
      format!("$quiver$require({}, {})", quote(id), quote(source))
    } else {
      format!("require({})", quote(source))
    }
  };

  for statement in statements {
    let module_statement = classify(statement);
    if module_statement.is_module_syntax() {
      hoisted.is_es6_module = true;
    }

    match module_statement {
      ModuleStatement::Other => {
        if let Some(name) = declared_name(statement) {
          declared.insert(name);
        }
        body.push(statement.clone());
      }
      ModuleStatement::UnsupportedExport => {
        return Err(HandlerError {
          message: format!("Unsupported export syntax: {}", first_line(statement)),
          loc: None,
        })
      }
      ModuleStatement::Import { bindings, source } => {
        if bindings.is_empty() {
          body.push(format!("{};", require(&source)));
          continue;
        }

        let mut lines = Vec::with_capacity(bindings.len());
        for binding in bindings {
          let value = match &binding {
            Binding::Default(_) => format!("$quiver$interopDefault({})", require(&source)),
            Binding::Namespace(_) => require(&source),
            Binding::Named { imported, .. } => format!("{}.{imported}", require(&source)),
          };

          lines.push(format!("var {} = {value};", binding.local()));
          hoisted.imports.insert(
            binding.local().to_string(),
            json!([source, binding.imported()]),
          );
          declared.insert(binding.local().to_string());
        }
        body.push(lines.join("\n"));
      }
      ModuleStatement::ExportFrom { names, source } => match names {
        ExportFrom::All => {
          body.push(format!(
            "$quiver$exportWildcard({exports_name}, {});",
            require(&source)
          ));
          hoisted.wildcards.push(source);
        }
        ExportFrom::Namespace(name) => {
          body.push(format!("{exports_name}.{name} = {};", require(&source)));
          hoisted.exports.insert(name, json!([source, "*"]));
        }
        ExportFrom::Named(pairs) => {
          let lines = pairs
            .iter()
            .map(|(imported, exported)| {
              format!("{exports_name}.{exported} = {}.{imported};", require(&source))
            })
            .collect::<Vec<_>>();
          body.push(lines.join("\n"));

          for (imported, exported) in pairs {
            hoisted
              .exports
              .insert(exported, json!([source, imported]));
          }
        }
      },
      ModuleStatement::ExportDefault {
        expression,
        declared: Some(name),
      } => {
        body.push(format!("{expression}\n{exports_name}.default = {name};"));
        hoisted
          .exports
          .insert(String::from("default"), Value::String(name.clone()));
        declared.insert(name);
      }
      ModuleStatement::ExportDefault {
        expression,
        declared: None,
      } => {
        body.push(format!("{exports_name}.default = {expression}"));
        hoisted.exports.insert(
          String::from("default"),
          Value::String(format!("{exports_name}.default")),
        );
      }
      ModuleStatement::ExportDeclaration { declaration, name } => {
        body.push(format!("{declaration}\n{exports_name}.{name} = {name};"));
        hoisted
          .exports
          .insert(name.clone(), Value::String(name.clone()));
        declared.insert(name);
      }
      ModuleStatement::ExportList(pairs) => {
        let lines = pairs
          .iter()
          .map(|(local, exported)| format!("{exports_name}.{exported} = {local};"))
          .collect::<Vec<_>>();
        body.push(lines.join("\n"));

        for (local, exported) in pairs {
          hoisted.exports.insert(exported, Value::String(local));
        }
      }
    }
  }

  let code = body.join("\n");

  let code = replace_calls(&code, &REQUIRE_RE, |source| {
    if !is_dependency(source) {
      return None;
    }

    hoisted
      .imports
      .insert(format!("$require${source}"), json!([source, "*"]));
    Some(require(source))
  })?;

  let code = replace_calls(&code, &DYNAMIC_IMPORT_RE, |source| {
    is_dependency(source)
      .then(|| format!("$quiver$import({}, {})", quote(id), quote(source)))
  })?;

  let code = rename_top_level(id, &code, &declared, &exports_name)?;

  for value in hoisted.exports.values_mut() {
    if let Value::String(local) = value {
      if declared.contains(local.as_str()) {
        *local = renamed(id, local);
      }
    }
  }

  let mut header = vec![format!("var {exports_name} = {{}};")];
  if hoisted.is_es6_module {
    header.push(format!("{exports_name}.__esModule = true;"));
  }

  hoisted.code = header
    .into_iter()
    .chain((!code.is_empty()).then_some(code))
    .collect::<Vec<_>>()
    .join("\n");

  Ok(hoisted)
}

/// Renames declared top level names and points `exports` and `module.exports` at the module's
/// exports object
fn rename_top_level(
  id: &str,
  code: &str,
  declared: &HashSet<String>,
  exports_name: &str,
) -> Result<String, HandlerError> {
  let scan = scan(code)?;
  let mut edits = Vec::new();

  for range in identifiers(code, &scan) {
    let name = &code[range.clone()];
    let before = code[..range.start].trim_end();
    let after = code[range.end..].trim_start();

    if name == "module" && after.starts_with('.') {
      let rest = after[1..].trim_start();
      if rest.starts_with("exports") && !rest[7..].starts_with(|c: char| is_identifier_char(c)) {
        let end = code.len() - rest.len() + "exports".len();
        edits.push((range.start..end, exports_name.to_string()));
      }
      continue;
    }

    let target = match name {
      "exports" => exports_name.to_string(),
      name if declared.contains(name) => renamed(id, name),
      _ => continue,
    };

    let in_object = scan.enclosing(range.start) == '{' && (before.ends_with('{') || before.ends_with(','));
    if in_object && after.starts_with(':') {
      continue;
    }

    if in_object && (after.starts_with('}') || after.starts_with(',')) && name != "exports" {
      edits.push((range, format!("{name}: {target}")));
      continue;
    }

    edits.push((range, target));
  }

  Ok(apply(code, edits))
}

fn is_identifier_char(c: char) -> bool {
  c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn hoisted(id: &str, code: &[&str]) -> Hoisted {
    let statements = code.iter().map(|line| line.to_string()).collect::<Vec<_>>();
    hoist(id, &statements, &|specifier| specifier.starts_with('.')).unwrap()
  }

  #[test]
  fn makes_identifiers_from_ids() {
    assert_eq!(module_identifier("src/a-b.js", "exports"), "$src_a_b_js$exports");
    assert_eq!(module_identifier("Xy1z", "init"), "$Xy1z$init");
  }

  #[test]
  fn renames_top_level_names() {
    let result = hoisted(
      "a.js",
      &[
        "const value = 1;",
        "function read() {\n  return { value, other: value };\n}",
        "module.exports = read;",
      ],
    );

    assert_eq!(
      result.code,
      [
        "var $a_js$exports = {};",
        "const $a_js$var$value = 1;",
        "function $a_js$var$read() {\n  return { value: $a_js$var$value, other: $a_js$var$value };\n}",
        "$a_js$exports = $a_js$var$read;",
      ]
      .join("\n")
    );
    assert!(!result.is_es6_module);
  }

  #[test]
  fn records_imports_and_exports() {
    let result = hoisted(
      "a.js",
      &[
        "import b, { c as d } from './b';",
        "import * as e from './e';",
        "export const f = b + d;",
        "export { g } from './g';",
        "export * from './h';",
      ],
    );

    assert!(result.is_es6_module);
    assert_eq!(
      Value::Object(result.imports),
      json!({
        "b": ["./b", "default"],
        "d": ["./b", "c"],
        "e": ["./e", "*"],
      })
    );
    assert_eq!(
      Value::Object(result.exports),
      json!({
        "f": "$a_js$var$f",
        "g": ["./g", "g"],
      })
    );
    assert_eq!(result.wildcards, vec![String::from("./h")]);

    assert!(result.code.contains(
      "var $a_js$var$b = $quiver$interopDefault($quiver$require(\"a.js\", \"./b\"));"
    ));
    assert!(result
      .code
      .contains("var $a_js$var$d = $quiver$require(\"a.js\", \"./b\").c;"));
    assert!(result
      .code
      .contains("$a_js$exports.f = $a_js$var$f;"));
    assert!(result.code.contains(
      "$quiver$exportWildcard($a_js$exports, $quiver$require(\"a.js\", \"./h\"));"
    ));
  }

  #[test]
  fn rewrites_requires_of_dependencies_only() {
    let result = hoisted(
      "a.js",
      &[
        "var fs = require('fs');",
        "var b = require('./b');",
        "import('./lazy');",
      ],
    );

    assert_eq!(
      result.code,
      [
        "var $a_js$exports = {};",
        "var $a_js$var$fs = require('fs');",
        "var $a_js$var$b = $quiver$require(\"a.js\", \"./b\");",
        "$quiver$import(\"a.js\", \"./lazy\");",
      ]
      .join("\n")
    );
    assert_eq!(
      Value::Object(result.imports),
      json!({ "$require$./b": ["./b", "*"] })
    );
  }

  #[test]
  fn leaves_properties_and_strings_alone() {
    let result = hoisted("a.js", &["var x = 1;", "obj.x = 'x';", "exports.y = x;"]);

    assert_eq!(
      result.code,
      [
        "var $a_js$exports = {};",
        "var $a_js$var$x = 1;",
        "obj.x = 'x';",
        "$a_js$exports.y = $a_js$var$x;",
      ]
      .join("\n")
    );
  }
}
