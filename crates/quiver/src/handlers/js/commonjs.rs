//! Module syntax to CommonJS, for bundles packaged as a module registry

use super::rewrite::quote;
use super::syntax::classify;
use super::syntax::Binding;
use super::syntax::ExportFrom;
use super::syntax::ModuleStatement;
use crate::pipeline::HandlerError;

const ES_MODULE_FLAG: &str = "Object.defineProperty(exports, \"__esModule\", { value: true });";

const INTEROP_DEFAULT: &str =
  "function _interopDefault(e) { return e && e.__esModule ? e.default : e; }";

/// Rewrites `import` and `export` statements into `require` calls and `exports` assignments
///
/// Returns `None` when the statements contain no module syntax.
pub fn to_commonjs(statements: &[String]) -> Result<Option<Vec<String>>, HandlerError> {
  let mut output = Vec::with_capacity(statements.len() + 2);
  let mut is_es6_module = false;
  let mut needs_interop = false;
  let mut modules = 0;

  let mut module_name = || {
    let name = format!("_dep{modules}");
    modules += 1;
    name
  };

  for statement in statements {
    let module_statement = classify(statement);
    if module_statement.is_module_syntax() {
      is_es6_module = true;
    }

    match module_statement {
      ModuleStatement::Other => output.push(statement.clone()),
      ModuleStatement::UnsupportedExport => {
        return Err(HandlerError {
          message: format!("Unsupported export syntax: {}", first_line(statement)),
          loc: None,
        })
      }
      ModuleStatement::Import { bindings, source } if bindings.is_empty() => {
        output.push(format!("require({});", quote(&source)));
      }
      ModuleStatement::Import { bindings, source } => {
        let module = module_name();
        let mut lines = vec![format!("var {module} = require({});", quote(&source))];
        for binding in bindings {
          lines.push(match binding {
            Binding::Default(local) => {
              needs_interop = true;
              format!("var {local} = _interopDefault({module});")
            }
            Binding::Namespace(local) => format!("var {local} = {module};"),
            Binding::Named { local, imported } => format!("var {local} = {module}.{imported};"),
          });
        }
        output.push(lines.join("\n"));
      }
      ModuleStatement::ExportFrom { names, source } => output.push(match names {
        ExportFrom::All => {
          let module = module_name();
          format!(
            "var {module} = require({});\nObject.keys({module}).forEach(function (key) {{\n  if (key !== \"default\" && key !== \"__esModule\") exports[key] = {module}[key];\n}});",
            quote(&source)
          )
        }
        ExportFrom::Namespace(name) => format!("exports.{name} = require({});", quote(&source)),
        ExportFrom::Named(pairs) => {
          let module = module_name();
          let mut lines = vec![format!("var {module} = require({});", quote(&source))];
          for (imported, exported) in pairs {
            lines.push(format!("exports.{exported} = {module}.{imported};"));
          }
          lines.join("\n")
        }
      }),
      ModuleStatement::ExportDefault {
        expression,
        declared: Some(name),
      } => output.push(format!("{expression}\nexports.default = {name};")),
      ModuleStatement::ExportDefault {
        expression,
        declared: None,
      } => output.push(format!("exports.default = {expression}")),
      ModuleStatement::ExportDeclaration { declaration, name } => {
        output.push(format!("{declaration}\nexports.{name} = {name};"));
      }
      ModuleStatement::ExportList(pairs) => output.push(
        pairs
          .iter()
          .map(|(local, exported)| format!("exports.{exported} = {local};"))
          .collect::<Vec<_>>()
          .join("\n"),
      ),
    }
  }

  if !is_es6_module {
    return Ok(None);
  }

  let mut prelude = vec![ES_MODULE_FLAG.to_string()];
  if needs_interop {
    prelude.push(INTEROP_DEFAULT.to_string());
  }

  Ok(Some(prelude.into_iter().chain(output).collect()))
}

pub(super) fn first_line(statement: &str) -> &str {
  statement.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn convert(code: &[&str]) -> Option<String> {
    to_commonjs(&code.iter().map(|line| line.to_string()).collect::<Vec<_>>())
      .unwrap()
      .map(|lines| lines.join("\n"))
  }

  #[test]
  fn leaves_commonjs_alone() {
    assert_eq!(convert(&["const a = require('./a');", "module.exports = a;"]), None);
  }

  #[test]
  fn converts_imports_and_exports() {
    assert_eq!(
      convert(&[
        "import b, { c as d } from './b';",
        "export const e = b(d);",
        "export default e;",
      ])
      .unwrap(),
      [
        ES_MODULE_FLAG,
        INTEROP_DEFAULT,
        "var _dep0 = require(\"./b\");",
        "var b = _interopDefault(_dep0);",
        "var d = _dep0.c;",
        "const e = b(d);",
        "exports.e = e;",
        "exports.default = e;",
      ]
      .join("\n")
    );
  }

  #[test]
  fn converts_reexports() {
    assert_eq!(
      convert(&["export { a as b } from './a';", "export * as ns from './ns';"]).unwrap(),
      [
        ES_MODULE_FLAG,
        "var _dep0 = require(\"./a\");",
        "exports.b = _dep0.a;",
        "exports.ns = require(\"./ns\");",
      ]
      .join("\n")
    );
  }

  #[test]
  fn rejects_unsupported_exports() {
    let statements = vec![String::from("export const { a } = b;")];

    assert!(to_commonjs(&statements).is_err());
  }
}
