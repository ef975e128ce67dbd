use std::path::Path;
use std::sync::LazyLock;

use quiver_core::types::BuildTarget;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::Rendition;
use quiver_core::types::RenditionValue;
use regex::Regex;
use serde_json::json;
use serde_json::Value;

pub use self::hoist::module_identifier;
pub use self::hoist::to_identifier;
use self::rewrite::calls;
pub(crate) use self::rewrite::quote;
use self::rewrite::replace_calls;
use self::rewrite::DYNAMIC_IMPORT_RE;
use self::rewrite::REQUIRE_RE;
use self::rewrite::STATIC_IMPORT_RE;
pub(crate) use self::scanner::scan;
pub(crate) use self::scanner::split_statements;
pub(crate) use self::scanner::Scan;
pub(crate) use self::syntax::declared_name;
use super::location_at;
use crate::pipeline::Asset;
use crate::pipeline::AssetHandler;
use crate::pipeline::Ast;
use crate::pipeline::Generation;
use crate::pipeline::PipelineContext;

mod commonjs;
mod hoist;
mod rewrite;
mod scanner;
mod syntax;

static MIGHT_HAVE_DEPENDENCIES_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(?:import\b|export\b|require\s*\()")
    .expect("dependency detection regex should compile")
});

const CONTROL_KEYWORDS: [&str; 7] = ["if", "for", "while", "switch", "try", "do", "else"];

const NODE_BUILTINS: [&str; 32] = [
  "assert",
  "buffer",
  "child_process",
  "cluster",
  "console",
  "constants",
  "crypto",
  "dgram",
  "dns",
  "domain",
  "events",
  "fs",
  "http",
  "https",
  "module",
  "net",
  "os",
  "path",
  "process",
  "punycode",
  "querystring",
  "readline",
  "repl",
  "stream",
  "string_decoder",
  "timers",
  "tls",
  "tty",
  "url",
  "util",
  "vm",
  "zlib",
];

/// Scripts
///
/// Module syntax is converted to CommonJS for the module registry packager, or prepared for
/// concatenation when scope hoisting. Scripts are otherwise left as written.
#[derive(Debug)]
pub struct JsHandler;

impl AssetHandler for JsHandler {
  fn name(&self) -> &'static str {
    "js"
  }

  fn asset_type(&self, _path: &Path) -> Option<FileType> {
    Some(FileType::Js)
  }

  fn might_have_dependencies(&self, asset: &Asset) -> bool {
    MIGHT_HAVE_DEPENDENCIES_RE.is_match(asset.code())
  }

  fn parse(&self, asset: &Asset, _ctx: &PipelineContext) -> anyhow::Result<Option<Ast>> {
    let code = asset.code();
    let scan = scan(code)?;

    Ok(Some(Ast::Statements(split_statements(code, &scan))))
  }

  #[tracing::instrument(level = "trace", skip_all, fields(asset = %asset.relative_name))]
  fn collect_dependencies(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<()> {
    let code = asset.code().to_string();
    let scan = scan(&code)?;

    let mut found = Vec::new();
    for call in calls(&code, &scan, &STATIC_IMPORT_RE) {
      found.push((call.keyword, call.specifier, false, false));
    }
    for call in calls(&code, &scan, &REQUIRE_RE) {
      let should_wrap = is_conditional(&code, &scan, call.keyword);
      found.push((call.keyword, call.specifier, false, should_wrap));
    }
    for call in calls(&code, &scan, &DYNAMIC_IMPORT_RE) {
      found.push((call.keyword, call.specifier, true, false));
    }
    found.sort_by_key(|(offset, ..)| *offset);

    let is_node = ctx.options.build.target == BuildTarget::Node;
    for (offset, specifier, dynamic, should_wrap) in found {
      if is_node && NODE_BUILTINS.contains(&specifier) {
        continue;
      }

      let dependency = match asset.dependencies.get_mut(specifier) {
        Some(existing) => {
          existing.dynamic &= dynamic;
          existing.should_wrap |= should_wrap;
          continue;
        }
        None => Dependency {
          dynamic,
          should_wrap,
          loc: Some(location_at(&code, offset)),
          ..Dependency::new(specifier)
        },
      };

      asset.add_dependency(dependency);
    }

    Ok(())
  }

  #[tracing::instrument(level = "trace", skip_all, fields(asset = %asset.relative_name))]
  fn transform(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<()> {
    let original = asset.code().to_string();
    if original.trim().is_empty() {
      return Ok(());
    }

    let statements = match asset.ast.take() {
      Some(Ast::Statements(statements)) => statements,
      _ => split_statements(&original, &scan(&original)?),
    };

    let code = if ctx.options.build.scope_hoist {
      let dependencies = &asset.dependencies;
      let hoisted = hoist::hoist(&asset.id, &statements, &|specifier| {
        dependencies.get(specifier).is_some()
      })?;

      let side_effects = asset
        .package(ctx)?
        .map(|package| package.side_effects())
        .unwrap_or(true);

      asset
        .cache_data
        .insert(String::from("imports"), Value::Object(hoisted.imports));
      asset
        .cache_data
        .insert(String::from("exports"), Value::Object(hoisted.exports));
      asset
        .cache_data
        .insert(String::from("wildcards"), json!(hoisted.wildcards));
      asset
        .cache_data
        .insert(String::from("isES6Module"), json!(hoisted.is_es6_module));
      asset
        .cache_data
        .insert(String::from("sideEffects"), json!(side_effects));

      hoisted.code
    } else {
      let converted = commonjs::to_commonjs(&statements)?;
      asset
        .cache_data
        .insert(String::from("isES6Module"), json!(converted.is_some()));

      let code = match converted {
        Some(lines) => lines.join("\n"),
        None => original.clone(),
      };

      replace_calls(&code, &DYNAMIC_IMPORT_RE, |specifier| {
        Some(format!("require.load({})", quote(specifier)))
      })?
    };

    let code = if ctx.options.build.minify {
      minify(&code, &scan(&code)?)
    } else {
      code
    };

    if ctx.options.build.source_maps && !asset.is_warm_up && asset.rendition.is_none() {
      asset.source_map = Some(identity_map(&asset.relative_name, &original, &code));
    }

    asset.contents = Some(code);
    Ok(())
  }

  fn generate(&self, asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<Generation> {
    let mut renditions = vec![Rendition::new(FileType::Js, asset.code())];
    if let Some(map) = asset.source_map.take() {
      renditions.push(Rendition::new(FileType::Map, RenditionValue::Json(map)));
    }

    Ok(Generation::Renditions(renditions))
  }
}

/// Whether a `require` at `offset` only runs conditionally, inside a block or behind a control
/// statement
fn is_conditional(code: &str, scan: &Scan, offset: usize) -> bool {
  if scan.brace_depth(offset) > 0 {
    return true;
  }

  let statement = code[scan.statement_start(offset)..].trim_start();
  CONTROL_KEYWORDS.iter().any(|keyword| {
    statement.starts_with(keyword)
      && !statement[keyword.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$')
  })
}

/// Drops comments, blank lines and indentation, leaving literals untouched
fn minify(code: &str, scan: &Scan) -> String {
  let mut lines = Vec::new();
  let mut start = 0;

  for line in scan.masked.split('\n') {
    let end = start + line.len();
    let keeps_start = start < code.len() && scan.in_literal(start);
    let keeps_end = end > start && scan.in_literal(end - 1);
    start = end + 1;

    let line = match (keeps_start, keeps_end) {
      (true, true) => line,
      (true, false) => line.trim_end(),
      (false, true) => line.trim_start(),
      (false, false) => line.trim(),
    };

    if !line.is_empty() || keeps_start {
      lines.push(line);
    }
  }

  lines.join("\n")
}

/// A source map from each line of the output to the same line of the source
fn identity_map(source_name: &str, original: &str, code: &str) -> Value {
  let source_lines = original.lines().count();
  let mappings = (0..code.lines().count())
    .map(|line| match line {
      0 => "AAAA",
      line if line < source_lines => "AACA",
      _ => "",
    })
    .collect::<Vec<_>>()
    .join(";");

  json!({
    "version": 3,
    "sources": [source_name],
    "names": [],
    "mappings": mappings,
    "sourcesContent": [original],
  })
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use quiver_core::types::BuildOptions;
  use quiver_core::types::ProcessedAsset;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;
  use quiver_filesystem::FileSystemRef;

  use super::*;
  use crate::pipeline::HandlerRegistry;
  use crate::pipeline::Pipeline;
  use crate::pipeline::PipelineOptions;
  use crate::resolver::NodeResolver;

  fn process(files: &[(&str, &str)], build: BuildOptions) -> ProcessedAsset {
    let fs = Arc::new(InMemoryFileSystem::default());
    for (path, contents) in files {
      fs.write_file(Path::new(path), contents.to_string());
    }

    let fs: FileSystemRef = fs;
    let pipeline = Pipeline::new(PipelineContext {
      registry: Arc::new(HandlerRegistry::new(&build.extensions).unwrap()),
      options: Arc::new(PipelineOptions {
        build,
        root_dir: PathBuf::from("/app"),
        entry_files: vec![PathBuf::from("/app/a.js")],
      }),
      resolver: Arc::new(NodeResolver::new(fs.clone(), PathBuf::from("/app"))),
      fs,
    });

    pipeline.process(Path::new(files[0].0), false).unwrap()
  }

  fn development() -> BuildOptions {
    BuildOptions {
      source_maps: false,
      ..BuildOptions::default()
    }
  }

  fn names(processed: &ProcessedAsset) -> Vec<&str> {
    processed
      .dependencies
      .iter()
      .map(|dependency| dependency.name.as_str())
      .collect()
  }

  #[test]
  fn collects_dependencies_in_source_order() {
    let processed = process(
      &[(
        "/app/a.js",
        "import b from './b';\nconst c = require('./c');\n// require('./ignored')\nexport * from './d';\nimport('./e').then(run);",
      )],
      development(),
    );

    assert_eq!(names(&processed), vec!["./b", "./c", "./d", "./e"]);
    assert!(processed.dependencies.get("./e").unwrap().dynamic);
    assert!(!processed.dependencies.get("./b").unwrap().dynamic);
    assert_eq!(
      processed
        .dependencies
        .get("./c")
        .and_then(|dependency| dependency.loc.as_ref())
        .map(|loc| (loc.start.line, loc.start.column)),
      Some((2, 11))
    );
  }

  #[test]
  fn static_imports_win_over_dynamic_ones() {
    let processed = process(
      &[("/app/a.js", "import('./b');\nimport b from './b';")],
      development(),
    );

    assert!(!processed.dependencies.get("./b").unwrap().dynamic);
  }

  #[test]
  fn conditional_requires_are_wrapped() {
    let processed = process(
      &[(
        "/app/a.js",
        "if (debug) require('./debug');\nfunction f() {\n  return require('./lazy');\n}\nrequire('./eager');",
      )],
      development(),
    );

    let should_wrap = |name: &str| processed.dependencies.get(name).unwrap().should_wrap;
    assert!(should_wrap("./debug"));
    assert!(should_wrap("./lazy"));
    assert!(!should_wrap("./eager"));
  }

  #[test]
  fn node_builtins_are_not_bundled_for_node() {
    let source = "const fs = require('fs');\nconst b = require('./b');";

    let browser = process(&[("/app/a.js", source)], development());
    assert_eq!(names(&browser), vec!["fs", "./b"]);

    let node = process(
      &[("/app/a.js", source)],
      BuildOptions {
        target: BuildTarget::Node,
        ..development()
      },
    );
    assert_eq!(names(&node), vec!["./b"]);
  }

  #[test]
  fn converts_module_syntax_to_commonjs() {
    let processed = process(
      &[("/app/a.js", "import b from './b';\nexport default b;\nimport('./c');")],
      development(),
    );

    let code = processed.generated[&FileType::Js].to_code();
    assert!(code.contains("var _dep0 = require(\"./b\");"));
    assert!(code.contains("exports.default = b;"));
    assert!(code.contains("require.load(\"./c\");"));
    assert_eq!(processed.cache_data["isES6Module"], json!(true));
  }

  #[test]
  fn leaves_commonjs_untouched() {
    let source = "const b = require('./b');\n\nmodule.exports = b;\n";
    let processed = process(&[("/app/a.js", source)], development());

    assert_eq!(processed.generated[&FileType::Js].to_code(), source);
    assert_eq!(processed.cache_data["isES6Module"], json!(false));
  }

  #[test]
  fn records_export_tables_when_scope_hoisting() {
    let processed = process(
      &[
        ("/app/a.js", "import { b } from './b';\nexport const c = b;"),
        ("/app/package.json", r#"{ "sideEffects": false }"#),
      ],
      BuildOptions {
        scope_hoist: true,
        ..development()
      },
    );

    assert_eq!(processed.cache_data["imports"], json!({ "b": ["./b", "b"] }));
    assert_eq!(processed.cache_data["sideEffects"], json!(false));
    assert_eq!(processed.cache_data["isES6Module"], json!(true));

    let exports = processed.cache_data["exports"].as_object().unwrap();
    assert!(exports["c"].as_str().unwrap().ends_with("$var$c"));
    assert!(processed.generated[&FileType::Js]
      .to_code()
      .contains("$quiver$require("));
  }

  #[test]
  fn emits_an_identity_source_map() {
    let processed = process(
      &[("/app/a.js", "const a = 1;\nconsole.log(a);")],
      BuildOptions::default(),
    );

    let map = match &processed.generated[&FileType::Map] {
      RenditionValue::Json(map) => map.clone(),
      value => panic!("Expected a json source map, got {value:?}"),
    };

    assert_eq!(map["sources"], json!(["a.js"]));
    assert_eq!(map["mappings"], json!("AAAA;AACA"));
  }

  #[test]
  fn minifies_without_touching_literals() {
    let code = "function f() {\n  // comment\n  return `a\n  b`;\n}\n\n";
    let scan = scan(code).unwrap();

    assert_eq!(minify(code, &scan), "function f() {\nreturn `a\n  b`;\n}");
  }

  #[test]
  fn syntax_errors_point_at_the_source() {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(Path::new("/app/a.js"), String::from("const a = 'open;\n"));

    let fs: FileSystemRef = fs;
    let build = development();
    let pipeline = Pipeline::new(PipelineContext {
      registry: Arc::new(HandlerRegistry::new(&build.extensions).unwrap()),
      options: Arc::new(PipelineOptions {
        build,
        root_dir: PathBuf::from("/app"),
        entry_files: Vec::new(),
      }),
      resolver: Arc::new(NodeResolver::new(fs.clone(), PathBuf::from("/app"))),
      fs,
    });

    let error = pipeline.process(Path::new("/app/a.js"), false).unwrap_err();
    let diagnostic = error
      .downcast_ref::<quiver_core::diagnostic::Diagnostic>()
      .unwrap();

    assert_eq!(diagnostic.message, "Unterminated string constant");
    assert_eq!(diagnostic.origin.as_deref(), Some("js"));
  }
}
