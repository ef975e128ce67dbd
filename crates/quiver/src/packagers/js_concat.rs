use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexSet;
use quiver_core::types::FileType;
use regex::Captures;
use regex::Regex;
use serde_json::Value;

use super::bundle_path;
use super::BundleWriter;
use super::PackageContext;
use super::Packaged;
use super::Packager;
use super::HELPERS;
use super::HOISTED_PRELUDE;
use crate::bundle::BundleIdx;
use crate::graph::AssetIdx;
use crate::handlers::js::declared_name;
use crate::handlers::js::module_identifier;
use crate::handlers::js::quote;
use crate::handlers::js::scan;
use crate::handlers::js::split_statements;
use crate::pipeline::relative_path;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"\$quiver\$(require|import)\(\s*("(?:[^"\\]|\\.)*")\s*,\s*("(?:[^"\\]|\\.)*")\s*\)"#)
    .expect("placeholder regex should compile")
});

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*(?:var|let|const)\s+").expect("variable declaration regex should compile")
});

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*(?:async\s+)?function\b").expect("function declaration regex should compile")
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\s*class\s+[\w$]+").expect("class declaration regex should compile")
});

static DECLARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?s)^\s*([A-Za-z_$][\w$]*)\s*(?:=(.*))?$").expect("declarator regex should compile")
});

const ASSET_MARKER: &str = "// ASSET: ";

/// Where an export is defined, after following re-exports and wildcards
#[derive(Debug, PartialEq)]
struct ExportModule {
  asset: AssetIdx,
  name: String,
  identifier: Option<String>,
}

/// Concatenates the scope hoisted modules of a bundle into one scope
///
/// Modules are spliced in right before the first statement that requires them, and modules
/// without side effects whose exports are never used are left out. A module is wrapped in an
/// init function when it may only run conditionally.
pub struct JsConcatPackager<'a> {
  ctx: PackageContext<'a>,
  bundle: BundleIdx,

  /// Assets of the bundle by id
  assets: HashMap<String, AssetIdx>,

  /// Modules other bundles require, returned to the loader
  exposed: IndexSet<AssetIdx>,

  needs_prelude: bool,
  used_exports: HashMap<AssetIdx, HashSet<String>>,
  wrapped: HashMap<AssetIdx, bool>,
  added: HashSet<AssetIdx>,
  statements: Vec<String>,
  size: usize,
}

impl<'a> JsConcatPackager<'a> {
  pub fn new(ctx: PackageContext<'a>, bundle: BundleIdx) -> Self {
    Self {
      ctx,
      bundle,
      assets: HashMap::new(),
      exposed: IndexSet::new(),
      needs_prelude: false,
      used_exports: HashMap::new(),
      wrapped: HashMap::new(),
      added: HashSet::new(),
      statements: Vec::new(),
      size: 0,
    }
  }

  fn in_bundle(&self, asset: AssetIdx) -> bool {
    self.ctx.tree.get(self.bundle).assets.contains(&asset)
  }

  fn cache_value(&self, asset: AssetIdx, key: &str) -> Option<&'a Value> {
    self
      .ctx
      .graph
      .get(asset)
      .and_then(|graph_asset| graph_asset.cache_data())
      .and_then(|cache_data| cache_data.get(key))
  }

  fn id(&self, asset: AssetIdx) -> &'a str {
    self
      .ctx
      .graph
      .get(asset)
      .map(|graph_asset| graph_asset.id())
      .unwrap_or_default()
  }

  fn code(&self, asset: AssetIdx) -> String {
    self
      .ctx
      .graph
      .get(asset)
      .and_then(|graph_asset| graph_asset.output.get(&FileType::Js))
      .map(|value| value.to_code())
      .unwrap_or_default()
  }

  /// `(local, specifier, imported name)` of each import of an asset
  fn imports(&self, asset: AssetIdx) -> Vec<(String, String)> {
    let Some(Value::Object(imports)) = self.cache_value(asset, "imports") else {
      return Vec::new();
    };

    imports
      .values()
      .filter_map(|import| match import {
        Value::Array(pair) => match (pair.first(), pair.get(1)) {
          (Some(Value::String(source)), Some(Value::String(name))) => {
            Some((source.clone(), name.clone()))
          }
          _ => None,
        },
        _ => None,
      })
      .collect()
  }

  fn wildcards(&self, asset: AssetIdx) -> Vec<String> {
    self
      .cache_value(asset, "wildcards")
      .and_then(Value::as_array)
      .map(|wildcards| {
        wildcards
          .iter()
          .filter_map(|source| source.as_str().map(str::to_string))
          .collect()
      })
      .unwrap_or_default()
  }

  fn has_side_effects(&self, asset: AssetIdx) -> bool {
    self.cache_value(asset, "sideEffects") != Some(&Value::Bool(false))
  }

  fn is_es6_module(&self, asset: AssetIdx) -> bool {
    self.cache_value(asset, "isES6Module") == Some(&Value::Bool(true))
  }

  /// Modules without side effects are only kept when one of their exports is used
  fn is_excluded(&self, asset: AssetIdx) -> bool {
    !self.has_side_effects(asset)
      && self
        .used_exports
        .get(&asset)
        .is_none_or(|used| used.is_empty())
  }

  fn mark_used_exports(&mut self, asset: AssetIdx) {
    if self.used_exports.contains_key(&asset) {
      return;
    }
    self.used_exports.insert(asset, HashSet::new());

    for (source, name) in self.imports(asset) {
      let Some(dependency) = self.ctx.graph.dep_asset(asset, &source) else {
        continue;
      };

      if name == "*" {
        self.mark_used_exports(dependency);
      }

      self.mark_used(dependency, &name);
    }
  }

  fn mark_used(&mut self, asset: AssetIdx, name: &str) {
    let found = self.find_export_module(asset, name, &mut HashSet::new());
    if !self.in_bundle(found.asset) {
      return;
    }

    self.mark_used_exports(found.asset);
    if let Some(used) = self.used_exports.get_mut(&found.asset) {
      used.insert(found.name);
    }
  }

  fn export(&self, asset: AssetIdx, name: &str) -> Option<&'a Value> {
    match self.cache_value(asset, "exports") {
      Some(Value::Object(exports)) => exports.get(name),
      _ => None,
    }
  }

  /// Follows re-exports and `export *` to the module defining `name`
  ///
  /// Default exports are never re-exported by wildcards.
  fn find_export_module(
    &self,
    asset: AssetIdx,
    name: &str,
    seen: &mut HashSet<(AssetIdx, String)>,
  ) -> ExportModule {
    if !seen.insert((asset, name.to_string())) {
      return ExportModule {
        asset,
        name: name.to_string(),
        identifier: None,
      };
    }

    let export = self.export(asset, name);

    if let Some(Value::Array(reexport)) = export {
      let source = reexport.first().and_then(Value::as_str);
      let imported = reexport.get(1).and_then(Value::as_str);
      if let (Some(source), Some(imported)) = (source, imported) {
        if let Some(dependency) = self.ctx.graph.dep_asset(asset, source) {
          return self.find_export_module(dependency, imported, seen);
        }
      }
    }

    if name != "default" && name != "*" {
      for source in self.wildcards(asset) {
        let Some(dependency) = self.ctx.graph.dep_asset(asset, &source) else {
          continue;
        };

        let found = self.find_export_module(dependency, name, seen);
        if found.identifier.is_some() {
          return found;
        }
      }
    }

    let identifier = if name == "*" {
      Some(module_identifier(self.id(asset), "exports"))
    } else {
      export.and_then(Value::as_str).map(str::to_string)
    };

    ExportModule {
      asset,
      name: name.to_string(),
      identifier,
    }
  }

  /// Whether a module has to run lazily, because it is required conditionally or by a wrapped
  /// module
  fn should_wrap(&mut self, asset: AssetIdx) -> bool {
    if let Some(wrapped) = self.wrapped.get(&asset) {
      return *wrapped;
    }

    // Cycles see false until the real value is known
    self.wrapped.insert(asset, false);

    let parents = self
      .ctx
      .graph
      .parent_deps(asset)
      .into_iter()
      .map(|(parent, dependency)| (parent, dependency.should_wrap))
      .collect::<Vec<_>>();

    let should_wrap = parents
      .into_iter()
      .any(|(parent, should_wrap)| should_wrap || self.should_wrap(parent));

    self.wrapped.insert(asset, should_wrap);
    should_wrap
  }

  fn export_identifier(&mut self, asset: AssetIdx) -> String {
    let id = self.id(asset);
    let exports = module_identifier(id, "exports");

    if self.should_wrap(asset) {
      return format!("({}(), {exports})", module_identifier(id, "init"));
    }

    exports
  }

  fn add_deps(
    &mut self,
    asset: AssetIdx,
    included: &mut HashSet<AssetIdx>,
  ) -> anyhow::Result<Vec<String>> {
    if !self.in_bundle(asset) || !included.insert(asset) {
      return Ok(Vec::new());
    }

    let mut dependencies = Vec::new();
    for (_, dependency) in self.ctx.graph.dep_assets(asset) {
      let statements = self.add_deps(dependency, included)?;
      dependencies.push((dependency, statements));
    }

    let mut statements = if self.is_excluded(asset) {
      Vec::new()
    } else {
      let code = self.code(asset);
      split_statements(&code, &scan(&code)?)
    };

    if self.should_wrap(asset) {
      statements = self.wrap_module(asset, statements)?;
    }

    if let Some(first) = statements.first_mut() {
      let name = self
        .ctx
        .graph
        .get(asset)
        .map(|graph_asset| relative_path(&self.ctx.options.root_dir, &graph_asset.path))
        .unwrap_or_default();
      *first = format!("{ASSET_MARKER}{name}\n{first}");
    }

    let mut first_use = HashMap::new();
    for (index, statement) in statements.iter().enumerate() {
      for captures in PLACEHOLDER_RE.captures_iter(statement) {
        if &captures[1] != "require" {
          continue;
        }

        let Ok(source) = serde_json::from_str::<String>(&captures[3]) else {
          continue;
        };
        if let Some(dependency) = self.ctx.graph.dep_asset(asset, &source) {
          first_use.entry(dependency).or_insert(index);
        }
      }
    }

    // Later insertion points first, so earlier ones stay valid
    let mut insertions = dependencies
      .into_iter()
      .enumerate()
      .map(|(order, (dependency, dependency_statements))| {
        let index = first_use.get(&dependency).copied().unwrap_or(0);
        (index, order, dependency_statements)
      })
      .collect::<Vec<_>>();
    insertions.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    for (index, _, dependency_statements) in insertions {
      statements.splice(index..index, dependency_statements);
    }

    Ok(statements)
  }

  /// Moves declarations out of an init function that runs the module once
  ///
  /// Variables and classes are declared outside and assigned inside, functions stay outside
  /// as they are, so other modules can reference any top level name.
  fn wrap_module(&mut self, asset: AssetIdx, statements: Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut declarations = Vec::new();
    let mut functions = Vec::new();
    let mut body = Vec::new();

    for statement in statements {
      if let Some(keyword) = VARIABLE_RE.find(&statement) {
        match hoist_declarators(&statement[keyword.end()..])? {
          Some(declarators) => {
            for (name, init) in declarators {
              if let Some(init) = init {
                body.push(format!("{name} = {init};"));
              }
              declarations.push(name);
            }
          }
          None => body.push(statement),
        }
      } else if FUNCTION_RE.is_match(&statement) {
        functions.push(statement);
      } else if CLASS_RE.is_match(&statement) {
        match declared_name(&statement) {
          Some(name) => {
            let class = statement.trim().trim_end_matches(';');
            body.push(format!("{name} = {class};"));
            declarations.push(name);
          }
          None => body.push(statement),
        }
      } else {
        body.push(statement);
      }
    }

    let id = self.id(asset);
    let executed = module_identifier(id, "executed");
    declarations.push(format!("{executed} = false"));

    let mut init = vec![
      format!("function {}() {{", module_identifier(id, "init")),
      format!("  if ({executed}) return;"),
      format!("  {executed} = true;"),
    ];
    init.extend(body);
    init.push(String::from("}"));

    let mut wrapped = vec![format!("var {};", declarations.join(", "))];
    wrapped.extend(functions);
    wrapped.push(init.join("\n"));
    Ok(wrapped)
  }

  /// Rewrites the module placeholders once every module's place in the output is known
  fn replace_placeholders(&mut self, code: &str) -> String {
    let mut replacements = HashMap::new();
    for captures in PLACEHOLDER_RE.captures_iter(code) {
      let key = captures[0].to_string();
      if replacements.contains_key(&key) {
        continue;
      }

      let replacement = self.placeholder_replacement(&captures);
      replacements.insert(key, replacement);
    }

    PLACEHOLDER_RE
      .replace_all(code, |captures: &Captures<'_>| {
        replacements
          .get(&captures[0])
          .cloned()
          .unwrap_or_else(|| captures[0].to_string())
      })
      .to_string()
  }

  fn placeholder_replacement(&mut self, captures: &Captures<'_>) -> String {
    let kind = &captures[1];
    let id = serde_json::from_str::<String>(&captures[2]).unwrap_or_default();
    let source = serde_json::from_str::<String>(&captures[3]).unwrap_or_default();

    let parent = self
      .assets
      .get(&id)
      .copied()
      .or_else(|| self.ctx.graph.find_by_id(&id));
    let dependency = parent.and_then(|parent| self.ctx.graph.dep_asset(parent, &source));

    match (kind, dependency) {
      ("import", Some(dependency)) => format!("require.load({})", self.ctx.bundle_specifier(dependency)),
      ("import", None) => format!("import({})", quote(&source)),
      (_, Some(dependency)) if self.in_bundle(dependency) => {
        if self.is_excluded(dependency) {
          String::from("void 0")
        } else {
          self.export_identifier(dependency)
        }
      }
      (_, Some(dependency)) => format!("require({})", quote(self.id(dependency))),
      (_, None) => format!("require({})", quote(&source)),
    }
  }
}

/// Splits `a = 1, b` into its declarators, `None` when one of them is a pattern
fn hoist_declarators(declarators: &str) -> anyhow::Result<Option<Vec<(String, Option<String>)>>> {
  let declarators = declarators.trim_end().trim_end_matches(';');
  let scan = scan(declarators)?;

  let mut parts = Vec::new();
  let mut start = 0;
  for (offset, byte) in declarators.bytes().enumerate() {
    if byte == b',' && scan.is_code(offset) && scan.enclosing(offset) == '\0' {
      parts.push(&declarators[start..offset]);
      start = offset + 1;
    }
  }
  parts.push(&declarators[start..]);

  let mut hoisted = Vec::with_capacity(parts.len());
  for part in parts {
    let Some(captures) = DECLARATOR_RE.captures(part) else {
      return Ok(None);
    };

    let init = captures
      .get(2)
      .map(|init| init.as_str().trim().to_string())
      .filter(|init| !init.is_empty());
    hoisted.push((captures[1].to_string(), init));
  }

  Ok(Some(hoisted))
}

impl Packager for JsConcatPackager<'_> {
  fn start(&mut self) -> anyhow::Result<()> {
    let tree = self.ctx.tree;
    let graph = self.ctx.graph;
    let bundle = tree.get(self.bundle);

    for asset in bundle.assets.iter().copied() {
      // Modules required from other script bundles are loaded through the loader
      let is_exposed = !graph.parent_deps(asset).iter().all(|(parent, _)| {
        self.in_bundle(*parent)
          || graph
            .get(*parent)
            .is_none_or(|parent| parent.file_type != Some(FileType::Js))
      });

      let is_shared_entry = bundle.entry_asset == Some(asset)
        && bundle
          .parent
          .is_some_and(|parent| tree.get(parent).child_bundles.len() != 1);

      if is_exposed || is_shared_entry {
        self.exposed.insert(asset);
        self.needs_prelude = true;
      }

      let id = self.id(asset).to_string();
      self.assets.insert(id, asset);

      if graph
        .dep_assets(asset)
        .iter()
        .any(|(_, dependency)| !self.in_bundle(*dependency))
      {
        self.needs_prelude = true;
      }
    }

    if let Some(entry) = bundle.entry_asset {
      self.mark_used_exports(entry);

      if self.needs_prelude {
        self.exposed.insert(entry);
      }
    }

    self.statements.push(HELPERS.trim_end().to_string());
    Ok(())
  }

  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()> {
    if !self.added.insert(asset) || self.is_excluded(asset) {
      return Ok(());
    }

    self.size += self.code(asset).len();
    Ok(())
  }

  fn size(&self) -> usize {
    self.size
  }

  fn end(mut self: Box<Self>) -> anyhow::Result<Packaged> {
    let assets = self
      .ctx
      .tree
      .get(self.bundle)
      .assets
      .iter()
      .copied()
      .collect::<Vec<_>>();

    let mut included = HashSet::new();
    for asset in assets {
      let statements = self.add_deps(asset, &mut included)?;
      self.statements.extend(statements);
    }

    if let Some(entry) = self.ctx.tree.get(self.bundle).entry_asset {
      if !self.is_excluded(entry) {
        let exports = self.export_identifier(entry);
        self.statements.push(format!(
          "if (typeof exports === \"object\" && typeof module !== \"undefined\") {{\n  // CommonJS\n  module.exports = {exports};\n}} else if (typeof define === \"function\" && define.amd) {{\n  // RequireJS\n  define(function () {{\n    return {exports};\n  }});\n}}"
        ));
      }
    }

    if self.needs_prelude {
      let exposed = self.exposed.iter().copied().collect::<Vec<_>>();
      let mut prepare = Vec::new();
      let mut returned = Vec::new();

      for asset in exposed {
        let exports = self.export_identifier(asset);
        if self.is_es6_module(asset) {
          prepare.push(format!("{exports}.__esModule = true;"));
        }
        returned.push(format!("{}: {exports}", quote(self.id(asset))));
      }

      self.statements.extend(prepare);
      self
        .statements
        .push(format!("return {{{}}};", returned.join(", ")));
    }

    let code = self.statements.join("\n");
    let mut output = self.replace_placeholders(&code);

    if !self.ctx.options.build.minify {
      output = format!("\n{output}\n");
    }

    let mut output = if self.needs_prelude {
      format!("{HOISTED_PRELUDE}(function (require) {{{output}}});")
    } else {
      format!("(function () {{{output}}})();")
    };

    if let Some(url) = self.ctx.source_mapping_url(self.bundle) {
      output.push_str(&url);
    }

    let markers = self
      .assets
      .values()
      .filter_map(|asset| {
        let path = &self.ctx.graph.get(*asset)?.path;
        Some((relative_path(&self.ctx.options.root_dir, path), *asset))
      })
      .collect::<HashMap<_, _>>();

    let mut offsets = HashMap::new();
    for (line, text) in output.lines().enumerate() {
      if let Some(asset) = text
        .strip_prefix(ASSET_MARKER)
        .and_then(|name| markers.get(name))
      {
        offsets.insert(*asset, line + 1);
      }
    }

    let path = bundle_path(&self.ctx, self.bundle)?;
    let mut writer = BundleWriter::new(self.ctx.fs, &path);
    writer.write(&output);

    Ok(Packaged {
      size: writer.finish()?,
      offsets,
    })
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_core::types::BuildOptions;
  use quiver_core::types::Dependency;
  use quiver_core::types::RenditionValue;
  use serde_json::json;

  use super::*;
  use crate::bundle::BundleTree;
  use crate::packagers::test_utils::PackageFixture;

  fn scope_hoisted() -> PackageFixture {
    PackageFixture::new(BuildOptions {
      scope_hoist: true,
      source_maps: false,
      ..BuildOptions::default()
    })
  }

  fn module(
    fixture: &mut PackageFixture,
    path: &str,
    code: &[&str],
    dependencies: Vec<Dependency>,
    cache_data: Value,
  ) -> AssetIdx {
    fixture.asset(
      path,
      FileType::Js,
      vec![(FileType::Js, RenditionValue::from(code.join("\n")))],
      dependencies,
      cache_data,
    )
  }

  fn es_module(imports: Value, exports: Value, side_effects: bool) -> Value {
    json!({
      "imports": imports,
      "exports": exports,
      "wildcards": [],
      "isES6Module": true,
      "sideEffects": side_effects,
    })
  }

  fn position(output: &str, needle: &str) -> usize {
    output
      .find(needle)
      .unwrap_or_else(|| panic!("{needle} is missing from\n{output}"))
  }

  #[test]
  fn inlines_dependencies_before_their_first_use() {
    let mut fixture = scope_hoisted();
    let a = module(
      &mut fixture,
      "/app/a.js",
      &[
        "var $a_js$exports = {};",
        "$a_js$exports.__esModule = true;",
        "var $a_js$var$b = $quiver$interopDefault($quiver$require(\"a.js\", \"./b\"));",
        "console.log($a_js$var$b);",
      ],
      vec![Dependency::new("./b")],
      es_module(json!({ "b": ["./b", "default"] }), json!({}), true),
    );
    let b = module(
      &mut fixture,
      "/app/b.js",
      &[
        "var $b_js$exports = {};",
        "$b_js$exports.__esModule = true;",
        "$b_js$exports.default = 42;",
      ],
      Vec::new(),
      es_module(json!({}), json!({ "default": "$b_js$exports.default" }), true),
    );
    fixture.link(a, "./b", b);

    fixture.package(vec![a]);
    let output = fixture.read("/app/dist/a.js");

    assert!(output.starts_with("(function () {\n"));
    assert!(output.ends_with("})();"));
    assert!(!output.contains("$quiver$require"));
    assert!(output.contains("function $quiver$interopDefault(a)"));
    assert!(position(&output, "// ASSET: a.js\nvar $a_js$exports = {};") < position(&output, "// ASSET: b.js"));
    assert!(
      position(&output, "$b_js$exports.default = 42;")
        < position(&output, "var $a_js$var$b = $quiver$interopDefault($b_js$exports);")
    );
    assert!(output.contains("module.exports = $a_js$exports;"));
  }

  #[test]
  fn unused_modules_without_side_effects_are_left_out() {
    let mut fixture = scope_hoisted();
    let a = module(
      &mut fixture,
      "/app/a.js",
      &[
        "var $a_js$exports = {};",
        "$a_js$exports.__esModule = true;",
        "$quiver$require(\"a.js\", \"./unused\");",
        "var $a_js$var$x = $quiver$require(\"a.js\", \"./used\").x;",
      ],
      vec![Dependency::new("./unused"), Dependency::new("./used")],
      es_module(json!({ "x": ["./used", "x"] }), json!({}), true),
    );
    let unused = module(
      &mut fixture,
      "/app/unused.js",
      &["var $unused_js$exports = {};", "$unused_js$exports.y = 1;"],
      Vec::new(),
      es_module(json!({}), json!({ "y": "$unused_js$var$y" }), false),
    );
    let used = module(
      &mut fixture,
      "/app/used.js",
      &["var $used_js$exports = {};", "$used_js$exports.x = 2;"],
      Vec::new(),
      es_module(json!({}), json!({ "x": "$used_js$var$x" }), false),
    );
    fixture.link(a, "./unused", unused);
    fixture.link(a, "./used", used);

    fixture.package(vec![a]);
    let output = fixture.read("/app/dist/a.js");

    assert!(!output.contains("$unused_js$exports.y = 1;"));
    assert!(output.contains("void 0;"));
    assert!(output.contains("$used_js$exports.x = 2;"));
    assert!(output.contains("var $a_js$var$x = $used_js$exports.x;"));
  }

  #[test]
  fn conditionally_required_modules_are_wrapped() {
    let mut fixture = scope_hoisted();
    let a = module(
      &mut fixture,
      "/app/a.js",
      &[
        "var $a_js$exports = {};",
        "if (window.flag) {\n  $quiver$require(\"a.js\", \"./b\").f();\n}",
      ],
      vec![Dependency {
        should_wrap: true,
        ..Dependency::new("./b")
      }],
      json!({ "imports": { "$require$./b": ["./b", "*"] }, "exports": {}, "wildcards": [] }),
    );
    let b = module(
      &mut fixture,
      "/app/b.js",
      &[
        "var $b_js$exports = {};",
        "var $b_js$var$v = 1, $b_js$var$w;",
        "function $b_js$var$f() {\n  return $b_js$var$v;\n}",
        "class $b_js$var$C {}",
        "$b_js$exports.f = $b_js$var$f;",
      ],
      Vec::new(),
      json!({ "imports": {}, "exports": {}, "wildcards": [] }),
    );
    fixture.link(a, "./b", b);

    fixture.package(vec![a]);
    let output = fixture.read("/app/dist/a.js");

    assert!(output.contains(
      "// ASSET: b.js\nvar $b_js$exports, $b_js$var$v, $b_js$var$w, $b_js$var$C, $b_js$executed = false;\nfunction $b_js$var$f() {\n  return $b_js$var$v;\n}\nfunction $b_js$init() {\n  if ($b_js$executed) return;\n  $b_js$executed = true;\n$b_js$exports = {};\n$b_js$var$v = 1;\n$b_js$var$C = class $b_js$var$C {};\n$b_js$exports.f = $b_js$var$f;\n}"
    ));
    assert!(output.contains("($b_js$init(), $b_js$exports).f();"));
  }

  #[test]
  fn dynamic_imports_go_through_the_loader() {
    let mut fixture = scope_hoisted();
    let a = module(
      &mut fixture,
      "/app/a.js",
      &["var $a_js$exports = {};", "$quiver$import(\"a.js\", \"./lazy\").then(console.log);"],
      vec![Dependency::dynamic("./lazy")],
      json!({ "imports": {}, "exports": {}, "wildcards": [] }),
    );
    let lazy = module(
      &mut fixture,
      "/app/lazy.js",
      &["var $lazy_js$exports = {};", "$lazy_js$exports.__esModule = true;"],
      Vec::new(),
      es_module(json!({}), json!({}), true),
    );
    fixture.link(a, "./lazy", lazy);

    let tree = fixture.package(vec![a]);
    let lazy_name = tree
      .get(tree.parent_bundle(lazy).unwrap())
      .name
      .clone()
      .unwrap();
    let lazy_file = lazy_name.file_name().unwrap().to_string_lossy().to_string();

    let output = fixture.read("/app/dist/a.js");
    assert!(output.starts_with(HOISTED_PRELUDE));
    assert!(output.contains(&format!(
      "require.load([\"{lazy_file}\",\"lazy.js\"]).then(console.log);"
    )));
    assert!(output.contains("return {\"a.js\": $a_js$exports};"));

    let lazy_output = fixture.fs.read_to_string(&lazy_name).unwrap();
    assert!(lazy_output.contains("$lazy_js$exports.__esModule = true;\nreturn {\"lazy.js\": $lazy_js$exports};"));
  }

  #[test]
  fn exports_are_followed_through_reexports_and_wildcards() {
    let mut fixture = scope_hoisted();
    let a = module(
      &mut fixture,
      "/app/a.js",
      &["var $a_js$exports = {};"],
      vec![Dependency::new("./b")],
      es_module(json!({ "x": ["./b", "x"], "z": ["./b", "z"] }), json!({}), true),
    );
    let b = module(
      &mut fixture,
      "/app/b.js",
      &["var $b_js$exports = {};"],
      vec![Dependency::new("./c"), Dependency::new("./d")],
      json!({
        "imports": {},
        "exports": { "z": ["./d", "w"] },
        "wildcards": ["./c"],
        "sideEffects": false,
      }),
    );
    let c = module(
      &mut fixture,
      "/app/c.js",
      &["var $c_js$exports = {};"],
      Vec::new(),
      es_module(json!({}), json!({ "x": "$c_js$var$x" }), false),
    );
    let d = module(
      &mut fixture,
      "/app/d.js",
      &["var $d_js$exports = {};"],
      Vec::new(),
      es_module(json!({}), json!({ "w": "$d_js$var$w" }), false),
    );
    fixture.link(a, "./b", b);
    fixture.link(b, "./c", c);
    fixture.link(b, "./d", d);
    fixture.graph.set_entries(vec![a]);

    let tree = BundleTree::build(&fixture.graph, &fixture.options.build.out_dir);
    let ctx = PackageContext {
      graph: &fixture.graph,
      tree: &tree,
      options: &fixture.options,
      fs: &fixture.fs,
    };
    let mut packager = JsConcatPackager::new(ctx, tree.root());
    packager.start().unwrap();

    assert_eq!(
      packager.find_export_module(b, "x", &mut HashSet::new()),
      ExportModule {
        asset: c,
        name: String::from("x"),
        identifier: Some(String::from("$c_js$var$x")),
      }
    );
    assert_eq!(
      packager.used_exports[&c],
      HashSet::from([String::from("x")])
    );
    assert_eq!(
      packager.used_exports[&d],
      HashSet::from([String::from("w")])
    );
    assert!(packager.is_excluded(b));
    assert!(!packager.is_excluded(c));
  }
}
