use std::collections::HashMap;

use quiver_core::types::FileType;
use serde_json::Map;
use serde_json::Value;

use super::bundle_path;
use super::BundleWriter;
use super::PackageContext;
use super::Packaged;
use super::Packager;
use super::PRELUDE;
use crate::bundle::BundleIdx;
use crate::graph::AssetIdx;
use crate::handlers::js::quote;

/// Wraps every module in a factory and registers it with the module loader
///
/// Dependency maps point each specifier at a module id. Dynamic imports point at the
/// bundles to load first, followed by the module id.
pub struct JsPackager<'a> {
  ctx: PackageContext<'a>,
  bundle: BundleIdx,
  writer: Option<BundleWriter>,
  first: bool,
  offsets: HashMap<AssetIdx, usize>,
}

impl<'a> JsPackager<'a> {
  pub fn new(ctx: PackageContext<'a>, bundle: BundleIdx) -> Self {
    Self {
      ctx,
      bundle,
      writer: None,
      first: true,
      offsets: HashMap::new(),
    }
  }

  fn writer(&mut self) -> anyhow::Result<&mut BundleWriter> {
    self
      .writer
      .as_mut()
      .ok_or_else(|| anyhow::anyhow!("The packager was not set up"))
  }

  fn dependency_map(&self, asset: AssetIdx) -> Value {
    let mut map = Map::new();

    for (dependency, target) in self.ctx.graph.dep_assets(asset) {
      let value = if dependency.dynamic {
        self.ctx.bundle_specifier(target)
      } else {
        match self.ctx.graph.get(target) {
          Some(target) => Value::String(target.id().to_string()),
          None => continue,
        }
      };

      map.insert(dependency.name.clone(), value);
    }

    Value::Object(map)
  }

  /// Entry bundles run their entry as soon as they load, other bundles wait to be required
  fn entries(&self) -> Vec<String> {
    let tree = self.ctx.tree;
    let current = tree.get(self.bundle);

    let is_entry_bundle = current
      .parent
      .is_none_or(|parent| tree.get(parent).file_type.is_none());
    if !is_entry_bundle {
      return Vec::new();
    }

    current
      .entry_asset
      .and_then(|entry| self.ctx.graph.get(entry))
      .map(|entry| vec![entry.id().to_string()])
      .unwrap_or_default()
  }
}

impl Packager for JsPackager<'_> {
  fn setup(&mut self) -> anyhow::Result<()> {
    let path = bundle_path(&self.ctx, self.bundle)?;
    self.writer = Some(BundleWriter::new(self.ctx.fs, &path));
    Ok(())
  }

  fn start(&mut self) -> anyhow::Result<()> {
    let writer = self.writer()?;
    writer.write(PRELUDE);
    writer.write("({");
    Ok(())
  }

  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()> {
    let Some(graph_asset) = self.ctx.graph.get(asset) else {
      return Ok(());
    };

    let code = graph_asset
      .output
      .get(&FileType::Js)
      .map(|value| value.to_code())
      .unwrap_or_default();
    let id = quote(graph_asset.id());
    let dependencies = self.dependency_map(asset).to_string();

    let separator = if self.first { "" } else { "," };
    self.first = false;

    let writer = self.writer()?;
    writer.write(&format!("{separator}{id}:[function(require,module,exports) {{\n"));
    let line = writer.line();
    writer.write(&code);
    writer.write(&format!("\n}},{dependencies}]"));

    self.offsets.insert(asset, line);
    Ok(())
  }

  fn size(&self) -> usize {
    self.writer.as_ref().map(BundleWriter::len).unwrap_or(0)
  }

  fn end(mut self: Box<Self>) -> anyhow::Result<Packaged> {
    let entries = serde_json::to_string(&self.entries())?;
    let source_mapping_url = self.ctx.source_mapping_url(self.bundle);

    let mut writer = self
      .writer
      .take()
      .ok_or_else(|| anyhow::anyhow!("The packager was not set up"))?;
    writer.write(&format!("}},{{}},{entries})"));
    if let Some(url) = source_mapping_url {
      writer.write(&url);
    }

    Ok(Packaged {
      size: writer.finish()?,
      offsets: self.offsets,
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
  use crate::packagers::test_utils::PackageFixture;

  fn development() -> BuildOptions {
    BuildOptions {
      source_maps: false,
      ..BuildOptions::default()
    }
  }

  #[test]
  fn registers_modules_with_their_dependencies() {
    let mut fixture = PackageFixture::new(development());
    let a = fixture.js("/app/a.js", "var b = require('./b');", vec![Dependency::new("./b")]);
    let b = fixture.js("/app/b.js", "module.exports = 2;", Vec::new());
    fixture.link(a, "./b", b);

    let tree = fixture.package(vec![a]);
    let output = fixture.read("/app/dist/a.js");

    assert!(output.starts_with(PRELUDE));
    assert!(output.contains(
      "({\"b.js\":[function(require,module,exports) {\nmodule.exports = 2;\n},{}]"
    ));
    assert!(output.contains(
      ",\"a.js\":[function(require,module,exports) {\nvar b = require('./b');\n},{\"./b\":\"b.js\"}]"
    ));
    assert!(output.ends_with("},{},[\"a.js\"])"));

    let root = tree.get(tree.root());
    let prelude_lines = PRELUDE.matches('\n').count();
    assert_eq!(root.offset(b), prelude_lines + 1);
    assert_eq!(root.offset(a), prelude_lines + 3);
  }

  #[test]
  fn dynamic_imports_list_the_bundles_to_load() {
    let mut fixture = PackageFixture::new(development());
    let a = fixture.js("/app/a.js", "require.load('./lazy');", vec![Dependency::dynamic("./lazy")]);
    let lazy = fixture.asset(
      "/app/lazy.js",
      FileType::Js,
      vec![(FileType::Js, RenditionValue::from("module.exports = 1;"))],
      vec![Dependency::new("./lazy.css")],
      Value::Null,
    );
    let style = fixture.asset(
      "/app/lazy.css",
      FileType::Css,
      vec![
        (FileType::Css, RenditionValue::from(".lazy {}")),
        (FileType::Js, RenditionValue::from("")),
      ],
      Vec::new(),
      Value::Null,
    );
    fixture.link(a, "./lazy", lazy);
    fixture.link(lazy, "./lazy.css", style);

    let tree = fixture.package(vec![a]);

    let lazy_bundle = tree.parent_bundle(lazy).unwrap();
    let lazy_name = tree.get(lazy_bundle).name.clone().unwrap();
    let css_bundle = tree.get(lazy_bundle).sibling_bundles_map[&FileType::Css];
    let css_name = tree.get(css_bundle).name.clone().unwrap();
    let file_name = |path: &std::path::Path| path.file_name().unwrap().to_string_lossy().to_string();

    let output = fixture.read("/app/dist/a.js");
    let specifier = json!({ "./lazy": [file_name(&lazy_name), file_name(&css_name), "lazy.js"] });
    assert!(output.contains(&format!("}},{specifier}]")));

    let lazy_output = fixture.fs.read_to_string(&lazy_name).unwrap();
    assert!(lazy_output.ends_with("},{},[])"));
    assert_eq!(fixture.fs.read_to_string(&css_name).unwrap(), ".lazy {}");
  }
}
