use std::collections::HashMap;

use quiver_core::types::FileType;
use quiver_core::types::RenditionValue;
use serde_json::json;
use serde_json::Value;

use super::bundle_path;
use super::BundleWriter;
use super::PackageContext;
use super::Packaged;
use super::Packager;
use crate::bundle::BundleIdx;
use crate::graph::AssetIdx;
use crate::pipeline::relative_path;

/// Combines the maps of a bundle's assets into an index map of its parent bundle
///
/// Runs after the parent was written, since sections start at the line offsets the parent
/// recorded for each asset.
pub struct SourceMapPackager<'a> {
  ctx: PackageContext<'a>,
  bundle: BundleIdx,
  sections: Vec<(usize, Value)>,
  size: usize,
}

impl<'a> SourceMapPackager<'a> {
  pub fn new(ctx: PackageContext<'a>, bundle: BundleIdx) -> Self {
    Self {
      ctx,
      bundle,
      sections: Vec::new(),
      size: 0,
    }
  }
}

impl Packager for SourceMapPackager<'_> {
  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()> {
    let Some(map) = self
      .ctx
      .graph
      .get(asset)
      .and_then(|graph_asset| graph_asset.output.get(&FileType::Map))
    else {
      return Ok(());
    };

    let map = match map {
      RenditionValue::Json(map) => map.clone(),
      RenditionValue::Text(text) => serde_json::from_str(text)?,
    };

    let offset = self
      .ctx
      .tree
      .get(self.bundle)
      .parent
      .map(|parent| self.ctx.tree.get(parent).offset(asset))
      .unwrap_or(0);

    self.size += map.to_string().len();
    self.sections.push((offset, map));
    Ok(())
  }

  fn size(&self) -> usize {
    self.size
  }

  fn end(mut self: Box<Self>) -> anyhow::Result<Packaged> {
    let file = self
      .ctx
      .tree
      .get(self.bundle)
      .parent
      .and_then(|parent| self.ctx.bundle_file_name(parent))
      .unwrap_or_default();

    self.sections.sort_by_key(|(offset, _)| *offset);
    let sections = self
      .sections
      .into_iter()
      .map(|(line, map)| {
        json!({
          "offset": { "line": line, "column": 0 },
          "map": map,
        })
      })
      .collect::<Vec<_>>();

    let index = json!({
      "version": 3,
      "file": file,
      "sourceRoot": relative_path(&self.ctx.options.build.out_dir, &self.ctx.options.root_dir),
      "sections": sections,
    });

    let path = bundle_path(&self.ctx, self.bundle)?;
    let mut writer = BundleWriter::new(self.ctx.fs, &path);
    writer.write(&serde_json::to_string(&index)?);
    let size = writer.finish()?;

    Ok(Packaged {
      size,
      offsets: HashMap::new(),
    })
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_core::types::BuildOptions;
  use quiver_core::types::Dependency;

  use super::*;
  use crate::packagers::test_utils::PackageFixture;

  fn map(source: &str) -> RenditionValue {
    RenditionValue::Json(json!({
      "version": 3,
      "sources": [source],
      "names": [],
      "mappings": "AAAA",
    }))
  }

  #[test]
  fn sections_follow_the_parent_offsets() {
    let mut fixture = PackageFixture::new(BuildOptions {
      source_maps: true,
      ..BuildOptions::default()
    });

    let a = fixture.asset(
      "/app/a.css",
      FileType::Css,
      vec![
        (FileType::Css, RenditionValue::from(".a {}")),
        (FileType::Map, map("a.css")),
      ],
      vec![Dependency::new("./b.css")],
      Value::Null,
    );
    let b = fixture.asset(
      "/app/b.css",
      FileType::Css,
      vec![
        (FileType::Css, RenditionValue::from(".b {\n}")),
        (FileType::Map, map("b.css")),
      ],
      Vec::new(),
      Value::Null,
    );
    fixture.link(a, "./b.css", b);

    fixture.package(vec![a]);

    let index: Value = serde_json::from_str(&fixture.read("/app/dist/a.map")).unwrap();
    assert_eq!(index["file"], json!("a.css"));
    assert_eq!(index["sourceRoot"], json!(".."));
    assert_eq!(
      index["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|section| (section["offset"]["line"].clone(), section["map"]["sources"][0].clone()))
        .collect::<Vec<_>>(),
      vec![(json!(0), json!("b.css")), (json!(2), json!("a.css"))]
    );
  }
}
