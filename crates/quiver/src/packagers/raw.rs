use std::collections::HashMap;

use quiver_core::types::FileType;

use super::bundle_path;
use super::write_file;
use super::PackageContext;
use super::Packaged;
use super::Packager;
use crate::bundle::BundleIdx;
use crate::graph::AssetIdx;

/// Copies an asset to its bundle file as is
///
/// Raw bundles hold a single asset. When the asset has no rendition of the bundle type, the
/// source file is copied.
pub struct RawPackager<'a> {
  ctx: PackageContext<'a>,
  bundle: BundleIdx,
  size: usize,
}

impl<'a> RawPackager<'a> {
  pub fn new(ctx: PackageContext<'a>, bundle: BundleIdx) -> Self {
    Self {
      ctx,
      bundle,
      size: 0,
    }
  }
}

impl Packager for RawPackager<'_> {
  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()> {
    let Some(graph_asset) = self.ctx.graph.get(asset) else {
      return Ok(());
    };

    let file_type = self
      .ctx
      .tree
      .get(self.bundle)
      .file_type
      .clone()
      .unwrap_or_else(|| FileType::from_path(&graph_asset.path));

    let contents = match graph_asset.output.get(&file_type) {
      Some(value) => value.to_code().into_bytes(),
      None => self.ctx.fs.read(&graph_asset.path)?,
    };

    let path = bundle_path(&self.ctx, self.bundle)?;
    write_file(self.ctx.fs, &path, &contents)?;

    self.size = contents.len();
    Ok(())
  }

  fn size(&self) -> usize {
    self.size
  }

  fn end(self: Box<Self>) -> anyhow::Result<Packaged> {
    Ok(Packaged {
      size: self.size,
      offsets: HashMap::new(),
    })
  }
}
