use std::collections::HashMap;

use quiver_core::types::FileType;

use super::bundle_path;
use super::BundleWriter;
use super::PackageContext;
use super::Packaged;
use super::Packager;
use crate::bundle::BundleIdx;
use crate::graph::AssetIdx;

/// Concatenates the rendition of each asset for the bundle type, one after another
pub struct GenericPackager<'a> {
  ctx: PackageContext<'a>,
  bundle: BundleIdx,
  file_type: FileType,
  writer: Option<BundleWriter>,
  offsets: HashMap<AssetIdx, usize>,
}

impl<'a> GenericPackager<'a> {
  pub fn new(ctx: PackageContext<'a>, bundle: BundleIdx) -> Self {
    let file_type = ctx.tree.get(bundle).file_type.clone().unwrap_or_default();

    Self {
      ctx,
      bundle,
      file_type,
      writer: None,
      offsets: HashMap::new(),
    }
  }

  fn writer(&mut self) -> anyhow::Result<&mut BundleWriter> {
    self
      .writer
      .as_mut()
      .ok_or_else(|| anyhow::anyhow!("The packager was not set up"))
  }
}

impl Packager for GenericPackager<'_> {
  fn setup(&mut self) -> anyhow::Result<()> {
    let path = bundle_path(&self.ctx, self.bundle)?;
    self.writer = Some(BundleWriter::new(self.ctx.fs, &path));
    Ok(())
  }

  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()> {
    let Some(code) = self
      .ctx
      .graph
      .get(asset)
      .and_then(|graph_asset| graph_asset.output.get(&self.file_type))
      .map(|value| value.to_code())
    else {
      return Ok(());
    };

    let writer = self.writer()?;
    if !writer.is_empty() {
      writer.write("\n");
    }

    let line = writer.line();
    writer.write(&code);
    self.offsets.insert(asset, line);
    Ok(())
  }

  fn size(&self) -> usize {
    self.writer.as_ref().map(BundleWriter::len).unwrap_or(0)
  }

  fn end(mut self: Box<Self>) -> anyhow::Result<Packaged> {
    let size = match self.writer.take() {
      Some(writer) => writer.finish()?,
      None => 0,
    };

    Ok(Packaged {
      size,
      offsets: self.offsets,
    })
  }
}
