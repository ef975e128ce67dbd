use quiver_core::hash::hash_bytes;
use quiver_core::types::temporary_bundle_name;
use quiver_core::types::FileType;
use quiver_core::types::Rendition;

use super::url_join;
use crate::pipeline::Asset;
use crate::pipeline::AssetHandler;
use crate::pipeline::Generation;
use crate::pipeline::PipelineContext;

/// Files without a handler of their own
///
/// The file is copied to the output directory as its own bundle, and importing it yields
/// the public url of the copy.
#[derive(Debug)]
pub struct RawHandler;

impl AssetHandler for RawHandler {
  fn name(&self) -> &'static str {
    "raw"
  }

  fn load(&self, _asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<Option<String>> {
    Ok(None)
  }

  fn might_have_dependencies(&self, _asset: &Asset) -> bool {
    false
  }

  fn generate(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<Generation> {
    let file_type = asset
      .file_type
      .clone()
      .unwrap_or_else(|| FileType::from_path(&asset.name));
    let url = url_join(
      &ctx.options.build.public_url,
      &temporary_bundle_name(&asset.name, &file_type),
    );

    Ok(Generation::Renditions(vec![Rendition::new(
      FileType::Js,
      format!("module.exports={};", serde_json::to_string(&url)?),
    )]))
  }

  /// Raw files are never loaded, so the hash comes from the bytes on disk
  fn generate_hash(&self, asset: &Asset, ctx: &PipelineContext) -> anyhow::Result<String> {
    Ok(hash_bytes(&ctx.fs.read(&asset.name)?))
  }
}
