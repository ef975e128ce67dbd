//! Turns a source path into its generated renditions
//!
//! Each asset goes through the stages of its [`AssetHandler`]: load, pretransform, dependency
//! collection, transform, generate and hash. Renditions of a different type are processed
//! again by the handler of that type, so handlers compose.
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use quiver_core::hash::fold_hash;
use quiver_core::types::generated_from_renditions;
use quiver_core::types::BuildOptions;
use quiver_core::types::ProcessedAsset;
use quiver_core::types::Rendition;
use quiver_filesystem::FileSystemRef;
use serde::Deserialize;
use serde::Serialize;

pub use self::asset::*;
pub use self::handler::*;
pub use self::registry::*;
use crate::resolver::ResolverRef;

mod asset;
mod handler;
mod registry;

/// What a pipeline needs to know about the build, sent to every worker on `init`
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineOptions {
  pub build: BuildOptions,

  /// Common directory of the entries, asset ids and entry bundle names are relative to it
  pub root_dir: PathBuf,

  /// Absolute paths of the entries, the first one is the primary entry
  pub entry_files: Vec<PathBuf>,
}

/// Services handlers may use while processing an asset
#[derive(Clone, Debug)]
pub struct PipelineContext {
  pub fs: FileSystemRef,
  pub options: Arc<PipelineOptions>,
  pub registry: Arc<HandlerRegistry>,
  pub resolver: ResolverRef,
}

#[derive(Debug)]
pub struct Pipeline {
  ctx: PipelineContext,
}

impl Pipeline {
  pub fn new(ctx: PipelineContext) -> Self {
    Self { ctx }
  }

  pub fn options(&self) -> &PipelineOptions {
    &self.ctx.options
  }

  /// Processes the file at `path`, failing with a diagnostic that points at the file
  #[tracing::instrument(level = "debug", skip(self), fields(path = %path.display()))]
  pub fn process(&self, path: &Path, is_warm_up: bool) -> anyhow::Result<ProcessedAsset> {
    let handler = self.ctx.registry.find(path, false);
    let mut asset = Asset::new(path, handler.asset_type(path), self.ctx.options.clone());
    asset.is_warm_up = is_warm_up;

    let renditions = self.process_asset(handler.as_ref(), &mut asset)?;

    Ok(ProcessedAsset {
      id: asset.id,
      dependencies: asset.dependencies,
      generated: generated_from_renditions(&renditions),
      hash: asset.hash,
      cache_data: asset.cache_data,
    })
  }

  fn process_asset(
    &self,
    handler: &dyn AssetHandler,
    asset: &mut Asset,
  ) -> anyhow::Result<Vec<Rendition>> {
    if let Err(error) = self.run_stages(handler, asset) {
      return Err(handler.generate_error_message(asset, error));
    }

    let mut generated = Vec::new();
    for rendition in std::mem::take(&mut asset.renditions) {
      if rendition.is_final || rendition.value.as_text().is_none() {
        generated.push(rendition);
        continue;
      }

      let rendition_name = asset.name.with_extension(rendition.file_type.extension());
      let sub_handler = self.ctx.registry.find(&rendition_name, true);
      if sub_handler.name() == handler.name() {
        generated.push(rendition);
        continue;
      }

      tracing::trace!(
        "Processing {} rendition of {} with the {} handler",
        rendition.file_type,
        asset.relative_name,
        sub_handler.name()
      );

      let meta = rendition.meta.clone();
      let file_type = sub_handler.asset_type(&rendition_name);
      let mut sub_asset = asset.sub_asset(rendition, file_type);
      let processed = self.process_asset(sub_handler.as_ref(), &mut sub_asset);

      asset.dependencies = std::mem::take(&mut sub_asset.dependencies);
      asset.cache_data = std::mem::take(&mut sub_asset.cache_data);

      for mut output in processed? {
        if !meta.is_empty() {
          output.meta = meta.clone();
        }
        generated.push(output);
      }

      asset.hash = fold_hash(&asset.hash, &sub_asset.hash);
    }

    asset.renditions = generated.clone();
    handler
      .post_process(asset, generated, &self.ctx)
      .map_err(|error| handler.generate_error_message(asset, error))
  }

  fn run_stages(&self, handler: &dyn AssetHandler, asset: &mut Asset) -> anyhow::Result<()> {
    self.load_if_needed(handler, asset)?;
    handler.pretransform(asset, &self.ctx)?;
    self.get_dependencies(handler, asset)?;
    handler.transform(asset, &self.ctx)?;

    let generation = handler.generate(asset, &self.ctx)?;
    asset.renditions = generation.into_renditions(self.ctx.options.build.scope_hoist);
    asset.hash = handler.generate_hash(asset, &self.ctx)?;

    Ok(())
  }

  fn load_if_needed(&self, handler: &dyn AssetHandler, asset: &mut Asset) -> anyhow::Result<()> {
    if asset.contents.is_none() {
      asset.contents = handler.load(asset, &self.ctx)?;
    }
    Ok(())
  }

  fn get_dependencies(&self, handler: &dyn AssetHandler, asset: &mut Asset) -> anyhow::Result<()> {
    if asset
      .rendition
      .as_ref()
      .is_some_and(|rendition| rendition.has_dependencies == Some(false))
    {
      return Ok(());
    }

    self.load_if_needed(handler, asset)?;
    if asset.code().is_empty() || !handler.might_have_dependencies(asset) {
      return Ok(());
    }

    if asset.ast.is_none() {
      asset.ast = handler.parse(asset, &self.ctx)?;
    }

    handler.collect_dependencies(asset, &self.ctx)
  }
}
