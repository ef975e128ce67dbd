use std::fmt::Debug;
use std::path::Path;

use indexmap::IndexMap;
use quiver_core::diagnostic::CodeFrame;
use quiver_core::diagnostic::CodeHighlight;
use quiver_core::diagnostic::Diagnostic;
use quiver_core::hash::hash_string;
use quiver_core::types::FileType;
use quiver_core::types::JSONObject;
use quiver_core::types::Rendition;
use quiver_core::types::RenditionValue;
use quiver_core::types::SourceLocation;
use serde_json::Value;
use thiserror::Error;

use super::Asset;
use super::PipelineContext;

/// Intermediate representation a handler parses its contents into
#[derive(Clone, Debug, PartialEq)]
pub enum Ast {
  /// Top level statements in source order
  Statements(Vec<String>),
  Json(Value),
}

/// The output of [`AssetHandler::generate`]
#[derive(Clone, Debug, PartialEq)]
pub enum Generation {
  Renditions(Vec<Rendition>),

  /// Values keyed by type
  ///
  /// These are final and never re-processed, except scripts when scope hoisting since
  /// every script has to go through the script handler then.
  Typed(IndexMap<FileType, RenditionValue>),
}

impl Generation {
  pub fn into_renditions(self, scope_hoist: bool) -> Vec<Rendition> {
    match self {
      Generation::Renditions(renditions) => renditions,
      Generation::Typed(values) => values
        .into_iter()
        .map(|(file_type, value)| {
          let is_final = !(file_type == FileType::Js && scope_hoist);
          Rendition {
            is_final,
            ..Rendition::new(file_type, value)
          }
        })
        .collect(),
    }
  }
}

/// A failure inside a handler, optionally pointing at the offending source
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
  pub message: String,
  pub loc: Option<SourceLocation>,
}

impl HandlerError {
  pub fn at(message: impl Into<String>, loc: SourceLocation) -> Self {
    HandlerError {
      message: message.into(),
      loc: Some(loc),
    }
  }
}

/// Processes one kind of asset through the pipeline stages
///
/// Only `name` is required. The defaults load the file as text and generate it unchanged
/// under the asset's own type.
pub trait AssetHandler: Debug + Send + Sync {
  fn name(&self) -> &'static str;

  /// Type of the assets this handler produces, `None` lets them join bundles of any type
  fn asset_type(&self, path: &Path) -> Option<FileType> {
    Some(FileType::from_path(path))
  }

  /// Loads the source, `None` when the asset has no text of its own
  fn load(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<Option<String>> {
    Ok(Some(ctx.fs.read_to_string(&asset.name)?))
  }

  fn might_have_dependencies(&self, _asset: &Asset) -> bool {
    true
  }

  fn parse(&self, _asset: &Asset, _ctx: &PipelineContext) -> anyhow::Result<Option<Ast>> {
    Ok(None)
  }

  fn pretransform(&self, _asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<()> {
    Ok(())
  }

  fn collect_dependencies(&self, _asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<()> {
    Ok(())
  }

  fn transform(&self, _asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<()> {
    Ok(())
  }

  fn generate(&self, asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<Generation> {
    let mut values = IndexMap::new();
    values.insert(
      asset.file_type.clone().unwrap_or_default(),
      RenditionValue::from(asset.contents.clone().unwrap_or_default()),
    );

    Ok(Generation::Typed(values))
  }

  fn generate_hash(&self, asset: &Asset, _ctx: &PipelineContext) -> anyhow::Result<String> {
    Ok(hash_string(&serde_json::to_string(&asset.renditions)?))
  }

  /// Last chance to rewrite the renditions, including those produced by sub-assets
  fn post_process(
    &self,
    _asset: &Asset,
    renditions: Vec<Rendition>,
    _ctx: &PipelineContext,
  ) -> anyhow::Result<Vec<Rendition>> {
    Ok(renditions)
  }

  fn generate_error_message(&self, asset: &Asset, error: anyhow::Error) -> anyhow::Error {
    located_error(self.name(), asset, error)
  }

  /// Whether a cached result has to be thrown away, given its cache data
  fn should_invalidate(&self, _cache_data: &JSONObject) -> bool {
    false
  }
}

/// Converts a handler failure into a diagnostic pointing at the asset
///
/// Errors that carry a location get a code frame of the asset source. Diagnostics that
/// already have a code frame are passed through unchanged.
pub fn located_error(origin: &str, asset: &Asset, error: anyhow::Error) -> anyhow::Error {
  if let Some(diagnostic) = error.downcast_ref::<Diagnostic>() {
    if diagnostic.code_frames.is_some() {
      return error;
    }

    let mut diagnostic = diagnostic
      .clone()
      .with_code_frame(CodeFrame::from(asset.name.clone()));
    diagnostic.origin.get_or_insert_with(|| origin.to_string());
    return anyhow::Error::new(diagnostic);
  }

  let (message, code_frame) = match error.downcast_ref::<HandlerError>() {
    Some(HandlerError {
      message,
      loc: Some(loc),
    }) => (
      message.clone(),
      CodeFrame {
        code: asset.contents.clone(),
        file_path: Some(asset.name.clone()),
        code_highlights: vec![CodeHighlight::from(loc.clone())],
      },
    ),
    Some(HandlerError { message, loc: None }) => {
      (message.clone(), CodeFrame::from(asset.name.clone()))
    }
    None => (format!("{error:#}"), CodeFrame::from(asset.name.clone())),
  };

  anyhow::Error::new(
    Diagnostic::new(message)
      .with_origin(origin)
      .with_code_frame(code_frame),
  )
}
