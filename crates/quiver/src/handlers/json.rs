use std::path::Path;

use quiver_core::types::FileType;
use quiver_core::types::Rendition;
use quiver_core::types::SourceLocation;
use serde_json::Value;

use crate::pipeline::Asset;
use crate::pipeline::AssetHandler;
use crate::pipeline::Ast;
use crate::pipeline::Generation;
use crate::pipeline::HandlerError;
use crate::pipeline::PipelineContext;

/// JSON and JSON5 files, which become a module exporting the parsed value
#[derive(Debug)]
pub struct JsonHandler;

impl AssetHandler for JsonHandler {
  fn name(&self) -> &'static str {
    "json"
  }

  fn asset_type(&self, _path: &Path) -> Option<FileType> {
    Some(FileType::Js)
  }

  fn might_have_dependencies(&self, _asset: &Asset) -> bool {
    false
  }

  fn parse(&self, asset: &Asset, _ctx: &PipelineContext) -> anyhow::Result<Option<Ast>> {
    Ok(Some(Ast::Json(parse_json(asset.code())?)))
  }

  #[tracing::instrument(level = "trace", skip_all, fields(asset = %asset.relative_name))]
  fn generate(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<Generation> {
    let value = match &asset.ast {
      Some(Ast::Json(value)) => value.clone(),
      _ => match self.parse(asset, ctx)? {
        Some(Ast::Json(value)) => value,
        _ => Value::Null,
      },
    };

    Ok(Generation::Renditions(vec![Rendition::new(
      FileType::Js,
      format!("module.exports = {};", serde_json::to_string(&value)?),
    )
    .without_dependencies()]))
  }
}

/// Parses standard JSON, falling back to JSON5 for comments and trailing commas
///
/// Errors are reported at the position the strict parser failed.
fn parse_json(code: &str) -> anyhow::Result<Value> {
  let error = match serde_json::from_str::<Value>(code) {
    Ok(value) => return Ok(value),
    Err(error) => error,
  };

  tracing::debug!("Falling back to the json5 parser: {error}");
  match json5::from_str::<Value>(code) {
    Ok(value) => Ok(value),
    Err(_) => Err(
      HandlerError::at(
        error.to_string(),
        SourceLocation::at(error.line(), error.column().max(1)),
      )
      .into(),
    ),
  }
}
