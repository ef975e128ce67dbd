use std::path::Path;

use glob_match::glob_match_with_captures;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::Rendition;
use serde_json::Map;
use serde_json::Value;

use crate::pipeline::relative_path;
use crate::pipeline::Asset;
use crate::pipeline::AssetHandler;
use crate::pipeline::Generation;
use crate::pipeline::PipelineContext;

/// Expands an imported glob pattern into an object of every matching module
///
/// Keys are the parts of the path matched by the wildcards, so `./pages/*.js` yields
/// `{ "about": require("./pages/about.js") }` and `**` patterns produce nested objects.
#[derive(Debug)]
pub struct GlobHandler;

impl AssetHandler for GlobHandler {
  fn name(&self) -> &'static str {
    "glob"
  }

  fn asset_type(&self, _path: &Path) -> Option<FileType> {
    None
  }

  fn load(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<Option<String>> {
    let pattern = asset.name.to_string_lossy().to_string();
    let dir = asset.name.parent().unwrap_or(Path::new("/")).to_path_buf();
    let files = ctx.fs.glob(&pattern)?;

    tracing::debug!("{} matched {} files", pattern, files.len());

    let mut matches = Map::new();
    for file in files {
      let file_name = file.to_string_lossy();
      let parts = match glob_match_with_captures(&pattern, &file_name) {
        Some(captures) => captures
          .into_iter()
          .flat_map(|range| file_name[range].split('/').map(String::from).collect::<Vec<_>>())
          .filter(|part| !part.is_empty())
          .collect::<Vec<_>>(),
        None => Vec::new(),
      };

      let parts = if parts.is_empty() {
        file
          .file_stem()
          .map(|stem| vec![stem.to_string_lossy().to_string()])
          .unwrap_or_default()
      } else {
        parts
      };

      let specifier = format!("./{}", relative_path(&dir, &file));
      insert_path(&mut matches, &parts, Value::String(specifier.clone()));
      asset.add_dependency(Dependency::new(specifier));
    }

    Ok(Some(serde_json::to_string(&matches)?))
  }

  fn might_have_dependencies(&self, _asset: &Asset) -> bool {
    false
  }

  fn generate(&self, asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<Generation> {
    let matches: Value = serde_json::from_str(asset.code())?;

    Ok(Generation::Renditions(vec![Rendition::new(
      FileType::Js,
      format!("module.exports = {};", generate_object(&matches, "")),
    )
    .without_dependencies()]))
  }
}

fn insert_path(object: &mut Map<String, Value>, parts: &[String], value: Value) {
  let Some((last, parents)) = parts.split_last() else {
    return;
  };

  let mut object = object;
  for part in parents {
    let entry = object
      .entry(part.clone())
      .or_insert_with(|| Value::Object(Map::new()));

    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }

    let Value::Object(nested) = entry else {
      return;
    };
    object = nested;
  }

  object.insert(last.clone(), value);
}

fn generate_object(value: &Value, indent: &str) -> String {
  match value {
    Value::Object(object) => {
      let inner = format!("{indent}  ");
      let entries = object
        .iter()
        .map(|(key, value)| {
          format!(
            "\n{inner}{}: {}",
            Value::String(key.clone()),
            generate_object(value, &inner)
          )
        })
        .collect::<Vec<_>>()
        .join(",");

      format!("{{{entries}\n{indent}}}")
    }
    value => format!("require({value})"),
  }
}
