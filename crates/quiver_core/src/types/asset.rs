use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::hash::hash_string;
use crate::hash::short_hash;

use super::Dependencies;
use super::FileType;
use super::Generated;
use super::JSONObject;

/// The outcome of running an asset through the pipeline
///
/// This is what crosses the worker boundary and what the content cache persists.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedAsset {
  pub id: String,

  pub dependencies: Dependencies,

  pub generated: Generated,

  pub hash: String,

  /// Handler specific metadata, such as export tables and side-effect flags
  #[serde(default)]
  pub cache_data: JSONObject,
}

/// Stable identifier of an asset
///
/// Development builds use the project relative path for easier debugging; production and
/// scope hoisted builds use a short hash of it.
pub fn asset_id(relative_name: &str, production: bool, scope_hoist: bool) -> String {
  if production || scope_hoist {
    short_hash(relative_name, 4)
  } else {
    relative_name.to_string()
  }
}

/// Temporary name of the bundle an asset is the entry of
///
/// Generated code refers to bundles by this name until final names are known.
pub fn temporary_bundle_name(path: &Path, file_type: &FileType) -> String {
  format!(
    "{}.{}",
    hash_string(&path.to_string_lossy()),
    file_type.extension()
  )
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::types::Dependency;
  use crate::types::RenditionValue;

  #[test]
  fn development_ids_are_relative_paths() {
    assert_eq!(asset_id("src/a.js", false, false), "src/a.js");
    assert_eq!(asset_id("src/a.js", true, false).len(), 4);
    assert_eq!(
      asset_id("src/a.js", false, true),
      asset_id("src/a.js", true, false)
    );
  }

  #[test]
  fn temporary_names_keep_the_type() {
    let name = temporary_bundle_name(&PathBuf::from("/src/a.css"), &FileType::Css);

    assert!(name.ends_with(".css"));
    assert_eq!(name.len(), 36);
  }

  #[test]
  fn records_serialize_in_camel_case() {
    let mut asset = ProcessedAsset {
      id: String::from("src/a.js"),
      hash: String::from("abc"),
      ..ProcessedAsset::default()
    };
    asset.dependencies.add(Dependency::new("./b"));
    asset
      .generated
      .insert(FileType::Js, RenditionValue::from("require('./b')"));
    asset
      .cache_data
      .insert(String::from("sideEffects"), serde_json::Value::Bool(false));

    let json = serde_json::to_value(&asset).unwrap();

    assert_eq!(json["generated"]["js"], "require('./b')");
    assert_eq!(json["cacheData"]["sideEffects"], false);
    assert_eq!(serde_json::from_value::<ProcessedAsset>(json).unwrap(), asset);
  }
}
