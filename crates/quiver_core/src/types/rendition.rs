use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use super::FileType;
use super::JSONObject;

/// The value of a rendition
///
/// Most renditions are source text; source maps and other structured outputs are kept as
/// JSON until a packager serializes them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RenditionValue {
  Text(String),
  Json(serde_json::Value),
}

impl RenditionValue {
  pub fn as_text(&self) -> Option<&str> {
    match self {
      RenditionValue::Text(text) => Some(text),
      RenditionValue::Json(_) => None,
    }
  }

  /// Serialized form used when the value is written to a bundle
  pub fn to_code(&self) -> String {
    match self {
      RenditionValue::Text(text) => text.clone(),
      RenditionValue::Json(value) => value.to_string(),
    }
  }

  pub fn len(&self) -> usize {
    match self {
      RenditionValue::Text(text) => text.len(),
      RenditionValue::Json(value) => value.to_string().len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl From<String> for RenditionValue {
  fn from(value: String) -> Self {
    RenditionValue::Text(value)
  }
}

impl From<&str> for RenditionValue {
  fn from(value: &str) -> Self {
    RenditionValue::Text(value.to_string())
  }
}

/// One typed output produced by an asset handler
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendition {
  #[serde(rename = "type")]
  pub file_type: FileType,

  pub value: RenditionValue,

  /// Final renditions are never re-processed by the handler of their type
  #[serde(default, rename = "final")]
  pub is_final: bool,

  /// Set to false when the value is known not to declare dependencies, which skips dependency
  /// collection when the rendition is processed by the handler of its type
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub has_dependencies: Option<bool>,

  #[serde(default)]
  pub meta: JSONObject,
}

impl Rendition {
  pub fn new(file_type: FileType, value: impl Into<RenditionValue>) -> Self {
    Rendition {
      file_type,
      value: value.into(),
      is_final: false,
      has_dependencies: None,
      meta: JSONObject::new(),
    }
  }

  pub fn final_rendition(file_type: FileType, value: impl Into<RenditionValue>) -> Self {
    Rendition {
      is_final: true,
      ..Rendition::new(file_type, value)
    }
  }

  pub fn without_dependencies(mut self) -> Self {
    self.has_dependencies = Some(false);
    self
  }
}

/// Mapping from output type to the value generated for it
pub type Generated = IndexMap<FileType, RenditionValue>;

/// Collapses a rendition list into the per-type mapping, the last rendition of a type wins
pub fn generated_from_renditions(renditions: &[Rendition]) -> Generated {
  let mut generated = Generated::new();
  for rendition in renditions {
    generated.insert(rendition.file_type.clone(), rendition.value.clone());
  }
  generated
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn untagged_values_round_trip_text_first() {
    let text: RenditionValue = serde_json::from_str("\"console.log(1)\"").unwrap();
    let json: RenditionValue = serde_json::from_str("{\"version\":3}").unwrap();

    assert_eq!(text.as_text(), Some("console.log(1)"));
    assert_eq!(json.to_code(), "{\"version\":3}");
  }

  #[test]
  fn last_rendition_of_a_type_wins() {
    let generated = generated_from_renditions(&[
      Rendition::new(FileType::Js, "a"),
      Rendition::new(FileType::Css, "b"),
      Rendition::new(FileType::Js, "c"),
    ]);

    assert_eq!(generated.len(), 2);
    assert_eq!(generated.get(&FileType::Js), Some(&RenditionValue::from("c")));
  }
}
