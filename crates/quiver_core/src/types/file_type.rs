use std::fmt::Display;
use std::hash::Hash;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

/// Represents a file type by its extension
///
/// Defaults to `FileType::Js` for convenience.
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum FileType {
  Css,
  Html,
  #[default]
  Js,
  Json,
  Map,
  Other(String),
}

impl Serialize for FileType {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.extension().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FileType {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let ext: String = Deserialize::deserialize(deserializer)?;
    Ok(Self::from_extension(&ext))
  }
}

impl Display for FileType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.extension())
  }
}

impl FileType {
  pub fn extension(&self) -> &str {
    match self {
      FileType::Css => "css",
      FileType::Html => "html",
      FileType::Js => "js",
      FileType::Json => "json",
      FileType::Map => "map",
      FileType::Other(s) => s.as_str(),
    }
  }

  pub fn from_extension(ext: &str) -> Self {
    match ext {
      "js" | "mjs" | "cjs" | "jsx" => FileType::Js,
      "css" => FileType::Css,
      "json" => FileType::Json,
      "html" | "htm" => FileType::Html,
      "map" => FileType::Map,
      ext => FileType::Other(ext.to_string()),
    }
  }

  pub fn from_path(path: &Path) -> Self {
    path
      .extension()
      .map(|ext| Self::from_extension(&ext.to_string_lossy()))
      .unwrap_or_else(|| FileType::Other(String::new()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_script_extensions() {
    assert_eq!(FileType::from_extension("mjs"), FileType::Js);
    assert_eq!(FileType::from_extension("htm"), FileType::Html);
    assert_eq!(
      FileType::from_extension("png"),
      FileType::Other(String::from("png"))
    );
  }

  #[test]
  fn serializes_as_extension() {
    assert_eq!(serde_json::to_string(&FileType::Css).unwrap(), "\"css\"");
    assert_eq!(
      serde_json::from_str::<FileType>("\"map\"").unwrap(),
      FileType::Map
    );
  }
}
