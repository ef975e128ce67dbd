use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// The options a build is run with
///
/// These are sent to every worker on `init`, so everything here must be serializable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOptions {
  /// Entry files, absolute or relative to the project root. Glob patterns are allowed.
  pub entries: Vec<PathBuf>,

  pub project_root: PathBuf,

  pub out_dir: PathBuf,

  /// Overrides the output file name of the primary entry bundle
  pub out_file: Option<String>,

  #[serde(rename = "publicURL")]
  pub public_url: String,

  /// Whether processed assets are read from and written to the content cache
  pub cache: bool,

  pub cache_dir: PathBuf,

  /// Derive non-entry bundle names from their content rather than their entry path
  pub content_hash: bool,

  pub minify: bool,

  pub hmr: bool,

  pub target: BuildTarget,

  pub scope_hoist: bool,

  pub source_maps: bool,

  pub production: bool,

  pub log_level: LogLevel,

  /// Number of worker processes, defaults to the number of physical cores
  pub workers: Option<usize>,

  /// Extra extension to handler name mappings, such as `{ "mjs": "js" }`
  pub extensions: BTreeMap<String, String>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      entries: Vec::new(),
      project_root: PathBuf::from("."),
      out_dir: PathBuf::from("dist"),
      out_file: None,
      public_url: String::from("/"),
      cache: true,
      cache_dir: PathBuf::from(".cache"),
      content_hash: false,
      minify: false,
      hmr: false,
      target: BuildTarget::default(),
      scope_hoist: false,
      source_maps: true,
      production: false,
      log_level: LogLevel::default(),
      workers: None,
      extensions: BTreeMap::new(),
    }
  }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTarget {
  #[default]
  Browser,
  Node,
}

impl Display for BuildTarget {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BuildTarget::Browser => write!(f, "browser"),
      BuildTarget::Node => write!(f, "node"),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  #[default]
  Error,
  Info,
  None,
  Verbose,
  Warn,
}
