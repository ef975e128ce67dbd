use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use quiver_core::types::asset_id;
use quiver_core::types::temporary_bundle_name;
use quiver_core::types::Dependencies;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::JSONObject;
use quiver_core::types::Rendition;

use super::Ast;
use super::PipelineContext;
use super::PipelineOptions;
use crate::resolver::PackageJson;

/// An asset while it moves through the pipeline
///
/// Sub-assets, which re-process a rendition with the handler of its type, share the id,
/// dependencies and cache data of the asset that generated them.
#[derive(Clone, Debug)]
pub struct Asset {
  pub id: String,

  /// Absolute path of the source file
  pub name: PathBuf,

  /// Path relative to the root directory, with forward slashes
  pub relative_name: String,

  pub file_type: Option<FileType>,

  pub contents: Option<String>,

  pub ast: Option<Ast>,

  /// Map from the transformed contents back to the source, set by handlers that rewrite
  pub source_map: Option<serde_json::Value>,

  pub dependencies: Dependencies,

  pub cache_data: JSONObject,

  /// The rendition this asset was created from, when it is a sub-asset
  pub rendition: Option<Rendition>,

  /// Output of the last `generate`
  pub renditions: Vec<Rendition>,

  pub hash: String,

  pub is_warm_up: bool,

  pub options: Arc<PipelineOptions>,

  package: Option<Option<PackageJson>>,
}

impl Asset {
  pub fn new(name: &Path, file_type: Option<FileType>, options: Arc<PipelineOptions>) -> Self {
    let relative_name = relative_path(&options.root_dir, name);
    let id = asset_id(
      &relative_name,
      options.build.production,
      options.build.scope_hoist,
    );

    Asset {
      id,
      name: name.to_path_buf(),
      relative_name,
      file_type,
      contents: None,
      ast: None,
      source_map: None,
      dependencies: Dependencies::default(),
      cache_data: JSONObject::new(),
      rendition: None,
      renditions: Vec::new(),
      hash: String::new(),
      is_warm_up: false,
      options,
      package: None,
    }
  }

  /// An asset re-processing a rendition of this one
  ///
  /// Dependencies and cache data move to the sub-asset, and have to be moved back once it
  /// has been processed.
  pub fn sub_asset(&mut self, rendition: Rendition, file_type: Option<FileType>) -> Asset {
    Asset {
      id: self.id.clone(),
      name: self.name.clone(),
      relative_name: self.relative_name.clone(),
      file_type,
      contents: rendition.value.as_text().map(|text| text.to_string()),
      ast: None,
      source_map: None,
      dependencies: std::mem::take(&mut self.dependencies),
      cache_data: std::mem::take(&mut self.cache_data),
      rendition: Some(rendition),
      renditions: Vec::new(),
      hash: String::new(),
      is_warm_up: self.is_warm_up,
      options: self.options.clone(),
      package: self.package.clone(),
    }
  }

  pub fn add_dependency(&mut self, dependency: Dependency) {
    self.dependencies.add(dependency);
  }

  /// Adds a dependency on a referenced file, such as an image in a stylesheet
  ///
  /// The file becomes a bundle of its own. Returns the reference rewritten to the temporary
  /// name of that bundle, which is replaced by the final name once bundles are named.
  /// Absolute URLs, data URIs and fragments are returned unchanged.
  pub fn add_url_dependency(&mut self, url: &str, ctx: &PipelineContext) -> String {
    if url.is_empty() || is_url(url) {
      return url.to_string();
    }

    let (path, suffix) = match url.find(['?', '#']) {
      Some(index) => url.split_at(index),
      None => (url, ""),
    };

    let dir = self.name.parent().unwrap_or(Path::new("/"));
    let (dependency_name, resolved) = if path.starts_with('/') || path.starts_with('~') {
      let resolved = ctx
        .resolver
        .resolve(path, &self.name)
        .unwrap_or_else(|_| self.options.root_dir.join(path.trim_start_matches(['/', '~'])));
      (resolved.to_string_lossy().to_string(), resolved)
    } else {
      let resolved = crate::resolver::normalize_path(&dir.join(path));
      (format!("./{}", relative_path(dir, &resolved)), resolved)
    };

    self.add_dependency(Dependency::dynamic(dependency_name));

    let handler = ctx.registry.find(&resolved, false);
    let file_type = handler
      .asset_type(&resolved)
      .unwrap_or_else(|| FileType::from_path(&resolved));

    format!("{}{}", temporary_bundle_name(&resolved, &file_type), suffix)
  }

  /// The nearest package manifest of the asset, looked up once
  pub fn package(&mut self, ctx: &PipelineContext) -> anyhow::Result<Option<&PackageJson>> {
    if self.package.is_none() {
      let dir = self.name.parent().unwrap_or(Path::new("/"));
      self.package = Some(ctx.resolver.find_package(dir)?);
    }

    Ok(self.package.as_ref().and_then(|package| package.as_ref()))
  }

  /// Text of the source, empty when nothing was loaded
  pub fn code(&self) -> &str {
    self.contents.as_deref().unwrap_or_default()
  }
}

/// Forward slash path of `path` relative to `base`
pub fn relative_path(base: &Path, path: &Path) -> String {
  pathdiff::diff_paths(path, base)
    .unwrap_or_else(|| path.to_path_buf())
    .to_string_lossy()
    .replace('\\', "/")
}

fn is_url(url: &str) -> bool {
  url.starts_with("data:")
    || url.starts_with('#')
    || url.starts_with("//")
    || url
      .split_once(':')
      .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_core::types::BuildOptions;

  use super::*;

  fn options(production: bool) -> Arc<PipelineOptions> {
    Arc::new(PipelineOptions {
      build: BuildOptions {
        production,
        ..BuildOptions::default()
      },
      root_dir: PathBuf::from("/app"),
      entry_files: vec![PathBuf::from("/app/src/a.js")],
    })
  }

  #[test]
  fn ids_are_relative_paths_in_development() {
    let asset = Asset::new(Path::new("/app/src/a.js"), Some(FileType::Js), options(false));

    assert_eq!(asset.id, "src/a.js");
    assert_eq!(asset.relative_name, "src/a.js");
  }

  #[test]
  fn ids_are_short_hashes_in_production() {
    let asset = Asset::new(Path::new("/app/src/a.js"), Some(FileType::Js), options(true));

    assert_eq!(asset.id.len(), 4);
    assert_ne!(asset.id, "src/a.js");
  }

  #[test]
  fn sub_assets_take_over_shared_state() {
    let mut asset = Asset::new(Path::new("/app/a.json"), Some(FileType::Json), options(false));
    asset.add_dependency(Dependency::new("./b"));

    let sub = asset.sub_asset(Rendition::new(FileType::Js, "module.exports = 1;"), Some(FileType::Js));

    assert_eq!(sub.id, asset.id);
    assert_eq!(sub.dependencies.len(), 1);
    assert!(asset.dependencies.is_empty());
    assert_eq!(sub.code(), "module.exports = 1;");
  }

  #[test]
  fn detects_urls() {
    assert!(is_url("https://example.com/a.png"));
    assert!(is_url("data:image/png;base64,AAAA"));
    assert!(is_url("#icon"));
    assert!(!is_url("./a.png"));
    assert!(!is_url("images/a.png"));
  }
}
