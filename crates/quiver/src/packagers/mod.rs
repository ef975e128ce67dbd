//! Serializers that turn a bundle's assets into its output file
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use quiver_core::types::FileType;
use quiver_filesystem::FileSystemRef;
use serde_json::Value;

pub use self::generic::GenericPackager;
pub use self::js::JsPackager;
pub use self::js_concat::JsConcatPackager;
pub use self::raw::RawPackager;
pub use self::source_map::SourceMapPackager;
use crate::bundle::BundleIdx;
use crate::bundle::BundleTree;
use crate::graph::AssetGraph;
use crate::graph::AssetIdx;
use crate::pipeline::PipelineOptions;

mod generic;
mod js;
mod js_concat;
mod raw;
mod source_map;

/// The module loader shared by script bundles
const PRELUDE: &str = include_str!("../builtins/prelude.js");

/// The loader of concatenated bundles, which exposes module exports rather than factories
const HOISTED_PRELUDE: &str = include_str!("../builtins/hoisted-prelude.js");

/// Functions referenced by scope hoisted modules
const HELPERS: &str = include_str!("../builtins/helpers.js");

/// What the bundle tree shares with every packager
#[derive(Clone)]
pub struct PackageContext<'a> {
  pub graph: &'a AssetGraph,
  pub tree: &'a BundleTree,
  pub options: &'a PipelineOptions,
  pub fs: &'a FileSystemRef,
}

impl PackageContext<'_> {
  /// File name of a bundle, as other bundles refer to it
  pub fn bundle_file_name(&self, bundle: BundleIdx) -> Option<String> {
    self
      .tree
      .get(bundle)
      .name
      .as_deref()
      .and_then(Path::file_name)
      .map(|name| name.to_string_lossy().to_string())
  }

  /// What a dynamic import of `target` loads: the bundle of the target, its non-empty
  /// siblings other than source maps, then the module id
  pub fn bundle_specifier(&self, target: AssetIdx) -> Value {
    let mut specifier = Vec::new();

    if let Some(bundle) = self.tree.parent_bundle(target) {
      specifier.extend(self.bundle_file_name(bundle).map(Value::String));

      for sibling in &self.tree.get(bundle).sibling_bundles {
        let current = self.tree.get(*sibling);
        if current.is_empty() || current.file_type == Some(FileType::Map) {
          continue;
        }
        specifier.extend(self.bundle_file_name(*sibling).map(Value::String));
      }
    }

    let id = self
      .graph
      .get(target)
      .map(|asset| asset.id().to_string())
      .unwrap_or_default();
    specifier.push(Value::String(id));

    Value::Array(specifier)
  }

  /// `//# sourceMappingURL=` comment pointing at the map sibling of a bundle, if any
  pub fn source_mapping_url(&self, bundle: BundleIdx) -> Option<String> {
    if !self.options.build.source_maps {
      return None;
    }

    let map = self
      .tree
      .get(bundle)
      .sibling_bundles_map
      .get(&FileType::Map)?;
    if self.tree.get(*map).is_empty() {
      return None;
    }

    let name = self.bundle_file_name(*map)?;
    Some(format!(
      "\n//# sourceMappingURL={}",
      crate::handlers::url_join(&self.options.build.public_url, &name)
    ))
  }
}

/// What packaging a bundle wrote
#[derive(Debug, Default, PartialEq)]
pub struct Packaged {
  pub size: usize,

  /// Line of the output each asset starts at
  pub offsets: HashMap<AssetIdx, usize>,
}

/// Writes one bundle
///
/// The bundle tree calls `setup` and `start`, then `add_asset` once per asset with
/// dependencies before their dependents, then `end`.
pub trait Packager {
  fn setup(&mut self) -> anyhow::Result<()> {
    Ok(())
  }

  fn start(&mut self) -> anyhow::Result<()> {
    Ok(())
  }

  fn add_asset(&mut self, asset: AssetIdx) -> anyhow::Result<()>;

  /// Bytes written so far
  fn size(&self) -> usize;

  fn end(self: Box<Self>) -> anyhow::Result<Packaged>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PackagerKind {
  Generic,
  Js,
  JsConcat,
  Raw,
  SourceMap,
}

impl PackagerKind {
  pub fn for_type(file_type: &FileType, scope_hoist: bool) -> Self {
    match file_type {
      FileType::Css | FileType::Html => PackagerKind::Generic,
      FileType::Js if scope_hoist => PackagerKind::JsConcat,
      FileType::Js => PackagerKind::Js,
      FileType::Map => PackagerKind::SourceMap,
      FileType::Json | FileType::Other(_) => PackagerKind::Raw,
    }
  }

  /// Raw files cannot share a bundle, each one is written to a bundle of its own
  pub fn should_add_asset(&self) -> bool {
    *self != PackagerKind::Raw
  }

  pub fn create<'a>(self, ctx: PackageContext<'a>, bundle: BundleIdx) -> Box<dyn Packager + 'a> {
    match self {
      PackagerKind::Generic => Box::new(GenericPackager::new(ctx, bundle)),
      PackagerKind::Js => Box::new(JsPackager::new(ctx, bundle)),
      PackagerKind::JsConcat => Box::new(JsConcatPackager::new(ctx, bundle)),
      PackagerKind::Raw => Box::new(RawPackager::new(ctx, bundle)),
      PackagerKind::SourceMap => Box::new(SourceMapPackager::new(ctx, bundle)),
    }
  }
}

/// Buffers the output of a bundle and writes it in one go
#[derive(Debug)]
pub struct BundleWriter {
  fs: FileSystemRef,
  path: PathBuf,
  contents: String,
  lines: usize,
}

impl BundleWriter {
  pub fn new(fs: &FileSystemRef, path: &Path) -> Self {
    Self {
      fs: fs.clone(),
      path: path.to_path_buf(),
      contents: String::new(),
      lines: 0,
    }
  }

  pub fn write(&mut self, text: &str) {
    self.lines += text.matches('\n').count();
    self.contents.push_str(text);
  }

  pub fn len(&self) -> usize {
    self.contents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.contents.is_empty()
  }

  /// Zero based line the next write starts on
  pub fn line(&self) -> usize {
    self.lines
  }

  /// Writes the buffered output, returning its size
  pub fn finish(self) -> anyhow::Result<usize> {
    write_file(&self.fs, &self.path, self.contents.as_bytes())?;
    Ok(self.contents.len())
  }
}

pub(crate) fn write_file(fs: &FileSystemRef, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
  if let Some(dir) = path.parent() {
    fs.create_dir_all(dir)?;
  }

  fs.write(path, contents)?;
  Ok(())
}

/// Output path of a bundle, failing for the unnamed root
pub(crate) fn bundle_path(ctx: &PackageContext<'_>, bundle: BundleIdx) -> anyhow::Result<PathBuf> {
  ctx
    .tree
    .get(bundle)
    .name
    .clone()
    .ok_or_else(|| anyhow::anyhow!("Cannot package a bundle without a name"))
}


#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;

  use super::*;

  #[test]
  fn picks_packagers_by_type() {
    assert_eq!(PackagerKind::for_type(&FileType::Css, false), PackagerKind::Generic);
    assert_eq!(PackagerKind::for_type(&FileType::Js, false), PackagerKind::Js);
    assert_eq!(PackagerKind::for_type(&FileType::Js, true), PackagerKind::JsConcat);
    assert_eq!(PackagerKind::for_type(&FileType::Map, true), PackagerKind::SourceMap);
    assert_eq!(
      PackagerKind::for_type(&FileType::Other(String::from("png")), false),
      PackagerKind::Raw
    );
    assert!(!PackagerKind::Raw.should_add_asset());
    assert!(PackagerKind::Js.should_add_asset());
  }

  #[test]
  fn writers_count_lines_and_create_directories() {
    let fs: FileSystemRef = std::sync::Arc::new(InMemoryFileSystem::default());
    let mut writer = BundleWriter::new(&fs, Path::new("/out/nested/a.js"));

    writer.write("a\nb\n");
    assert_eq!(writer.line(), 2);
    writer.write("c");
    assert_eq!(writer.len(), 5);

    assert_eq!(writer.finish().unwrap(), 5);
    assert_eq!(fs.read_to_string(Path::new("/out/nested/a.js")).unwrap(), "a\nb\nc");
  }
}
