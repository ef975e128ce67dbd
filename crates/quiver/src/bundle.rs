//! Groups processed assets into output bundles, names them and writes them
//!
//! Bundles live in an arena owned by [`BundleTree`]. A bundle owns its children through
//! indices, its parent index is only a back-reference, so the tree cannot form cycles.
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use indexmap::IndexMap;
use indexmap::IndexSet;
use quiver_core::hash::hash_string;
use quiver_core::types::temporary_bundle_name;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::RenditionValue;
use quiver_filesystem::FileSystemRef;
use rayon::prelude::*;

use crate::graph::AssetGraph;
use crate::graph::AssetIdx;
use crate::packagers::PackageContext;
use crate::packagers::PackagerKind;
use crate::pipeline::relative_path;
use crate::pipeline::PipelineOptions;

pub type BundleIdx = usize;

#[derive(Clone, Debug, Default)]
pub struct Bundle {
  /// `None` for the root, which only groups the entry bundles
  pub file_type: Option<FileType>,

  /// Absolute output path, temporary until [`BundleTree::bundle_name_map`] assigns the
  /// final name
  pub name: Option<PathBuf>,

  pub parent: Option<BundleIdx>,

  /// Sibling bundles share the entry asset of their parent and have none of their own
  pub entry_asset: Option<AssetIdx>,

  pub assets: IndexSet<AssetIdx>,

  pub child_bundles: IndexSet<BundleIdx>,

  /// Children holding another output type of this bundle, such as its source map
  pub sibling_bundles: IndexSet<BundleIdx>,

  pub sibling_bundles_map: HashMap<FileType, BundleIdx>,

  /// Line of the bundle output each asset starts at
  pub offsets: HashMap<AssetIdx, usize>,

  /// Bytes each asset added to the output
  pub asset_sizes: IndexMap<AssetIdx, usize>,

  pub total_size: usize,

  pub bundle_time: Duration,
}

impl Bundle {
  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn offset(&self, asset: AssetIdx) -> usize {
    self.offsets.get(&asset).copied().unwrap_or(0)
  }
}

/// What packaging a bundle produced, applied to the tree once every bundle of a phase is done
#[derive(Debug)]
struct PackageReport {
  bundle: BundleIdx,
  offsets: HashMap<AssetIdx, usize>,
  asset_sizes: IndexMap<AssetIdx, usize>,
  total_size: usize,
  bundle_time: Duration,
}

#[derive(Debug)]
pub struct BundleTree {
  bundles: Vec<Bundle>,
  root: BundleIdx,
  out_dir: PathBuf,

  /// The bundle each asset was placed in first
  parent_bundle: HashMap<AssetIdx, BundleIdx>,

  /// Every bundle containing each asset
  asset_bundles: HashMap<AssetIdx, IndexSet<BundleIdx>>,
}

impl BundleTree {
  pub fn new(out_dir: &Path) -> Self {
    Self {
      bundles: vec![Bundle::default()],
      root: 0,
      out_dir: out_dir.to_path_buf(),
      parent_bundle: HashMap::new(),
      asset_bundles: HashMap::new(),
    }
  }

  /// Places the entries of `graph` and everything they depend on into bundles
  #[tracing::instrument(level = "debug", skip_all)]
  pub fn build(graph: &AssetGraph, out_dir: &Path) -> Self {
    let mut tree = BundleTree::new(out_dir);
    let root = tree.root;

    for entry in graph.entries() {
      tree.place(graph, *entry, root, None, &mut HashSet::new());
    }

    if tree.bundles[root].child_bundles.len() == 1 {
      if let Some(only) = tree.bundles[root].child_bundles.first() {
        tree.root = *only;
      }
    }

    tree
  }

  pub fn root(&self) -> BundleIdx {
    self.root
  }

  pub fn get(&self, bundle: BundleIdx) -> &Bundle {
    &self.bundles[bundle]
  }

  /// Bundles reachable from the root, parents before their children
  pub fn bundles(&self) -> Vec<BundleIdx> {
    let mut bundles = Vec::new();
    let mut stack = vec![self.root];

    while let Some(bundle) = stack.pop() {
      bundles.push(bundle);
      stack.extend(self.bundles[bundle].child_bundles.iter().rev());
    }

    bundles
  }

  pub fn parent_bundle(&self, asset: AssetIdx) -> Option<BundleIdx> {
    self.parent_bundle.get(&asset).copied()
  }

  pub fn bundles_of(&self, asset: AssetIdx) -> impl Iterator<Item = BundleIdx> + '_ {
    self
      .asset_bundles
      .get(&asset)
      .into_iter()
      .flat_map(|bundles| bundles.iter().copied())
  }

  /// Whether any bundle contains the asset
  pub fn contains(&self, asset: AssetIdx) -> bool {
    self
      .asset_bundles
      .get(&asset)
      .is_some_and(|bundles| !bundles.is_empty())
  }

  fn place(
    &mut self,
    graph: &AssetGraph,
    asset: AssetIdx,
    bundle: BundleIdx,
    dependency: Option<&Dependency>,
    parents: &mut HashSet<BundleIdx>,
  ) {
    let Some(graph_asset) = graph.get(asset).filter(|asset| asset.is_processed()) else {
      return;
    };
    let asset_type = graph_asset.file_type.clone();

    if let Some(current) = self.parent_bundle(asset) {
      if current == bundle {
        return;
      }

      // Shared assets move to the closest bundle both importers load
      let common = self.find_common_ancestor(bundle, current);
      let current_type = &self.bundles[current].file_type;
      if *current_type == self.bundles[common].file_type && *current_type == asset_type {
        self.move_asset_to_bundle(graph, asset, common);
        return;
      }

      if parents.contains(&current) {
        return;
      }
    }

    let is_entry_asset = self
      .parent_bundle(asset)
      .is_some_and(|current| self.bundles[current].entry_asset == Some(asset));

    let mut bundle = bundle;
    let dynamic = dependency.is_some_and(|dependency| dependency.dynamic);
    if dynamic || self.bundles[bundle].file_type.is_none() {
      if is_entry_asset {
        return;
      }
      bundle = self.create_child_bundle(graph, bundle, asset);
    } else if asset_type
      .as_ref()
      .is_some_and(|file_type| !PackagerKind::for_type(file_type, false).should_add_asset())
    {
      // The importer still needs the renditions referring to the copied file
      self.add_to_rendition_siblings(graph, bundle, asset);
      if is_entry_asset {
        return;
      }
      bundle = self.create_sibling_bundle(graph, bundle, asset);
    } else {
      let sibling = self.get_sibling_bundle(bundle, asset_type.clone());
      self.add_asset(sibling, asset);
    }

    if asset_type.as_ref().is_some_and(|file_type| {
      graph_asset
        .generated()
        .is_some_and(|generated| generated.contains_key(file_type))
    }) {
      self.add_to_rendition_siblings(graph, bundle, asset);
    }

    self.parent_bundle.insert(asset, bundle);
    parents.insert(bundle);

    for (dependency, target) in graph.dep_assets(asset) {
      self.place(graph, target, bundle, Some(dependency), parents);
    }

    parents.remove(&bundle);
  }

  /// Adds the asset to the sibling of `bundle` for each type it generated
  fn add_to_rendition_siblings(&mut self, graph: &AssetGraph, bundle: BundleIdx, asset: AssetIdx) {
    let types = graph
      .get(asset)
      .and_then(|asset| asset.generated())
      .map(|generated| generated.keys().cloned().collect::<Vec<_>>())
      .unwrap_or_default();

    for file_type in types {
      let sibling = self.get_sibling_bundle(bundle, Some(file_type));
      self.add_asset(sibling, asset);
    }
  }

  fn move_asset_to_bundle(&mut self, graph: &AssetGraph, asset: AssetIdx, common: BundleIdx) {
    // The entry of a bundle was requested to be in a bundle of its own
    let is_entry = self
      .bundles_of(asset)
      .any(|bundle| self.bundles[bundle].entry_asset == Some(asset));
    if is_entry {
      return;
    }

    let bundles = self.bundles_of(asset).collect::<Vec<_>>();
    for bundle in bundles {
      self.remove_asset(bundle, asset);
      let file_type = self.bundles[bundle].file_type.clone();
      let target = self.get_sibling_bundle(common, file_type);
      self.add_asset(target, asset);
    }

    let old_bundle = self.parent_bundle.insert(asset, common);
    for (_, child) in graph.dep_assets(asset) {
      if self.parent_bundle(child) == old_bundle {
        self.move_asset_to_bundle(graph, child, common);
      }
    }
  }

  fn add_asset(&mut self, bundle: BundleIdx, asset: AssetIdx) {
    self.bundles[bundle].assets.insert(asset);
    self.asset_bundles.entry(asset).or_default().insert(bundle);
  }

  fn remove_asset(&mut self, bundle: BundleIdx, asset: AssetIdx) {
    self.bundles[bundle].assets.shift_remove(&asset);
    if let Some(bundles) = self.asset_bundles.get_mut(&asset) {
      bundles.shift_remove(&bundle);
    }
  }

  fn push(&mut self, bundle: Bundle) -> BundleIdx {
    self.bundles.push(bundle);
    self.bundles.len() - 1
  }

  /// A bundle with `asset` as its entry, named after the temporary name of the asset
  pub fn create_with_asset(
    &mut self,
    graph: &AssetGraph,
    asset: AssetIdx,
    parent: Option<BundleIdx>,
  ) -> BundleIdx {
    let (file_type, name) = match graph.get(asset) {
      Some(graph_asset) => {
        let file_type = graph_asset.bundle_type().unwrap_or_default();
        let name = self
          .out_dir
          .join(temporary_bundle_name(&graph_asset.path, &file_type));
        (file_type, name)
      }
      None => (FileType::default(), self.out_dir.clone()),
    };

    let bundle = self.push(Bundle {
      file_type: Some(file_type),
      name: Some(name),
      parent,
      entry_asset: Some(asset),
      ..Bundle::default()
    });
    self.add_asset(bundle, asset);
    bundle
  }

  pub fn create_child_bundle(
    &mut self,
    graph: &AssetGraph,
    parent: BundleIdx,
    asset: AssetIdx,
  ) -> BundleIdx {
    let bundle = self.create_with_asset(graph, asset, Some(parent));
    self.bundles[parent].child_bundles.insert(bundle);
    bundle
  }

  pub fn create_sibling_bundle(
    &mut self,
    graph: &AssetGraph,
    parent: BundleIdx,
    asset: AssetIdx,
  ) -> BundleIdx {
    let bundle = self.create_child_bundle(graph, parent, asset);
    self.bundles[parent].sibling_bundles.insert(bundle);
    bundle
  }

  /// The bundle holding `file_type` output next to `bundle`, created on first use
  ///
  /// `None` and the type of `bundle` itself return `bundle`.
  pub fn get_sibling_bundle(&mut self, bundle: BundleIdx, file_type: Option<FileType>) -> BundleIdx {
    let Some(file_type) = file_type else {
      return bundle;
    };
    if self.bundles[bundle].file_type.as_ref() == Some(&file_type) {
      return bundle;
    }
    if let Some(sibling) = self.bundles[bundle].sibling_bundles_map.get(&file_type) {
      return *sibling;
    }

    let name = self.bundles[bundle]
      .name
      .as_ref()
      .map(|name| name.with_extension(file_type.extension()));

    let sibling = self.push(Bundle {
      file_type: Some(file_type.clone()),
      name,
      parent: Some(bundle),
      ..Bundle::default()
    });

    let parent = &mut self.bundles[bundle];
    parent.child_bundles.insert(sibling);
    parent.sibling_bundles.insert(sibling);
    parent.sibling_bundles_map.insert(file_type, sibling);
    sibling
  }

  fn ancestors(&self, bundle: BundleIdx) -> Vec<BundleIdx> {
    let mut ancestors = vec![bundle];
    let mut current = self.bundles[bundle].parent;
    while let Some(parent) = current {
      ancestors.push(parent);
      current = self.bundles[parent].parent;
    }
    ancestors
  }

  /// The last bundle both parent chains share, walking down from the root
  ///
  /// When one bundle descends from the other, that is the ancestor itself.
  pub fn find_common_ancestor(&self, a: BundleIdx, b: BundleIdx) -> BundleIdx {
    let mut ours = self.ancestors(a);
    let mut theirs = self.ancestors(b);

    let mut a = ours.pop();
    let mut b = theirs.pop();
    let mut last = None;

    while a == b && !ours.is_empty() && !theirs.is_empty() {
      last = a;
      a = ours.pop();
      b = theirs.pop();
    }

    if a == b {
      return a.unwrap_or(self.root);
    }

    last.unwrap_or(self.root)
  }

  /// Hash of the asset hashes of a bundle
  pub fn hash(&self, bundle: BundleIdx, graph: &AssetGraph) -> String {
    let hashes = self.bundles[bundle]
      .assets
      .iter()
      .filter_map(|asset| graph.get(*asset))
      .map(|asset| asset.hash())
      .collect::<String>();

    hash_string(&hashes)
  }

  /// Decides whether a bundle has to be written again
  ///
  /// Covers the names of child bundles too, which the bundle refers to by name.
  fn package_hash(&self, bundle: BundleIdx, graph: &AssetGraph) -> String {
    let mut input = self.hash(bundle, graph);
    for child in &self.bundles[bundle].child_bundles {
      if let Some(name) = &self.bundles[*child].name {
        input.push_str(&name.to_string_lossy());
      }
    }
    hash_string(&input)
  }

  /// Final file name of a bundle, relative to the output directory
  ///
  /// Entry bundles keep the path of their entry relative to the root directory. Other
  /// bundles are named `<name>.<hash>.<ext>`, where the hash covers the bundle contents with
  /// `content_hash` and the temporary name otherwise.
  pub fn hashed_bundle_name(
    &self,
    bundle: BundleIdx,
    graph: &AssetGraph,
    options: &PipelineOptions,
  ) -> Option<String> {
    let current = &self.bundles[bundle];
    let name = current.name.as_ref()?;

    let mut ext = name
      .extension()
      .map(|ext| format!(".{}", ext.to_string_lossy()))
      .unwrap_or_default();

    let hash_source = if options.build.content_hash {
      self.hash(bundle, graph)
    } else {
      file_stem(name)
    };
    let hash = &hash_source[hash_source.len().saturating_sub(8)..];

    let entry_asset = current
      .entry_asset
      .or_else(|| current.parent.and_then(|parent| self.bundles[parent].entry_asset))?;
    let entry_path = &graph.get(entry_asset)?.path;
    let mut base = file_stem(entry_path);

    let is_main_entry = options.entry_files.first() == Some(entry_path);
    let is_entry = options.entry_files.contains(entry_path)
      || graph
        .parent_deps(entry_asset)
        .iter()
        .any(|(_, dependency)| dependency.entry);

    if is_main_entry {
      if let Some(out_file) = &options.build.out_file {
        let out_file = Path::new(out_file);
        match out_file.extension() {
          Some(out_ext) => {
            if current.entry_asset.is_some() {
              ext = format!(".{}", out_ext.to_string_lossy());
            }
            base = file_stem(out_file);
          }
          None => base = out_file.to_string_lossy().to_string(),
        }
      }
    }

    if is_entry {
      let dir = entry_path.parent().unwrap_or(Path::new("/"));
      let relative = relative_path(&options.root_dir, dir);
      let joined = if relative.is_empty() {
        format!("{base}{ext}")
      } else {
        format!("{relative}/{base}{ext}")
      };
      return Some(joined.replace("../", "__/"));
    }

    if base == "index" {
      if let Some(dir) = entry_path.parent().and_then(|dir| dir.file_name()) {
        base = dir.to_string_lossy().to_string();
      }
    }

    Some(format!("{base}.{hash}{ext}"))
  }

  /// Renames every bundle to its final name, children before their parents
  ///
  /// Returns the temporary file names mapped to the final ones, for rewriting references
  /// made before the names were known.
  pub fn bundle_name_map(
    &mut self,
    graph: &AssetGraph,
    options: &PipelineOptions,
  ) -> IndexMap<String, String> {
    let mut names = IndexMap::new();
    self.assign_names(self.root, graph, options, &mut names);
    names
  }

  fn assign_names(
    &mut self,
    bundle: BundleIdx,
    graph: &AssetGraph,
    options: &PipelineOptions,
    names: &mut IndexMap<String, String>,
  ) {
    let children = self.bundles[bundle]
      .child_bundles
      .iter()
      .copied()
      .collect::<Vec<_>>();
    for child in children {
      self.assign_names(child, graph, options, names);
    }

    let Some(hashed) = self.hashed_bundle_name(bundle, graph, options) else {
      return;
    };

    if let Some(name) = self.bundles[bundle].name.take() {
      if let Some(file_name) = name.file_name() {
        names.insert(file_name.to_string_lossy().to_string(), hashed.clone());
      }
      let dir = name.parent().unwrap_or(&self.out_dir).to_path_buf();
      self.bundles[bundle].name = Some(dir.join(&hashed));
    }
  }

  /// Writes every changed bundle, source maps last since they need the final offsets of
  /// the bundles they map
  ///
  /// `old_hashes` are the hashes returned by the previous build. Returns the hash of every
  /// non-empty bundle by name.
  #[tracing::instrument(level = "debug", skip_all)]
  pub fn package(
    &mut self,
    graph: &AssetGraph,
    options: &PipelineOptions,
    fs: &FileSystemRef,
    old_hashes: &HashMap<PathBuf, String>,
  ) -> anyhow::Result<HashMap<PathBuf, String>> {
    let mut new_hashes = HashMap::new();
    let mut bundles = Vec::new();
    let mut maps = Vec::new();

    for bundle in self.bundles() {
      let current = &self.bundles[bundle];
      let Some(name) = current.name.clone() else {
        continue;
      };
      if current.is_empty() {
        continue;
      }

      let hash = self.package_hash(bundle, graph);
      if old_hashes.get(&name) == Some(&hash) {
        tracing::debug!("Skipping unchanged bundle {}", name.display());
      } else if current.file_type == Some(FileType::Map) {
        maps.push(bundle);
      } else {
        bundles.push(bundle);
      }
      new_hashes.insert(name, hash);
    }

    for phase in [bundles, maps] {
      let reports = {
        let ctx = PackageContext {
          graph,
          tree: &*self,
          options,
          fs,
        };

        phase
          .par_iter()
          .map(|bundle| package_bundle(&ctx, *bundle))
          .collect::<anyhow::Result<Vec<_>>>()?
      };

      for report in reports {
        let bundle = &mut self.bundles[report.bundle];
        bundle.offsets = report.offsets;
        bundle.asset_sizes = report.asset_sizes;
        bundle.total_size = report.total_size;
        bundle.bundle_time = report.bundle_time;
      }
    }

    Ok(new_hashes)
  }
}

fn package_bundle(ctx: &PackageContext<'_>, bundle: BundleIdx) -> anyhow::Result<PackageReport> {
  let started = Instant::now();
  let current = ctx.tree.get(bundle);
  let file_type = current.file_type.clone().unwrap_or_default();

  let mut packager = PackagerKind::for_type(&file_type, ctx.options.build.scope_hoist)
    .create(ctx.clone(), bundle);

  packager.setup()?;
  packager.start()?;

  let mut included = HashSet::new();
  let mut asset_sizes = IndexMap::new();
  for asset in &current.assets {
    add_deps(
      ctx,
      bundle,
      *asset,
      packager.as_mut(),
      &mut included,
      &mut asset_sizes,
    )?;
  }

  let packaged = packager.end()?;

  let assets_time = if file_type == FileType::Map {
    Duration::ZERO
  } else {
    let assets = current.assets.iter().filter_map(|asset| ctx.graph.get(*asset));
    let first = assets.clone().filter_map(|asset| asset.started).min();
    let last = assets.filter_map(|asset| asset.finished).max();
    match (first, last) {
      (Some(first), Some(last)) => last.saturating_duration_since(first),
      _ => Duration::ZERO,
    }
  };

  Ok(PackageReport {
    bundle,
    offsets: packaged.offsets,
    asset_sizes,
    total_size: packaged.size,
    bundle_time: assets_time + started.elapsed(),
  })
}

/// Adds an asset after everything it depends on, each asset at most once
fn add_deps(
  ctx: &PackageContext<'_>,
  bundle: BundleIdx,
  asset: AssetIdx,
  packager: &mut dyn crate::packagers::Packager,
  included: &mut HashSet<AssetIdx>,
  asset_sizes: &mut IndexMap<AssetIdx, usize>,
) -> anyhow::Result<()> {
  if !ctx.tree.get(bundle).assets.contains(&asset) || !included.insert(asset) {
    return Ok(());
  }

  for (_, dependency) in ctx.graph.dep_assets(asset) {
    add_deps(ctx, bundle, dependency, packager, included, asset_sizes)?;
  }

  let before = packager.size();
  packager.add_asset(asset)?;
  let size = packager.size().saturating_sub(before);
  if size > 0 {
    asset_sizes.insert(asset, size);
  }

  Ok(())
}

/// Replaces temporary bundle names in the generated text of an asset
pub fn replace_bundle_names(
  value: &RenditionValue,
  names: &IndexMap<String, String>,
) -> RenditionValue {
  match value {
    RenditionValue::Text(text) => {
      let mut text = text.clone();
      for (temporary, name) in names {
        if text.contains(temporary.as_str()) {
          text = text.replace(temporary.as_str(), name);
        }
      }
      RenditionValue::Text(text)
    }
    RenditionValue::Json(_) => value.clone(),
  }
}

fn file_stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().to_string())
    .unwrap_or_default()
}
