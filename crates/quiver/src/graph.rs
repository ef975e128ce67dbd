//! The assets of a build and the dependency edges between them
//!
//! Edges point from the importing asset to the asset a dependency resolved to and carry the
//! dependency name. The reverse direction stands in for the parent dependencies of an asset,
//! so cycles between assets never turn into ownership cycles.
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

use glob_match::glob_match;
use indexmap::IndexSet;
use petgraph::stable_graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::Generated;
use quiver_core::types::JSONObject;
use quiver_core::types::ProcessedAsset;
use quiver_filesystem::is_glob;

pub type AssetIdx = NodeIndex;

#[derive(Clone, Debug)]
pub struct GraphAsset {
  pub path: PathBuf,

  /// Type of the bundles the asset joins, `None` joins bundles of any type
  pub file_type: Option<FileType>,

  /// Set once the pipeline processed the asset, cleared on invalidation
  pub processed: Option<ProcessedAsset>,

  /// `generated` with temporary bundle names replaced by final ones
  ///
  /// Kept apart from `processed` so final names never reach the cache.
  pub output: Generated,

  pub started: Option<Instant>,
  pub finished: Option<Instant>,
}

impl GraphAsset {
  fn new(path: PathBuf, file_type: Option<FileType>) -> Self {
    Self {
      path,
      file_type,
      processed: None,
      output: Generated::new(),
      started: None,
      finished: None,
    }
  }

  pub fn is_processed(&self) -> bool {
    self.processed.is_some()
  }

  pub fn id(&self) -> &str {
    self
      .processed
      .as_ref()
      .map(|processed| processed.id.as_str())
      .unwrap_or_default()
  }

  pub fn hash(&self) -> &str {
    self
      .processed
      .as_ref()
      .map(|processed| processed.hash.as_str())
      .unwrap_or_default()
  }

  pub fn generated(&self) -> Option<&Generated> {
    self.processed.as_ref().map(|processed| &processed.generated)
  }

  pub fn cache_data(&self) -> Option<&JSONObject> {
    self.processed.as_ref().map(|processed| &processed.cache_data)
  }

  pub fn dependency(&self, name: &str) -> Option<&Dependency> {
    self
      .processed
      .as_ref()
      .and_then(|processed| processed.dependencies.get(name))
  }

  /// The type the asset is bundled as, falling back to its first rendition
  pub fn bundle_type(&self) -> Option<FileType> {
    self.file_type.clone().or_else(|| {
      self
        .generated()
        .and_then(|generated| generated.keys().next().cloned())
    })
  }
}

#[derive(Debug, Default)]
pub struct AssetGraph {
  graph: StableDiGraph<GraphAsset, String>,
  by_path: HashMap<PathBuf, AssetIdx>,
  by_id: HashMap<String, AssetIdx>,

  /// Files inlined into their parents, mapped to the assets inlining them
  inlined: HashMap<PathBuf, IndexSet<AssetIdx>>,

  entries: Vec<AssetIdx>,
}

impl AssetGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// The asset of `path`, added unprocessed when it is not in the graph yet
  pub fn add_asset(&mut self, path: &Path, file_type: Option<FileType>) -> AssetIdx {
    if let Some(idx) = self.by_path.get(path) {
      return *idx;
    }

    let idx = self
      .graph
      .add_node(GraphAsset::new(path.to_path_buf(), file_type));
    self.by_path.insert(path.to_path_buf(), idx);
    idx
  }

  pub fn get(&self, idx: AssetIdx) -> Option<&GraphAsset> {
    self.graph.node_weight(idx)
  }

  pub fn get_mut(&mut self, idx: AssetIdx) -> Option<&mut GraphAsset> {
    self.graph.node_weight_mut(idx)
  }

  pub fn find_by_path(&self, path: &Path) -> Option<AssetIdx> {
    self.by_path.get(path).copied()
  }

  pub fn find_by_id(&self, id: &str) -> Option<AssetIdx> {
    self.by_id.get(id).copied()
  }

  pub fn assets(&self) -> impl Iterator<Item = (AssetIdx, &GraphAsset)> {
    self
      .graph
      .node_indices()
      .filter_map(|idx| self.graph.node_weight(idx).map(|asset| (idx, asset)))
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn set_entries(&mut self, entries: Vec<AssetIdx>) {
    self.entries = entries;
  }

  pub fn entries(&self) -> &[AssetIdx] {
    &self.entries
  }

  /// Stores the pipeline output of an asset, replacing its previous dependency edges
  pub fn set_processed(&mut self, idx: AssetIdx, processed: ProcessedAsset) {
    self.clear_dependencies(idx);

    for dependency in processed.dependencies.iter() {
      if dependency.included_in_parent {
        self
          .inlined
          .entry(PathBuf::from(&dependency.name))
          .or_default()
          .insert(idx);
      }
    }

    self.by_id.insert(processed.id.clone(), idx);
    if let Some(asset) = self.graph.node_weight_mut(idx) {
      asset.output = processed.generated.clone();
      asset.processed = Some(processed);
    }
  }

  /// Links the dependency `name` of `parent` to the asset it resolved to
  pub fn link(&mut self, parent: AssetIdx, name: &str, target: AssetIdx) {
    let existing = self
      .graph
      .edges(parent)
      .find(|edge| edge.weight() == name)
      .map(|edge| edge.id());

    if let Some(edge) = existing {
      self.graph.remove_edge(edge);
    }

    self.graph.add_edge(parent, target, name.to_string());
  }

  /// The asset a dependency of `parent` resolved to
  pub fn dep_asset(&self, parent: AssetIdx, name: &str) -> Option<AssetIdx> {
    self
      .graph
      .edges(parent)
      .find(|edge| edge.weight() == name)
      .map(|edge| edge.target())
  }

  /// Resolved dependencies of an asset, in declaration order
  pub fn dep_assets(&self, idx: AssetIdx) -> Vec<(&Dependency, AssetIdx)> {
    let Some(processed) = self.get(idx).and_then(|asset| asset.processed.as_ref()) else {
      return Vec::new();
    };

    processed
      .dependencies
      .iter()
      .filter_map(|dependency| {
        self
          .dep_asset(idx, &dependency.name)
          .map(|target| (dependency, target))
      })
      .collect()
  }

  /// Dependencies pointing at an asset, as `(parent, dependency)` pairs
  pub fn parent_deps(&self, idx: AssetIdx) -> Vec<(AssetIdx, &Dependency)> {
    self
      .graph
      .edges_directed(idx, Direction::Incoming)
      .filter_map(|edge| {
        let dependency = self.get(edge.source())?.dependency(edge.weight())?;
        Some((edge.source(), dependency))
      })
      .collect()
  }

  /// Assets that inlined the file at `path`, directly or through a glob pattern
  pub fn inlined_by(&self, path: &Path) -> Vec<AssetIdx> {
    let file = path.to_string_lossy();
    let mut assets = IndexSet::new();

    for (inlined, parents) in &self.inlined {
      let pattern = inlined.to_string_lossy();
      if inlined == path || (is_glob(&pattern) && glob_match(&pattern, &file)) {
        assets.extend(parents.iter().copied());
      }
    }

    assets.into_iter().collect()
  }

  /// Forgets the pipeline output of an asset, so it is processed again
  pub fn invalidate(&mut self, idx: AssetIdx) {
    self.clear_dependencies(idx);

    if let Some(asset) = self.graph.node_weight_mut(idx) {
      asset.processed = None;
      asset.output = Generated::new();
    }
  }

  /// Removes an asset and every edge touching it
  pub fn remove(&mut self, idx: AssetIdx) -> Option<GraphAsset> {
    self.clear_dependencies(idx);

    let asset = self.graph.remove_node(idx)?;
    self.by_path.remove(&asset.path);
    if let Some(processed) = &asset.processed {
      self.by_id.remove(&processed.id);
    }
    self.entries.retain(|entry| *entry != idx);

    Some(asset)
  }

  fn clear_dependencies(&mut self, idx: AssetIdx) {
    let edges = self
      .graph
      .edges(idx)
      .map(|edge| edge.id())
      .collect::<Vec<_>>();

    for edge in edges {
      self.graph.remove_edge(edge);
    }

    self.inlined.retain(|_, assets| {
      assets.shift_remove(&idx);
      !assets.is_empty()
    });
  }
}
