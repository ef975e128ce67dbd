use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use indexmap::IndexMap;
use parking_lot::Mutex;
use quiver_cache::CacheRef;
use quiver_cache::ContentCache;
use quiver_core::diagnostic::CodeFrame;
use quiver_core::diagnostic::CodeHighlight;
use quiver_core::diagnostic::Diagnostic;
use quiver_core::task_queue::TaskQueue;
use quiver_core::task_queue::TaskQueueOptions;
use quiver_core::types::BuildOptions;
use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::ProcessedAsset;
use quiver_farm::FarmHandle;
use quiver_filesystem::is_glob;
use quiver_filesystem::FileSystemRef;

use crate::bundle::replace_bundle_names;
use crate::bundle::BundleTree;
use crate::error::pretty_error;
use crate::error::QuiverError;
use crate::graph::AssetGraph;
use crate::graph::AssetIdx;
use crate::notifier::BuildNotifier;
use crate::notifier::ChangedAsset;
use crate::pipeline::HandlerRegistry;
use crate::pipeline::PipelineOptions;
use crate::resolver::normalize_path;
use crate::resolver::NodeResolver;
use crate::resolver::ResolverRef;
use crate::WatchEventType;
use crate::WatchEvents;

/// An asset loaded by the current build, waiting to be added to the graph
#[derive(Debug)]
struct LoadedAsset {
  path: PathBuf,
  processed: ProcessedAsset,

  /// Dependency names and the paths they resolved to
  resolved: Vec<(String, PathBuf)>,

  from_cache: bool,
  started: Instant,
  finished: Instant,
}

/// Loads assets for the task queue, from the cache or through the worker farm
struct Loader {
  cache: Option<CacheRef>,
  farm: FarmHandle,
  fs: FileSystemRef,
  registry: Arc<HandlerRegistry>,
  resolver: ResolverRef,

  /// Paths queued by any build so far, so each is only loaded once until invalidated
  seen: Mutex<HashSet<PathBuf>>,

  loaded: Mutex<Vec<LoadedAsset>>,
}

impl Loader {
  #[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
  async fn load(self: Arc<Self>, path: PathBuf, queue: TaskQueue<PathBuf>) -> anyhow::Result<()> {
    let started = Instant::now();

    // Cache entries and resolution both hit the file system
    let cached = {
      let loader = self.clone();
      let path = path.clone();
      tokio::task::spawn_blocking(move || loader.read_cache(&path)).await?
    };

    let from_cache = cached.is_some();
    let processed = match cached {
      Some(processed) => processed,
      None => {
        let output = self.farm.run(serde_json::to_value(&path)?).await?;
        let processed: ProcessedAsset = serde_json::from_value(output)?;
        match self.cache.clone() {
          Some(cache) => {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
              cache.write(&path, &processed);
              processed
            })
            .await?
          }
          None => processed,
        }
      }
    };

    let loader = self.clone();
    let (path, processed, resolved) = tokio::task::spawn_blocking(move || {
      let resolved = loader.resolve_dependencies(&path, &processed, &queue)?;
      anyhow::Ok((path, processed, resolved))
    })
    .await??;

    self.loaded.lock().push(LoadedAsset {
      path,
      processed,
      resolved,
      from_cache,
      started,
      finished: Instant::now(),
    });

    Ok(())
  }

  fn read_cache(&self, path: &Path) -> Option<ProcessedAsset> {
    let handler = self.registry.find(path, false);

    self
      .cache
      .as_ref()
      .and_then(|cache| cache.read(path))
      .filter(|cached| !handler.should_invalidate(&cached.cache_data))
  }

  /// Resolves the dependencies of an asset, queueing targets no build has seen yet
  fn resolve_dependencies(
    &self,
    path: &Path,
    processed: &ProcessedAsset,
    queue: &TaskQueue<PathBuf>,
  ) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut resolved = Vec::new();
    for dependency in processed.dependencies.iter() {
      // Inlined files are watched, not loaded
      if dependency.included_in_parent {
        continue;
      }

      match self.resolver.resolve(&dependency.name, path) {
        Ok(target) => {
          if self.seen.lock().insert(target.clone()) {
            queue.add(target.clone(), ());
          }
          resolved.push((dependency.name.clone(), target));
        }
        Err(error) if dependency.optional => {
          tracing::debug!("Skipping optional dependency {}: {error}", dependency.name);
        }
        Err(error) => return Err(self.resolve_error(path, dependency, error)),
      }
    }

    Ok(resolved)
  }

  /// Points a resolution failure at the import that caused it
  fn resolve_error(&self, path: &Path, dependency: &Dependency, error: anyhow::Error) -> anyhow::Error {
    let diagnostic = error
      .downcast_ref::<Diagnostic>()
      .cloned()
      .unwrap_or_else(|| Diagnostic::new(format!("{error:#}")).with_origin("quiver::resolver"));

    let code_frame = match &dependency.loc {
      Some(loc) => CodeFrame {
        code: self.fs.read_to_string(path).ok(),
        file_path: Some(path.to_path_buf()),
        code_highlights: vec![CodeHighlight::from(loc.clone())],
      },
      None => CodeFrame::from(path.to_path_buf()),
    };

    anyhow::Error::new(diagnostic.with_code_frame(code_frame))
  }
}

/// What a bundle of the last build looks like
#[derive(Clone, Debug, PartialEq)]
pub struct BundleReport {
  pub name: PathBuf,
  pub file_type: Option<FileType>,
  pub assets: usize,
  pub size: usize,
  pub time: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildReport {
  pub bundles: Vec<BundleReport>,

  /// Assets processed by the pipeline
  pub processed: usize,

  /// Assets read back from the cache
  pub cached: usize,

  pub duration: Duration,
}

/// Builds the entries of a project into bundles, and rebuilds them when files change
///
/// The bundler owns the asset graph. Loading is spread over the worker farm it is given,
/// which stays alive between builds so rebuilds reuse idle workers.
pub struct Bundler {
  options: Arc<PipelineOptions>,
  fs: FileSystemRef,
  farm: FarmHandle,
  loader: Arc<Loader>,
  queue: TaskQueue<PathBuf>,
  graph: AssetGraph,
  tree: Option<BundleTree>,

  /// Hashes of the bundles written by the last build, by output path
  bundle_hashes: HashMap<PathBuf, String>,

  notifier: Option<Arc<dyn BuildNotifier>>,
  error: Option<QuiverError>,
  farm_initialized: bool,
}

impl Bundler {
  pub fn new(options: BuildOptions, fs: FileSystemRef, farm: FarmHandle) -> anyhow::Result<Self> {
    let options = Arc::new(pipeline_options(options, &fs)?);
    let registry = Arc::new(HandlerRegistry::new(&options.build.extensions)?);
    let resolver = NodeResolver::new(fs.clone(), options.root_dir.clone())
      .with_extensions(registry.extensions().map(|extension| extension.to_string()));

    let cache = options.build.cache.then(|| {
      let cache: CacheRef = Arc::new(ContentCache::new(fs.clone(), &options.build));
      cache
    });

    let loader = Arc::new(Loader {
      cache,
      farm: farm.clone(),
      fs: fs.clone(),
      registry,
      resolver: Arc::new(resolver),
      seen: Mutex::new(HashSet::new()),
      loaded: Mutex::new(Vec::new()),
    });

    let queue = {
      let loader = loader.clone();
      TaskQueue::new(TaskQueueOptions::default(), move |path, (), queue| {
        let loader = loader.clone();
        async move { loader.load(path, queue).await }
      })
    };

    Ok(Self {
      options,
      fs,
      farm,
      loader,
      queue,
      graph: AssetGraph::new(),
      tree: None,
      bundle_hashes: HashMap::new(),
      notifier: None,
      error: None,
      farm_initialized: false,
    })
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn BuildNotifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  pub fn options(&self) -> &PipelineOptions {
    &self.options
  }

  pub fn graph(&self) -> &AssetGraph {
    &self.graph
  }

  /// Bundles of the last successful build
  pub fn bundles(&self) -> Option<&BundleTree> {
    self.tree.as_ref()
  }

  /// Error of the last build, until a build succeeds
  pub fn error(&self) -> Option<&QuiverError> {
    self.error.as_ref()
  }

  /// Loads everything not loaded yet, then bundles and writes the output
  ///
  /// Failures are reported to the notifier before being returned.
  #[tracing::instrument(level = "info", skip_all)]
  pub async fn build(&mut self) -> anyhow::Result<BuildReport> {
    let started = Instant::now();

    match self.try_build(started).await {
      Ok(report) => {
        tracing::info!(
          processed = report.processed,
          cached = report.cached,
          "Built in {:.2?}",
          report.duration
        );
        Ok(report)
      }
      Err(error) => {
        let quiver_error = QuiverError::from(&error);
        let pretty = pretty_error(&quiver_error);
        match &pretty.stack {
          Some(stack) => tracing::error!("{}\n{stack}", pretty.message),
          None => tracing::error!("{}", pretty.message),
        }

        if let Some(notifier) = &self.notifier {
          notifier.emit_error(&quiver_error);
        }

        self.error = Some(quiver_error);
        Err(error)
      }
    }
  }

  /// Invalidates what changed, then builds again
  pub async fn rebuild(&mut self, events: WatchEvents) -> anyhow::Result<BuildReport> {
    for event in events {
      let path = normalize_path(&event.path);
      tracing::debug!("{} {:?}", path.display(), event.kind);

      match event.kind {
        WatchEventType::Delete => self.unload(&path),
        WatchEventType::Create | WatchEventType::Update => self.invalidate(&path),
      }
    }

    self.build().await
  }

  /// Stops the workers
  pub async fn end(&self) -> anyhow::Result<()> {
    self.farm.end().await
  }

  async fn try_build(&mut self, started: Instant) -> anyhow::Result<BuildReport> {
    if !self.farm_initialized {
      self.farm.init(serde_json::to_value(&*self.options)?).await?;
      self.farm_initialized = true;
    }

    for entry in &self.options.entry_files {
      if self.loader.seen.lock().insert(entry.clone()) {
        self.queue.add(entry.clone(), ());
      }
    }

    self.queue.run().await?;

    let loaded = std::mem::take(&mut *self.loader.loaded.lock());
    let cached = loaded.iter().filter(|asset| asset.from_cache).count();
    let processed = loaded.len() - cached;
    let changed = self.add_loaded(loaded);

    let entries = self
      .options
      .entry_files
      .iter()
      .filter_map(|entry| self.graph.find_by_path(entry))
      .collect();
    self.graph.set_entries(entries);

    let mut tree = BundleTree::build(&self.graph, &self.options.build.out_dir);
    let names = tree.bundle_name_map(&self.graph, &self.options);
    self.apply_bundle_names(&names);

    self.bundle_hashes = tree.package(&self.graph, &self.options, &self.fs, &self.bundle_hashes)?;
    self.unload_orphans(&tree);

    if self.tree.is_some() || self.error.is_some() {
      if let Some(notifier) = &self.notifier {
        let assets = changed
          .into_iter()
          .filter(|asset| tree.contains(*asset))
          .filter_map(|asset| self.changed_asset(asset))
          .collect::<Vec<_>>();
        notifier.emit_update(&assets);
      }
    }

    let bundles = tree
      .bundles()
      .into_iter()
      .map(|bundle| tree.get(bundle))
      .filter(|bundle| !bundle.is_empty())
      .filter_map(|bundle| {
        Some(BundleReport {
          name: bundle.name.clone()?,
          file_type: bundle.file_type.clone(),
          assets: bundle.assets.len(),
          size: bundle.total_size,
          time: bundle.bundle_time,
        })
      })
      .collect();

    self.tree = Some(tree);
    self.error = None;

    Ok(BuildReport {
      bundles,
      processed,
      cached,
      duration: started.elapsed(),
    })
  }

  /// Adds the assets loaded by this build to the graph and links their dependencies
  fn add_loaded(&mut self, loaded: Vec<LoadedAsset>) -> Vec<AssetIdx> {
    let mut added = Vec::with_capacity(loaded.len());
    let mut links = Vec::new();

    for asset in loaded {
      let file_type = self.asset_type(&asset.path);
      let idx = self.graph.add_asset(&asset.path, file_type);
      self.graph.set_processed(idx, asset.processed);

      if let Some(graph_asset) = self.graph.get_mut(idx) {
        graph_asset.started = Some(asset.started);
        graph_asset.finished = Some(asset.finished);
      }

      links.push((idx, asset.resolved));
      added.push(idx);
    }

    for (parent, resolved) in links {
      for (name, path) in resolved {
        let file_type = self.asset_type(&path);
        let target = self.graph.add_asset(&path, file_type);
        self.graph.link(parent, &name, target);
      }
    }

    added
  }

  fn asset_type(&self, path: &Path) -> Option<FileType> {
    self.loader.registry.find(path, false).asset_type(path)
  }

  /// Rewrites temporary bundle names in every asset's output
  fn apply_bundle_names(&mut self, names: &IndexMap<String, String>) {
    let assets = self
      .graph
      .assets()
      .map(|(idx, _)| idx)
      .collect::<Vec<_>>();

    for idx in assets {
      let Some(asset) = self.graph.get_mut(idx) else {
        continue;
      };
      let Some(processed) = &asset.processed else {
        continue;
      };

      asset.output = processed
        .generated
        .iter()
        .map(|(file_type, value)| (file_type.clone(), replace_bundle_names(value, names)))
        .collect();
    }
  }

  /// Forgets assets no bundle needs anymore
  fn unload_orphans(&mut self, tree: &BundleTree) {
    let orphans = self
      .graph
      .assets()
      .filter(|(idx, _)| !tree.contains(*idx))
      .map(|(idx, _)| idx)
      .collect::<Vec<_>>();

    for idx in orphans {
      if let Some(asset) = self.graph.remove(idx) {
        tracing::debug!("Unloading {}", asset.path.display());
        self.loader.seen.lock().remove(&asset.path);
      }
    }
  }

  fn changed_asset(&self, idx: AssetIdx) -> Option<ChangedAsset> {
    let asset = self.graph.get(idx)?;

    let deps = self
      .graph
      .dep_assets(idx)
      .into_iter()
      .filter_map(|(dependency, target)| {
        let target = self.graph.get(target)?;
        Some((dependency.name.clone(), target.id().to_string()))
      })
      .collect();

    Some(ChangedAsset {
      id: asset.id().to_string(),
      file_type: asset.bundle_type(),
      generated: asset.output.clone(),
      deps,
    })
  }

  /// Queues a changed file again, along with every asset that inlined it
  fn invalidate(&mut self, path: &Path) {
    let mut assets = self.graph.inlined_by(path);
    assets.extend(self.graph.find_by_path(path));

    for idx in assets {
      self.reload(idx);
    }
  }

  fn reload(&mut self, idx: AssetIdx) {
    let Some(path) = self.graph.get(idx).map(|asset| asset.path.clone()) else {
      return;
    };

    if let Some(cache) = &self.loader.cache {
      cache.invalidate(&path);
    }

    self.graph.invalidate(idx);
    self.loader.seen.lock().insert(path.clone());
    self.queue.add(path, ());
  }

  /// Drops a deleted file, reloading its importers so they resolve their dependencies again
  fn unload(&mut self, path: &Path) {
    if let Some(cache) = &self.loader.cache {
      cache.delete(path);
    }

    let mut parents = self.graph.inlined_by(path);
    if let Some(idx) = self.graph.find_by_path(path) {
      parents.extend(self.graph.parent_deps(idx).into_iter().map(|(parent, _)| parent));
      self.graph.remove(idx);
    }
    self.loader.seen.lock().remove(path);

    for parent in parents {
      self.reload(parent);
    }
  }
}

/// Resolves the entries and directories of a build against its project root
fn pipeline_options(mut build: BuildOptions, fs: &FileSystemRef) -> anyhow::Result<PipelineOptions> {
  let project_root = normalize_path(&fs.cwd()?.join(&build.project_root));

  let mut entry_files = Vec::new();
  for entry in &build.entries {
    let path = normalize_path(&project_root.join(entry));
    let pattern = path.to_string_lossy();

    if is_glob(&pattern) {
      entry_files.extend(fs.glob(&pattern)?);
    } else {
      entry_files.push(path);
    }
  }

  let root_dir = common_dir(&entry_files)
    .ok_or_else(|| anyhow!("No entries found in {}", project_root.display()))?;

  build.out_dir = normalize_path(&project_root.join(&build.out_dir));
  build.project_root = project_root;

  Ok(PipelineOptions {
    build,
    root_dir,
    entry_files,
  })
}

/// The deepest directory containing every path
fn common_dir(paths: &[PathBuf]) -> Option<PathBuf> {
  let mut dir = paths.first()?.parent()?.to_path_buf();

  for path in &paths[1..] {
    while !path.starts_with(&dir) {
      if !dir.pop() {
        break;
      }
    }
  }

  Some(dir)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_farm::Child;
  use quiver_farm::FarmOptions;
  use quiver_farm::InProcessSpawner;
  use quiver_farm::ModuleRegistry;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;
  use quiver_filesystem::FileSystem;

  use super::*;
  use crate::notifier::HmrHub;
  use crate::worker::start_farm;
  use crate::WatchEvent;

  fn project(files: &[(&str, &str)]) -> Arc<InMemoryFileSystem> {
    let fs = Arc::new(InMemoryFileSystem::default());
    for (path, contents) in files {
      fs.write_file(Path::new(path), contents.to_string());
    }
    fs
  }

  fn local_farm(fs: &FileSystemRef) -> FarmHandle {
    start_farm(
      FarmOptions {
        max_concurrent_workers: 1,
        ..FarmOptions::default()
      },
      Arc::new(InProcessSpawner::new(|| Child::new(ModuleRegistry::default()))),
      fs.clone(),
    )
  }

  fn options(entries: &[&str]) -> BuildOptions {
    BuildOptions {
      entries: entries.iter().map(PathBuf::from).collect(),
      project_root: PathBuf::from("/app"),
      source_maps: false,
      ..BuildOptions::default()
    }
  }

  fn bundler(fs: &Arc<InMemoryFileSystem>, options: BuildOptions) -> Bundler {
    let fs: FileSystemRef = fs.clone();
    Bundler::new(options, fs.clone(), local_farm(&fs)).unwrap()
  }

  fn read(fs: &InMemoryFileSystem, path: &str) -> String {
    fs.read_to_string(Path::new(path)).unwrap()
  }

  #[test]
  fn entries_are_resolved_against_the_project_root() {
    let fs: FileSystemRef = project(&[
      ("/app/src/a.js", ""),
      ("/app/src/pages/b.js", ""),
      ("/app/src/pages/c.js", ""),
    ]);

    let options = pipeline_options(options(&["src/a.js", "src/pages/*.js"]), &fs).unwrap();

    assert_eq!(
      options.entry_files,
      vec![
        PathBuf::from("/app/src/a.js"),
        PathBuf::from("/app/src/pages/b.js"),
        PathBuf::from("/app/src/pages/c.js"),
      ]
    );
    assert_eq!(options.root_dir, PathBuf::from("/app/src"));
    assert_eq!(options.build.out_dir, PathBuf::from("/app/dist"));
  }

  #[test]
  fn missing_entries_fail() {
    let fs: FileSystemRef = project(&[]);

    assert!(pipeline_options(options(&["src/*.js"]), &fs).is_err());
  }

  #[tokio::test]
  async fn builds_scripts_and_styles_into_sibling_bundles() {
    let fs = project(&[
      ("/app/src/a.js", "const b = require('./b');\nconsole.log(b);"),
      ("/app/src/b.js", "require('./c.css');\nmodule.exports = 'b';"),
      ("/app/src/c.css", ".c { color: red; }"),
    ]);
    let mut bundler = bundler(&fs, options(&["src/a.js"]));

    let report = bundler.build().await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.cached, 0);
    assert_eq!(
      report
        .bundles
        .iter()
        .map(|bundle| (bundle.name.clone(), bundle.file_type.clone()))
        .collect::<Vec<_>>(),
      vec![
        (PathBuf::from("/app/dist/a.js"), Some(FileType::Js)),
        (PathBuf::from("/app/dist/a.css"), Some(FileType::Css)),
      ]
    );

    let script = read(&fs, "/app/dist/a.js");
    let b = script.find("module.exports = 'b';").unwrap();
    let a = script.find("console.log(b);").unwrap();
    assert!(b < a);
    assert_eq!(read(&fs, "/app/dist/a.css"), ".c { color: red; }");
  }

  #[tokio::test]
  async fn unchanged_rebuilds_come_from_the_cache() {
    let fs = project(&[
      ("/app/src/a.js", "require('./b');"),
      ("/app/src/b.js", "module.exports = 1;"),
    ]);

    bundler(&fs, options(&["src/a.js"])).build().await.unwrap();
    let report = bundler(&fs, options(&["src/a.js"])).build().await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.cached, 2);
  }

  /// Records the threads that stat files
  #[derive(Debug)]
  struct StatThreads {
    inner: Arc<InMemoryFileSystem>,
    threads: Mutex<Vec<std::thread::ThreadId>>,
  }

  impl StatThreads {
    fn record(&self) {
      self.threads.lock().push(std::thread::current().id());
    }
  }

  impl FileSystem for StatThreads {
    fn cwd(&self) -> std::io::Result<PathBuf> {
      self.inner.cwd()
    }

    fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
      self.inner.canonicalize(path)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
      self.inner.create_dir_all(path)
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
      self.inner.read(path)
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
      self.inner.read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
      self.inner.write(path, contents)
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
      self.inner.remove_file(path)
    }

    fn modified(&self, path: &Path) -> std::io::Result<std::time::SystemTime> {
      self.record();
      self.inner.modified(path)
    }

    fn is_file(&self, path: &Path) -> bool {
      self.record();
      self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
      self.record();
      self.inner.is_dir(path)
    }

    fn glob(&self, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
      self.inner.glob(pattern)
    }
  }

  #[tokio::test]
  async fn cache_and_resolver_work_stays_off_the_runtime_thread() {
    let runtime_thread = std::thread::current().id();
    let stats = Arc::new(StatThreads {
      inner: project(&[
        ("/app/src/a.js", "require('./b');"),
        ("/app/src/b.js", "module.exports = 1;"),
      ]),
      threads: Mutex::new(Vec::new()),
    });
    let fs: FileSystemRef = stats.clone();

    for expected_cached in [0, 2] {
      let mut bundler = Bundler::new(options(&["src/a.js"]), fs.clone(), local_farm(&fs)).unwrap();
      stats.threads.lock().clear();

      let report = bundler.build().await.unwrap();

      assert_eq!(report.cached, expected_cached);
      let threads = std::mem::take(&mut *stats.threads.lock());
      assert!(!threads.is_empty());
      assert!(threads.iter().all(|thread| *thread != runtime_thread));
    }
  }

  #[tokio::test]
  async fn rebuilds_reload_changed_files() {
    let fs = project(&[
      ("/app/src/a.js", "require('./b');"),
      ("/app/src/b.js", "module.exports = 1;"),
    ]);
    let hub = Arc::new(HmrHub::new());
    let mut bundler = bundler(&fs, options(&["src/a.js"])).with_notifier(hub.clone());
    bundler.build().await.unwrap();
    let mut events = hub.subscribe();

    fs.write_file(Path::new("/app/src/b.js"), "module.exports = 2;");
    let report = bundler
      .rebuild(vec![WatchEvent::update("/app/src/b.js")])
      .await
      .unwrap();

    assert_eq!(report.processed, 1);
    assert!(read(&fs, "/app/dist/a.js").contains("module.exports = 2;"));

    let update: serde_json::Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
    assert_eq!(update["type"], "update");
    assert_eq!(update["assets"][0]["id"], "b.js");
  }

  #[tokio::test]
  async fn resolution_failures_point_at_the_import() {
    let fs = project(&[("/app/src/a.js", "const b = require('./missing');")]);
    let hub = Arc::new(HmrHub::new());
    let mut bundler = bundler(&fs, options(&["src/a.js"])).with_notifier(hub.clone());

    let error = bundler.build().await.unwrap_err();

    let diagnostic = error.downcast_ref::<Diagnostic>().unwrap();
    assert!(diagnostic.message.starts_with("Cannot resolve dependency './missing'"));
    assert_eq!(
      diagnostic.file_path(),
      Some(&PathBuf::from("/app/src/a.js"))
    );
    assert!(bundler.error().is_some());

    let mut events = hub.subscribe();
    let replayed: serde_json::Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
    assert_eq!(replayed["type"], "error");

    fs.write_file(Path::new("/app/src/missing.js"), "module.exports = 1;");
    fs.write_file(Path::new("/app/src/a.js"), "const b = require('./missing');\n");
    bundler
      .rebuild(vec![WatchEvent::update("/app/src/a.js")])
      .await
      .unwrap();

    assert!(bundler.error().is_none());
    let resolved: serde_json::Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
    assert_eq!(resolved["type"], "error-resolved");
  }

  #[tokio::test]
  async fn deleted_imports_are_unloaded() {
    let fs = project(&[
      ("/app/src/a.js", "require('./b');"),
      ("/app/src/b.js", "require('./c');"),
      ("/app/src/c.js", "module.exports = 'c';"),
    ]);
    let mut bundler = bundler(&fs, options(&["src/a.js"]));
    bundler.build().await.unwrap();
    assert_eq!(bundler.graph().len(), 3);

    fs.write_file(Path::new("/app/src/b.js"), "module.exports = 'b';");
    bundler
      .rebuild(vec![WatchEvent::update("/app/src/b.js")])
      .await
      .unwrap();

    assert_eq!(bundler.graph().len(), 2);
    assert!(bundler
      .graph()
      .find_by_path(Path::new("/app/src/c.js"))
      .is_none());
    assert!(!read(&fs, "/app/dist/a.js").contains("module.exports = 'c';"));
  }

  #[tokio::test]
  async fn unchanged_bundles_are_not_written_again() {
    let fs = project(&[
      ("/app/src/a.js", "import('./lazy');"),
      ("/app/src/lazy.js", "module.exports = 1;"),
    ]);
    let mut bundler = bundler(&fs, options(&["src/a.js"]));
    bundler.build().await.unwrap();

    let lazy = bundler
      .bundles()
      .unwrap()
      .bundles()
      .into_iter()
      .filter_map(|bundle| bundler.bundles().unwrap().get(bundle).name.clone())
      .find(|name| name.to_string_lossy().contains("lazy."))
      .unwrap();
    fs.write_file(&lazy, "overwritten");

    fs.write_file(Path::new("/app/src/a.js"), "import('./lazy');\nconsole.log(1);");
    bundler
      .rebuild(vec![WatchEvent::update("/app/src/a.js")])
      .await
      .unwrap();

    assert_eq!(read(&fs, &lazy.to_string_lossy()), "overwritten");
    assert!(read(&fs, "/app/dist/a.js").contains("console.log(1);"));
  }

  #[test]
  fn common_dir_of_nested_paths() {
    assert_eq!(
      common_dir(&[
        PathBuf::from("/app/src/a/x.js"),
        PathBuf::from("/app/src/b/y.js"),
      ]),
      Some(PathBuf::from("/app/src"))
    );
    assert_eq!(common_dir(&[]), None);
  }
}
