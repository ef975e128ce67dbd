//! The `pipeline` worker module, and the operations workers call on the coordinator
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use quiver_farm::Farm;
use quiver_farm::FarmHandle;
use quiver_farm::FarmOptions;
use quiver_farm::MasterCallerRef;
use quiver_farm::MasterOperations;
use quiver_farm::ModuleFactory;
use quiver_farm::ModuleRegistry;
use quiver_farm::WorkerModule;
use quiver_farm::WorkerSpawner;
use quiver_filesystem::FileSystemRef;
use serde_json::json;
use serde_json::Value;

use crate::logging::emit;
use crate::logging::LogEvent;
use crate::pipeline::HandlerRegistry;
use crate::pipeline::Pipeline;
use crate::pipeline::PipelineContext;
use crate::pipeline::PipelineOptions;
use crate::resolver::NodeResolver;

/// Name workers register the pipeline module under
pub const PIPELINE_MODULE: &str = "pipeline";

/// Processes asset paths with a pipeline built from the options sent on `init`
pub struct PipelineWorker {
  fs: FileSystemRef,
  master: MasterCallerRef,
  pipeline: RwLock<Option<Arc<Pipeline>>>,
}

impl PipelineWorker {
  pub fn new(fs: FileSystemRef, master: MasterCallerRef) -> Self {
    Self {
      fs,
      master,
      pipeline: RwLock::new(None),
    }
  }

  fn pipeline(&self) -> anyhow::Result<Arc<Pipeline>> {
    self
      .pipeline
      .read()
      .clone()
      .ok_or_else(|| anyhow!("The pipeline worker has not been initialized"))
  }

  /// Asks the coordinator to install packages a handler could not find
  ///
  /// Installs are serialized by the coordinator, so concurrent workers never race on the
  /// same package manifest.
  pub async fn install_package(&self, modules: &[String], from: &Path) -> anyhow::Result<()> {
    self
      .master
      .call("installPackage", vec![json!(modules), json!(from)])
      .await?;

    Ok(())
  }
}

#[async_trait]
impl WorkerModule for PipelineWorker {
  async fn init(&self, options: Value) -> anyhow::Result<()> {
    let options: PipelineOptions = serde_json::from_value(options)?;
    let registry = Arc::new(HandlerRegistry::new(&options.build.extensions)?);
    let resolver = NodeResolver::new(self.fs.clone(), options.root_dir.clone())
      .with_extensions(registry.extensions().map(|extension| extension.to_string()));

    tracing::debug!(
      root_dir = %options.root_dir.display(),
      "Initializing pipeline"
    );

    let pipeline = Pipeline::new(PipelineContext {
      fs: self.fs.clone(),
      options: Arc::new(options),
      registry,
      resolver: Arc::new(resolver),
    });

    *self.pipeline.write() = Some(Arc::new(pipeline));
    Ok(())
  }

  async fn run(&self, input: Value, is_warm_up: bool) -> anyhow::Result<Value> {
    let path: PathBuf = serde_json::from_value(input)?;
    let pipeline = self.pipeline()?;

    let processed =
      tokio::task::spawn_blocking(move || pipeline.process(&path, is_warm_up)).await??;

    Ok(serde_json::to_value(processed)?)
  }
}

/// Starts a farm of pipeline workers on the current runtime
///
/// `fs` backs the local worker. Remote workers come from `spawner` and bring their own.
pub fn start_farm(
  options: FarmOptions,
  spawner: Arc<dyn WorkerSpawner>,
  fs: FileSystemRef,
) -> FarmHandle {
  let factory: ModuleFactory = Arc::new(move |master: MasterCallerRef| -> Arc<dyn WorkerModule> {
    Arc::new(PipelineWorker::new(fs.clone(), master))
  });

  Farm::start(
    options,
    spawner,
    PIPELINE_MODULE,
    factory,
    Arc::new(QuiverMaster::default()),
  )
}

/// Modules a worker process hosts
pub fn worker_modules(fs: FileSystemRef) -> ModuleRegistry {
  ModuleRegistry::default().register(
    PIPELINE_MODULE,
    move |master: MasterCallerRef| -> Arc<dyn WorkerModule> {
      Arc::new(PipelineWorker::new(fs.clone(), master))
    },
  )
}

/// Installs packages on behalf of workers
#[mockall::automock]
pub trait PackageInstaller: Send + Sync {
  fn install(&self, modules: &[String], from: &Path) -> anyhow::Result<()>;
}

/// Refuses every install, packages have to be installed before building
#[derive(Debug, Default)]
pub struct RefusingInstaller;

impl PackageInstaller for RefusingInstaller {
  fn install(&self, modules: &[String], from: &Path) -> anyhow::Result<()> {
    Err(anyhow!(
      "Cannot install {} required by {}, install it and build again",
      modules.join(", "),
      from.display()
    ))
  }
}

/// What the coordinator does when a worker calls back into it
pub struct QuiverMaster {
  installer: Arc<dyn PackageInstaller>,
}

impl QuiverMaster {
  pub fn new(installer: Arc<dyn PackageInstaller>) -> Self {
    Self { installer }
  }
}

impl Default for QuiverMaster {
  fn default() -> Self {
    Self::new(Arc::new(RefusingInstaller))
  }
}

#[async_trait]
impl MasterOperations for QuiverMaster {
  async fn handle(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    match method {
      "log" => {
        for event in args {
          emit(&serde_json::from_value::<LogEvent>(event)?);
        }
        Ok(Value::Null)
      }
      "installPackage" => {
        let mut args = args.into_iter();
        let modules: Vec<String> = serde_json::from_value(args.next().unwrap_or_default())?;
        let from: PathBuf = serde_json::from_value(args.next().unwrap_or_default())?;

        self.installer.install(&modules, &from)?;
        Ok(Value::Null)
      }
      method => Err(anyhow!("Unknown master operation {method}")),
    }
  }
}
