use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// The operations a worker hosts
///
/// One instance lives in every worker process, and one more in the coordinator for calls that
/// run locally while remote workers warm up.
#[async_trait]
pub trait WorkerModule: Send + Sync {
  /// Called with the serialized build options before any call to `run`, and again whenever
  /// the options change
  async fn init(&self, options: Value) -> anyhow::Result<()>;

  async fn run(&self, input: Value, is_warm_up: bool) -> anyhow::Result<Value>;
}

/// Operations workers invoke on the coordinator
#[async_trait]
pub trait MasterOperations: Send + Sync {
  async fn handle(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}

/// Calls from a worker module into the coordinator
///
/// Inside a worker process calls travel over the worker channel. For the local worker they
/// are invoked directly.
#[async_trait]
pub trait MasterCaller: Send + Sync {
  async fn call(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;

  /// Fire-and-forget call, no response is sent back
  fn notify(&self, method: &str, args: Vec<Value>);
}

pub type MasterCallerRef = Arc<dyn MasterCaller>;

pub type ModuleFactory = Arc<dyn Fn(MasterCallerRef) -> Arc<dyn WorkerModule> + Send + Sync>;

/// Worker modules by name, `childInit` selects one of these
#[derive(Clone, Default)]
pub struct ModuleRegistry {
  modules: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
  pub fn register<F>(mut self, name: &str, factory: F) -> Self
  where
    F: Fn(MasterCallerRef) -> Arc<dyn WorkerModule> + Send + Sync + 'static,
  {
    self.modules.insert(name.to_string(), Arc::new(factory));
    self
  }

  pub fn get(&self, name: &str) -> Option<&ModuleFactory> {
    self.modules.get(name)
  }
}

/// Calls the coordinator's operations in-process
pub struct LocalMasterCaller {
  master: Arc<dyn MasterOperations>,
}

impl LocalMasterCaller {
  pub fn new(master: Arc<dyn MasterOperations>) -> Self {
    Self { master }
  }
}

#[async_trait]
impl MasterCaller for LocalMasterCaller {
  async fn call(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    self.master.handle(method, args).await
  }

  fn notify(&self, method: &str, args: Vec<Value>) {
    let master = self.master.clone();
    let method = method.to_string();
    tokio::spawn(async move {
      if let Err(error) = master.handle(&method, args).await {
        tracing::debug!("Master operation {method} failed: {error}");
      }
    });
  }
}
