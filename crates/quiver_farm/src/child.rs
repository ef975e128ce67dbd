use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::methods;
use crate::protocol::decode;
use crate::protocol::write_message;
use crate::FarmError;
use crate::MasterCaller;
use crate::MasterCallerRef;
use crate::Message;
use crate::ModuleRegistry;
use crate::Request;
use crate::Response;
use crate::WorkerModule;

/// Calls into the coordinator a worker may have awaiting a response at once
const MAX_CONCURRENT_CALLS: usize = 10;

type Reply = oneshot::Sender<anyhow::Result<Value>>;

struct QueuedCall {
  method: String,
  args: Vec<Value>,
  reply: Option<Reply>,
}

#[derive(Default)]
struct ReverseCalls {
  queue: VecDeque<QueuedCall>,
  awaiting: HashMap<u64, Reply>,
  next_idx: u64,
}

/// Messages leaving the worker, and the calls into the coordinator awaiting a response
struct Outbox {
  outgoing: mpsc::UnboundedSender<Message>,
  child_id: AtomicU64,
  calls: Mutex<ReverseCalls>,
}

impl Outbox {
  fn send(&self, message: Message) {
    if self.outgoing.send(message).is_err() {
      tracing::debug!("Worker channel is closed, dropping message");
    }
  }

  fn add_call(&self, call: QueuedCall) {
    self.calls.lock().queue.push_back(call);
    self.process_queue();
  }

  fn process_queue(&self) {
    let mut calls = self.calls.lock();
    while calls.awaiting.len() < MAX_CONCURRENT_CALLS {
      let Some(call) = calls.queue.pop_front() else {
        break;
      };

      // Only calls that expect an answer are correlated
      let await_response = call.reply.is_some();
      let idx = call.reply.map(|reply| {
        let idx = calls.next_idx;
        calls.next_idx += 1;
        calls.awaiting.insert(idx, reply);
        idx
      });

      self.send(Message::Request(Request {
        idx,
        child: self.child_id.load(Ordering::Relaxed),
        method: call.method,
        args: call.args,
        await_response,
      }));
    }
  }

  fn handle_response(&self, response: Response) {
    let reply = self.calls.lock().awaiting.remove(&response.idx);
    match reply {
      Some(reply) => {
        let _ = reply.send(response.into_result());
      }
      None => tracing::debug!("Received a response for unknown call {}", response.idx),
    }

    self.process_queue();
  }
}

/// Calls into the coordinator over the worker channel
struct ChildMasterCaller {
  outbox: Arc<Outbox>,
}

#[async_trait]
impl MasterCaller for ChildMasterCaller {
  async fn call(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    let (tx, rx) = oneshot::channel();
    self.outbox.add_call(QueuedCall {
      method: method.to_string(),
      args,
      reply: Some(tx),
    });

    rx.await.map_err(|_| FarmError::Dropped)?
  }

  fn notify(&self, method: &str, args: Vec<Value>) {
    self.outbox.add_call(QueuedCall {
      method: method.to_string(),
      args,
      reply: None,
    });
  }
}

struct ChildInner {
  modules: ModuleRegistry,
  module: RwLock<Option<Arc<dyn WorkerModule>>>,
  outbox: Arc<Outbox>,
}

impl ChildInner {
  fn module(&self) -> anyhow::Result<Arc<dyn WorkerModule>> {
    self
      .module
      .read()
      .clone()
      .ok_or_else(|| anyhow!("Worker module has not been initialized"))
  }

  fn child_init(&self, request: &Request) -> anyhow::Result<Value> {
    let name = request
      .args
      .first()
      .and_then(Value::as_str)
      .context("childInit expects a module name")?;

    let factory = self
      .modules
      .get(name)
      .with_context(|| format!("Unknown worker module {name}"))?;

    let master: MasterCallerRef = Arc::new(ChildMasterCaller {
      outbox: self.outbox.clone(),
    });

    *self.module.write() = Some(factory(master));
    self.outbox.child_id.store(request.child, Ordering::Relaxed);

    Ok(Value::Null)
  }

  async fn dispatch(&self, request: &Request) -> anyhow::Result<Value> {
    let first = || request.args.first().cloned().unwrap_or(Value::Null);

    match request.method.as_str() {
      methods::CHILD_INIT => self.child_init(request),
      methods::INIT => {
        self.module()?.init(first()).await?;
        Ok(Value::Null)
      }
      methods::RUN => {
        let is_warm_up = request
          .args
          .get(1)
          .and_then(Value::as_bool)
          .unwrap_or(false);

        self.module()?.run(first(), is_warm_up).await
      }
      method => Err(anyhow!("Unknown worker method {method}")),
    }
  }

  async fn handle_request(&self, request: Request) {
    let result = self.dispatch(&request).await;

    if let Some(idx) = request.idx {
      self.outbox.send(Message::Response(Response::from_result(
        idx,
        Some(request.child),
        result,
      )));
    }
  }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
  fn drop(&mut self) {
    self.0.abort();
  }
}

/// The worker side of the farm
///
/// Reads requests from the coordinator, runs them on the module selected by `childInit` and
/// writes back responses. Modules may call back into the coordinator through the
/// [`MasterCaller`] they are constructed with.
pub struct Child {
  inner: Arc<ChildInner>,
  outgoing: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl Child {
  pub fn new(modules: ModuleRegistry) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    Self {
      inner: Arc::new(ChildInner {
        modules,
        module: RwLock::new(None),
        outbox: Arc::new(Outbox {
          outgoing: tx,
          child_id: AtomicU64::new(0),
          calls: Mutex::new(ReverseCalls::default()),
        }),
      }),
      outgoing: Mutex::new(Some(rx)),
    }
  }

  /// Calls into the coordinator, usable before the worker has started running
  pub fn master_caller(&self) -> MasterCallerRef {
    Arc::new(ChildMasterCaller {
      outbox: self.inner.outbox.clone(),
    })
  }

  /// Serves requests until the coordinator asks the worker to die or closes the channel
  pub async fn run<R, W>(self, reader: R, writer: W) -> anyhow::Result<()>
  where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
  {
    let mut outgoing = self
      .outgoing
      .lock()
      .take()
      .context("Worker is already running")?;

    let _writer = AbortOnDrop(tokio::spawn(async move {
      let mut writer = writer;
      while let Some(message) = outgoing.recv().await {
        if let Err(error) = write_message(&mut writer, &message).await {
          tracing::debug!("Failed to write to coordinator: {error}");
          break;
        }
      }
    }));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
      if line.trim().is_empty() {
        continue;
      }

      match decode(&line) {
        Ok(Message::Request(request)) => {
          let inner = self.inner.clone();
          tokio::spawn(async move { inner.handle_request(request).await });
        }
        Ok(Message::Response(response)) => self.inner.outbox.handle_response(response),
        Ok(Message::Die) => break,
        Err(error) => tracing::warn!("Ignoring malformed message from coordinator: {error}"),
      }
    }

    Ok(())
  }
}
