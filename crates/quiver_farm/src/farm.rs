use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::methods;
use crate::protocol::decode;
use crate::protocol::write_message;
use crate::worker::CallReply;
use crate::worker::ProcessSignal;
use crate::worker::Worker;
use crate::worker::WorkerCall;
use crate::FarmError;
use crate::FarmOptions;
use crate::LocalMasterCaller;
use crate::MasterOperations;
use crate::Message;
use crate::ModuleFactory;
use crate::Request;
use crate::Response;
use crate::WorkerModule;
use crate::WorkerProcess;
use crate::WorkerSpawner;

/// Messages buffered for a worker's writer before the worker is throttled
const WORKER_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
  pub id: u64,
  pub ready: bool,
  pub outstanding: usize,
  pub queued_messages: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmStats {
  pub workers: Vec<WorkerStats>,

  /// Calls waiting for a worker
  pub queued: usize,

  /// Highest number of calls outstanding across all workers at once
  pub max_in_flight: usize,

  pub warm_workers: usize,
}

impl FarmStats {
  pub fn ready_workers(&self) -> usize {
    self.workers.iter().filter(|worker| worker.ready).count()
  }

  pub fn outstanding(&self) -> usize {
    self.workers.iter().map(|worker| worker.outstanding).sum()
  }
}

/// State read by handles without a round trip through the farm
#[derive(Default)]
struct SharedState {
  warm_workers: AtomicUsize,
  workers: AtomicUsize,
  ending: AtomicBool,
}

enum FarmEvent {
  Call(WorkerCall),
  Message { worker: u64, message: Message },
  Reply { worker: u64, response: Response },
  Drained(u64),
  ChannelClosed(u64),
  Exited(u64),
  Init { options: Value, ack: oneshot::Sender<()> },
  Stats(oneshot::Sender<FarmStats>),
  Terminate { worker: u64, reply: oneshot::Sender<bool> },
  End(oneshot::Sender<()>),
}

/// Coordinates the worker pool
///
/// The farm runs as a single task and owns every worker's call table, so none of its state
/// needs locking. It is driven through a [`FarmHandle`].
pub struct Farm {
  options: FarmOptions,
  spawner: Arc<dyn WorkerSpawner>,
  master: Arc<dyn MasterOperations>,
  module_name: String,
  bootstrap: Option<Value>,
  workers: IndexMap<u64, Worker>,
  next_worker_id: u64,
  call_queue: VecDeque<WorkerCall>,
  live: HashSet<u64>,
  end_waiters: Vec<oneshot::Sender<()>>,
  ending: bool,
  max_in_flight: usize,
  shared: Arc<SharedState>,
  events: mpsc::WeakUnboundedSender<FarmEvent>,
}

impl Farm {
  /// Starts the farm on the current runtime
  ///
  /// `module_name` is sent to every worker with `childInit`, and `factory` builds the local
  /// instance of the same module.
  pub fn start(
    options: FarmOptions,
    spawner: Arc<dyn WorkerSpawner>,
    module_name: &str,
    factory: ModuleFactory,
    master: Arc<dyn MasterOperations>,
  ) -> FarmHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let shared = Arc::new(SharedState::default());
    let local = factory(Arc::new(LocalMasterCaller::new(master.clone())));

    let mut farm = Farm {
      options: options.clone(),
      spawner,
      master,
      module_name: module_name.to_string(),
      bootstrap: None,
      workers: IndexMap::new(),
      next_worker_id: 0,
      call_queue: VecDeque::new(),
      live: HashSet::new(),
      end_waiters: Vec::new(),
      ending: false,
      max_in_flight: 0,
      shared: shared.clone(),
      events: tx.downgrade(),
    };

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        farm.handle_event(event);
      }

      tracing::trace!("Worker farm stopped");
    });

    FarmHandle {
      events: tx,
      local,
      options,
      shared,
    }
  }

  fn handle_event(&mut self, event: FarmEvent) {
    match event {
      FarmEvent::Call(call) => self.add_call(call),
      FarmEvent::Message { worker, message } => self.receive(worker, message),
      FarmEvent::Reply { worker, response } => {
        if let Some(worker) = self.workers.get_mut(&worker) {
          worker.send(Message::Response(response));
        }
      }
      FarmEvent::Drained(worker) => {
        if let Some(worker) = self.workers.get_mut(&worker) {
          worker.flush();
        }
      }
      FarmEvent::ChannelClosed(worker) => self.stop_worker(worker),
      FarmEvent::Exited(worker) => {
        self.stop_worker(worker);
        self.live.remove(&worker);
        if self.live.is_empty() && !self.end_waiters.is_empty() {
          self.finish_end();
        }
      }
      FarmEvent::Init { options, ack } => {
        self.init(options);
        let _ = ack.send(());
      }
      FarmEvent::Stats(reply) => {
        let _ = reply.send(self.stats());
      }
      FarmEvent::Terminate { worker, reply } => {
        let found = match self.workers.get(&worker) {
          Some(worker) => {
            tracing::warn!("Killing worker {}", worker.id);
            worker.kill();
            true
          }
          None => false,
        };
        let _ = reply.send(found);
      }
      FarmEvent::End(reply) => self.end(reply),
    }
  }

  fn add_call(&mut self, call: WorkerCall) {
    if self.ending {
      reject(call, FarmError::Ending);
      return;
    }

    self.call_queue.push_back(call);
    self.process_queue();
  }

  fn init(&mut self, options: Value) {
    self.bootstrap = Some(options.clone());

    if !self.options.should_start_remote_workers() {
      return;
    }

    // Live workers pick up the new options without restarting
    for worker in self.workers.values_mut() {
      if worker.module_loaded && !worker.stopped {
        worker.ready = false;
        worker.call(WorkerCall::lifecycle(
          methods::INIT,
          vec![options.clone()],
          CallReply::Init,
        ));
      }
    }

    while self.workers.len() < self.options.max_concurrent_workers {
      if !self.start_child() {
        break;
      }
    }
  }

  fn start_child(&mut self) -> bool {
    let Some(events) = self.events.upgrade() else {
      return false;
    };

    let spawned = match self.spawner.spawn() {
      Ok(spawned) => spawned,
      Err(error) => {
        tracing::error!("Failed to start worker: {error:#}");
        if self.workers.is_empty() {
          self.reject_queued(|| FarmError::Spawn(error.to_string()));
        }
        return false;
      }
    };

    let id = self.next_worker_id;
    self.next_worker_id += 1;

    let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let throttled = Arc::new(AtomicBool::new(false));

    tokio::spawn(write_loop(
      id,
      spawned.stdin,
      rx,
      throttled.clone(),
      events.clone(),
    ));
    tokio::spawn(read_loop(id, spawned.stdout, events.clone()));
    tokio::spawn(supervise(
      id,
      spawned.process,
      control_rx,
      self.options.forced_kill_time,
      events,
    ));

    let mut worker = Worker::new(id, tx, throttled, control_tx);
    worker.call(WorkerCall::lifecycle(
      methods::CHILD_INIT,
      vec![json!(self.module_name)],
      CallReply::ChildInit,
    ));

    tracing::debug!("Started worker {id}");
    self.live.insert(id);
    self.workers.insert(id, worker);
    self.shared.workers.store(self.workers.len(), Ordering::Release);

    true
  }

  fn receive(&mut self, id: u64, message: Message) {
    match message {
      Message::Response(response) => self.handle_response(id, response),
      Message::Request(request) => self.handle_request(id, request),
      Message::Die => {}
    }
  }

  fn handle_response(&mut self, id: u64, response: Response) {
    let Some(worker) = self.workers.get_mut(&id) else {
      return;
    };

    // Unknown calls are ignored, they belong to a worker that was replaced
    let Some(call) = worker.take_call(response.idx) else {
      return;
    };

    match call.reply {
      CallReply::External(reply) => {
        let _ = reply.send(response.into_result());
      }
      CallReply::ChildInit => match response.into_result() {
        Ok(_) => {
          worker.module_loaded = true;
          let options = self.bootstrap.clone().unwrap_or(Value::Null);
          worker.call(WorkerCall::lifecycle(
            methods::INIT,
            vec![options],
            CallReply::Init,
          ));
        }
        Err(error) => return self.fail_worker(id, error),
      },
      CallReply::Init => match response.into_result() {
        Ok(_) => worker.ready = true,
        Err(error) => return self.fail_worker(id, error),
      },
    }

    self.process_queue();
  }

  /// Runs a worker's call into the coordinator, replying through the farm when the worker
  /// awaits a response
  fn handle_request(&mut self, id: u64, request: Request) {
    let Some(events) = self.events.upgrade() else {
      return;
    };

    let master = self.master.clone();
    tokio::spawn(async move {
      let result = master.handle(&request.method, request.args).await;

      if !request.await_response {
        if let Err(error) = result {
          tracing::debug!("Master operation {} failed: {error}", request.method);
        }
        return;
      }

      if let Some(idx) = request.idx {
        let _ = events.send(FarmEvent::Reply {
          worker: id,
          response: Response::from_result(idx, None, result),
        });
      }
    });
  }

  fn fail_worker(&mut self, id: u64, error: anyhow::Error) {
    tracing::error!("Worker {id} failed to initialize: {error}");

    let others_ready = self
      .workers
      .values()
      .any(|worker| worker.id != id && worker.ready);

    if !others_ready {
      let message = error.to_string();
      self.reject_queued(|| FarmError::Init(message.clone()));
    }

    self.stop_worker(id);
  }

  fn process_queue(&mut self) {
    if self.ending || self.call_queue.is_empty() {
      return;
    }

    if self.workers.len() < self.options.max_concurrent_workers {
      self.start_child();
    }

    let max_calls = self.options.max_concurrent_calls_per_worker;
    for worker in self.workers.values_mut() {
      if self.call_queue.is_empty() {
        break;
      }

      if !worker.ready || worker.stopped {
        continue;
      }

      while worker.outstanding() < max_calls {
        let Some(call) = self.call_queue.pop_front() else {
          break;
        };
        worker.call(call);
      }
    }

    let in_flight = self.workers.values().map(Worker::outstanding).sum();
    self.max_in_flight = self.max_in_flight.max(in_flight);
  }

  /// Discards a worker, requeueing the calls it had outstanding
  fn stop_worker(&mut self, id: u64) {
    let Some(mut worker) = self.workers.shift_remove(&id) else {
      return;
    };
    self
      .shared
      .workers
      .store(self.workers.len(), Ordering::Release);

    let requeued: Vec<WorkerCall> = worker
      .take_calls()
      .into_iter()
      .filter(|call| matches!(call.reply, CallReply::External(_)))
      .collect();

    if !requeued.is_empty() {
      tracing::warn!(
        "Worker {id} stopped with {} outstanding calls, requeueing",
        requeued.len()
      );
    }

    for mut call in requeued.into_iter().rev() {
      call.retries += 1;
      self.call_queue.push_front(call);
    }

    worker.stop();
    self.process_queue();
  }

  fn reject_queued(&mut self, error: impl Fn() -> FarmError) {
    for call in self.call_queue.drain(..) {
      reject(call, error());
    }
  }

  fn stats(&self) -> FarmStats {
    FarmStats {
      workers: self
        .workers
        .values()
        .map(|worker| WorkerStats {
          id: worker.id,
          ready: worker.ready,
          outstanding: worker.outstanding(),
          queued_messages: worker.queued_messages(),
        })
        .collect(),
      queued: self.call_queue.len(),
      max_in_flight: self.max_in_flight,
      warm_workers: self.shared.warm_workers.load(Ordering::Acquire),
    }
  }

  fn end(&mut self, reply: oneshot::Sender<()>) {
    self.ending = true;
    self.shared.ending.store(true, Ordering::Release);
    self.end_waiters.push(reply);

    let ids: Vec<u64> = self.workers.keys().copied().collect();
    for id in ids {
      self.stop_worker(id);
    }

    if self.live.is_empty() {
      self.finish_end();
    }
  }

  fn finish_end(&mut self) {
    self.reject_queued(|| FarmError::Stopped);

    // The farm may be reused for another build after ending
    self.ending = false;
    self.shared.ending.store(false, Ordering::Release);

    for waiter in self.end_waiters.drain(..) {
      let _ = waiter.send(());
    }
  }
}

fn reject(call: WorkerCall, error: FarmError) {
  if let CallReply::External(reply) = call.reply {
    let _ = reply.send(Err(error.into()));
  }
}

async fn write_loop(
  id: u64,
  mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
  mut rx: mpsc::Receiver<Message>,
  throttled: Arc<AtomicBool>,
  events: mpsc::UnboundedSender<FarmEvent>,
) {
  while let Some(message) = rx.recv().await {
    if let Err(error) = write_message(&mut stdin, &message).await {
      tracing::debug!("Failed to write to worker {id}: {error}");
      let _ = events.send(FarmEvent::ChannelClosed(id));
      return;
    }

    if rx.is_empty() && throttled.swap(false, Ordering::AcqRel) {
      let _ = events.send(FarmEvent::Drained(id));
    }
  }
}

async fn read_loop(
  id: u64,
  stdout: Box<dyn AsyncRead + Send + Unpin>,
  events: mpsc::UnboundedSender<FarmEvent>,
) {
  let mut lines = BufReader::new(stdout).lines();

  loop {
    match lines.next_line().await {
      Ok(Some(line)) => {
        if line.trim().is_empty() {
          continue;
        }

        match decode(&line) {
          Ok(message) => {
            let _ = events.send(FarmEvent::Message {
              worker: id,
              message,
            });
          }
          Err(error) => tracing::warn!("Ignoring malformed message from worker {id}: {error}"),
        }
      }
      Ok(None) => break,
      Err(error) => {
        tracing::debug!("Failed to read from worker {id}: {error}");
        break;
      }
    }
  }

  let _ = events.send(FarmEvent::ChannelClosed(id));
}

async fn supervise(
  id: u64,
  mut process: WorkerProcess,
  mut control: mpsc::UnboundedReceiver<ProcessSignal>,
  forced_kill_time: Duration,
  events: mpsc::UnboundedSender<FarmEvent>,
) {
  let signal = tokio::select! {
    _ = process.wait() => None,
    signal = control.recv() => Some(signal.unwrap_or(ProcessSignal::Kill)),
  };

  match signal {
    None => tracing::debug!("Worker {id} exited"),
    Some(ProcessSignal::Stop) => {
      if tokio::time::timeout(forced_kill_time, process.wait())
        .await
        .is_err()
      {
        tracing::warn!("Worker {id} did not exit in time, killing it");
        process.kill();
        process.wait().await;
      }
    }
    Some(ProcessSignal::Kill) => {
      process.kill();
      process.wait().await;
    }
  }

  let _ = events.send(FarmEvent::Exited(id));
}

/// Cloneable entry point to a running [`Farm`]
#[derive(Clone)]
pub struct FarmHandle {
  events: mpsc::UnboundedSender<FarmEvent>,
  local: Arc<dyn WorkerModule>,
  options: FarmOptions,
  shared: Arc<SharedState>,
}

impl FarmHandle {
  fn send(&self, event: FarmEvent) -> Result<(), FarmError> {
    self.events.send(event).map_err(|_| FarmError::Stopped)
  }

  async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> FarmEvent) -> anyhow::Result<T> {
    let (tx, rx) = oneshot::channel();
    self.send(event(tx))?;
    Ok(rx.await.map_err(|_| FarmError::Stopped)?)
  }

  /// Initializes the local module, then every remote worker, with the given options
  ///
  /// Also starts the remote workers the first time it is called.
  pub async fn init(&self, options: Value) -> anyhow::Result<()> {
    self.local.init(options.clone()).await?;
    self
      .request(|ack| FarmEvent::Init { options, ack })
      .await
  }

  /// Processes one input, remotely once the workers are warm
  #[tracing::instrument(level = "trace", skip_all)]
  pub async fn run(&self, input: Value) -> anyhow::Result<Value> {
    if self.should_use_remote_workers() {
      return self.call(methods::RUN, vec![input, json!(false)]).await;
    }

    if self.options.warm_workers && self.options.should_start_remote_workers() {
      self.warm_up(input.clone());
    }

    self.local.run(input, false).await
  }

  fn should_use_remote_workers(&self) -> bool {
    if !self.options.use_local_worker || !self.options.warm_workers {
      return true;
    }

    self.options.should_start_remote_workers()
      && self.shared.warm_workers.load(Ordering::Acquire)
        >= self.shared.workers.load(Ordering::Acquire)
  }

  /// Sends a copy of a call to a remote worker to prime it, discarding the result
  fn warm_up(&self, input: Value) {
    if self.shared.ending.load(Ordering::Acquire) {
      return;
    }

    let handle = self.clone();
    tokio::spawn(async move {
      if handle
        .call(methods::RUN, vec![input, json!(true)])
        .await
        .is_ok()
      {
        handle.shared.warm_workers.fetch_add(1, Ordering::AcqRel);
      }
    });
  }

  async fn call(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    if self.shared.ending.load(Ordering::Acquire) {
      return Err(FarmError::Ending.into());
    }

    let (tx, rx) = oneshot::channel();
    self.send(FarmEvent::Call(WorkerCall {
      method: method.to_string(),
      args,
      retries: 0,
      reply: CallReply::External(tx),
    }))?;

    rx.await.map_err(|_| FarmError::Dropped)?
  }

  pub async fn stats(&self) -> anyhow::Result<FarmStats> {
    self.request(FarmEvent::Stats).await
  }

  /// Kills a worker without asking it to exit first
  ///
  /// Calls it had outstanding are requeued on the other workers. Returns false when no
  /// worker has the id.
  pub async fn terminate_worker(&self, worker: u64) -> anyhow::Result<bool> {
    self
      .request(|reply| FarmEvent::Terminate { worker, reply })
      .await
  }

  /// Stops every worker, resolving once all of them have exited
  pub async fn end(&self) -> anyhow::Result<()> {
    self.request(FarmEvent::End).await
  }
}
