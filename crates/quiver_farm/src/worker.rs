use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;

use crate::Message;
use crate::Request;

/// Where the result of a worker call goes
pub(crate) enum CallReply {
  External(oneshot::Sender<anyhow::Result<Value>>),
  ChildInit,
  Init,
}

pub(crate) struct WorkerCall {
  pub method: String,
  pub args: Vec<Value>,
  pub retries: u32,
  pub reply: CallReply,
}

impl WorkerCall {
  pub fn lifecycle(method: &str, args: Vec<Value>, reply: CallReply) -> Self {
    Self {
      method: method.to_string(),
      args,
      retries: 0,
      reply,
    }
  }
}

pub(crate) enum ProcessSignal {
  /// Wait for the grace period, then kill
  Stop,
  Kill,
}

/// Coordinator side state of one worker
///
/// Messages pass through a bounded channel to the task writing the worker's stdin. When the
/// channel is full the worker is throttled: later messages wait in `send_queue`, in order,
/// until the writer reports the channel drained.
pub(crate) struct Worker {
  pub id: u64,
  outgoing: mpsc::Sender<Message>,
  throttled: Arc<AtomicBool>,
  send_queue: VecDeque<Message>,
  calls: BTreeMap<u64, WorkerCall>,
  call_id: u64,
  pub module_loaded: bool,
  pub ready: bool,
  pub stopped: bool,
  control: mpsc::UnboundedSender<ProcessSignal>,
}

impl Worker {
  pub fn new(
    id: u64,
    outgoing: mpsc::Sender<Message>,
    throttled: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<ProcessSignal>,
  ) -> Self {
    Self {
      id,
      outgoing,
      throttled,
      send_queue: VecDeque::new(),
      calls: BTreeMap::new(),
      call_id: 0,
      module_loaded: false,
      ready: false,
      stopped: false,
      control,
    }
  }

  pub fn outstanding(&self) -> usize {
    self.calls.len()
  }

  pub fn queued_messages(&self) -> usize {
    self.send_queue.len()
  }

  pub fn send(&mut self, message: Message) {
    self.send_queue.push_back(message);
    if !self.throttled.load(Ordering::Acquire) {
      self.flush();
    }
  }

  /// Sends queued messages until the channel is full again
  pub fn flush(&mut self) {
    while let Some(message) = self.send_queue.pop_front() {
      match self.outgoing.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(message)) => {
          self.send_queue.push_front(message);
          self.throttled.store(true, Ordering::Release);

          // The writer may have drained everything before the flag was raised
          if self.outgoing.capacity() == self.outgoing.max_capacity()
            && self.throttled.swap(false, Ordering::AcqRel)
          {
            continue;
          }

          return;
        }
        Err(TrySendError::Closed(_)) => {
          self.send_queue.clear();
          return;
        }
      }
    }
  }

  pub fn call(&mut self, call: WorkerCall) {
    if self.stopped {
      return;
    }

    let idx = self.call_id;
    self.call_id += 1;

    let message = Message::Request(Request {
      idx: Some(idx),
      child: self.id,
      method: call.method.clone(),
      args: call.args.clone(),
      await_response: true,
    });

    self.calls.insert(idx, call);
    self.send(message);
  }

  pub fn take_call(&mut self, idx: u64) -> Option<WorkerCall> {
    self.calls.remove(&idx)
  }

  /// Outstanding calls in the order they were sent
  pub fn take_calls(&mut self) -> Vec<WorkerCall> {
    std::mem::take(&mut self.calls).into_values().collect()
  }

  /// Asks the worker to exit, killing it once the grace period passes
  pub fn stop(&mut self) {
    if self.stopped {
      return;
    }

    self.stopped = true;

    // Requests still queued belong to calls the farm has taken back
    self
      .send_queue
      .retain(|message| !matches!(message, Message::Request(_)));
    self.flush();
    let _ = self.outgoing.try_send(Message::Die);
    let _ = self.control.send(ProcessSignal::Stop);
  }

  pub fn kill(&self) {
    let _ = self.control.send(ProcessSignal::Kill);
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn request(method: &str) -> WorkerCall {
    WorkerCall::lifecycle(method, vec![json!(1)], CallReply::Init)
  }

  fn method(message: Message) -> String {
    match message {
      Message::Request(request) => request.method,
      other => panic!("Expected a request, got {other:?}"),
    }
  }

  fn worker(capacity: usize) -> (Worker, mpsc::Receiver<Message>, Arc<AtomicBool>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (control, _) = mpsc::unbounded_channel();
    let throttled = Arc::new(AtomicBool::new(false));
    (Worker::new(1, tx, throttled.clone(), control), rx, throttled)
  }

  #[tokio::test]
  async fn full_channels_queue_messages_in_order() {
    let (mut worker, mut rx, throttled) = worker(1);

    worker.call(request("a"));
    worker.call(request("b"));
    worker.call(request("c"));

    assert!(throttled.load(Ordering::Acquire));
    assert_eq!(worker.queued_messages(), 2);
    assert_eq!(method(rx.recv().await.unwrap()), "a");

    // What the writer does once the channel is empty
    assert!(throttled.swap(false, Ordering::AcqRel));
    worker.flush();

    assert_eq!(method(rx.recv().await.unwrap()), "b");
    assert_eq!(worker.queued_messages(), 1);

    throttled.swap(false, Ordering::AcqRel);
    worker.flush();

    assert_eq!(method(rx.recv().await.unwrap()), "c");
    assert_eq!(worker.queued_messages(), 0);
    assert_eq!(worker.outstanding(), 3);
  }

  #[tokio::test]
  async fn calls_are_correlated_by_increasing_index() {
    let (mut worker, mut rx, _) = worker(8);

    worker.call(request("a"));
    worker.call(request("b"));

    for expected in 0..2 {
      match rx.recv().await.unwrap() {
        Message::Request(request) => {
          assert_eq!(request.idx, Some(expected));
          assert_eq!(request.child, 1);
        }
        other => panic!("Expected a request, got {other:?}"),
      }
    }

    assert_eq!(worker.take_call(1).map(|call| call.method), Some(String::from("b")));
    assert_eq!(worker.outstanding(), 1);
  }

  #[tokio::test]
  async fn stopped_workers_take_no_calls() {
    let (mut worker, mut rx, _) = worker(8);

    worker.stop();
    worker.call(request("a"));

    assert_eq!(rx.recv().await, Some(Message::Die));
    assert_eq!(worker.outstanding(), 0);
  }

  #[tokio::test]
  async fn stopping_drops_requests_still_queued() {
    let (mut worker, mut rx, throttled) = worker(1);

    worker.call(request("a"));
    worker.call(request("b"));
    worker.call(request("c"));
    assert_eq!(worker.queued_messages(), 2);

    let taken = worker.take_calls();
    assert_eq!(taken.len(), 3);
    assert_eq!(method(rx.recv().await.unwrap()), "a");

    throttled.swap(false, Ordering::AcqRel);
    worker.stop();

    assert_eq!(worker.queued_messages(), 0);
    assert_eq!(rx.recv().await, Some(Message::Die));
    assert!(rx.try_recv().is_err());
  }
}
