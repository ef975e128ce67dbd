use std::collections::HashSet;
use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::oneshot;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type ProcessFn<T, A> = dyn Fn(T, A, TaskQueue<T, A>) -> TaskFuture + Send + Sync;

#[derive(Clone, Debug)]
pub struct TaskQueueOptions {
  /// Maximum number of jobs in flight, unbounded when `None`
  pub max_concurrent: Option<usize>,

  /// Re-enqueue failed jobs so that a later `run` attempts them again
  pub retry: bool,
}

impl Default for TaskQueueOptions {
  fn default() -> Self {
    Self {
      max_concurrent: None,
      retry: true,
    }
  }
}

struct QueueState<T, A> {
  queue: VecDeque<(T, A)>,
  processing: HashSet<T>,
  processed: HashSet<T>,
  num_running: usize,
  run: Option<oneshot::Sender<anyhow::Result<HashSet<T>>>>,
}

struct Inner<T, A> {
  process: Box<ProcessFn<T, A>>,
  options: TaskQueueOptions,
  state: Mutex<QueueState<T, A>>,
}

/// Runs jobs concurrently, deduplicating them by identity
///
/// A job is ignored when added while it is already queued or in flight. `run` drains the
/// queue and resolves with every job completed since the previous run once nothing is queued
/// or in flight. Jobs may add further jobs while the queue runs, they receive a handle to the
/// queue for that purpose.
///
/// When a job fails the current `run` rejects with its error. With `retry` enabled the job
/// stays pending and is attempted again by the next `run`. Jobs still in flight at that
/// point keep running and are accounted to the next `run`.
pub struct TaskQueue<T, A = ()> {
  inner: Arc<Inner<T, A>>,
}

impl<T, A> Clone for TaskQueue<T, A> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T, A> TaskQueue<T, A>
where
  T: Clone + Eq + Hash + Send + 'static,
  A: Clone + Send + 'static,
{
  pub fn new<F, Fut>(options: TaskQueueOptions, process: F) -> Self
  where
    F: Fn(T, A, TaskQueue<T, A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        process: Box::new(move |job: T, args: A, queue: TaskQueue<T, A>| -> TaskFuture {
          Box::pin(process(job, args, queue))
        }),
        options,
        state: Mutex::new(QueueState {
          queue: VecDeque::new(),
          processing: HashSet::new(),
          processed: HashSet::new(),
          num_running: 0,
          run: None,
        }),
      }),
    }
  }

  /// Enqueues a job unless it is already pending
  pub fn add(&self, job: T, args: A) {
    let mut state = self.inner.state.lock();
    if state.processing.contains(&job) {
      return;
    }

    state.processing.insert(job.clone());
    if state.run.is_some() && self.has_capacity(&state) {
      self.run_job(&mut state, job, args);
    } else {
      state.queue.push_back((job, args));
    }
  }

  /// Drains the queue and resolves with the jobs completed during this run
  pub async fn run(&self) -> anyhow::Result<HashSet<T>> {
    let receiver = {
      let mut state = self.inner.state.lock();
      if state.run.is_some() {
        return Err(anyhow!("TaskQueue is already running"));
      }

      let (sender, receiver) = oneshot::channel();
      state.run = Some(sender);
      self.next(&mut state);
      receiver
    };

    receiver
      .await
      .map_err(|_| anyhow!("TaskQueue was dropped while running"))?
  }

  pub fn is_running(&self) -> bool {
    self.inner.state.lock().run.is_some()
  }

  /// Number of jobs queued or in flight
  pub fn pending(&self) -> usize {
    self.inner.state.lock().processing.len()
  }

  fn has_capacity(&self, state: &QueueState<T, A>) -> bool {
    self
      .inner
      .options
      .max_concurrent
      .is_none_or(|max| state.num_running < max)
  }

  fn next(&self, state: &mut QueueState<T, A>) {
    if state.run.is_none() {
      return;
    }

    if !state.queue.is_empty() {
      while self.has_capacity(state) {
        let Some((job, args)) = state.queue.pop_front() else {
          break;
        };

        self.run_job(state, job, args);
      }
    } else if state.processing.is_empty() {
      let processed = std::mem::take(&mut state.processed);
      if let Some(run) = state.run.take() {
        let _ = run.send(Ok(processed));
      }
    }
  }

  fn run_job(&self, state: &mut QueueState<T, A>, job: T, args: A) {
    state.num_running += 1;

    let queue = self.clone();

    // The job is started inside the task so the state lock is never held while user code runs
    tokio::spawn(async move {
      let result = (queue.inner.process)(job.clone(), args.clone(), queue.clone()).await;
      let mut state = queue.inner.state.lock();
      state.num_running -= 1;

      match result {
        Ok(()) => {
          state.processing.remove(&job);
          state.processed.insert(job);
          queue.next(&mut state);
        }
        Err(error) => {
          tracing::debug!(retry = queue.inner.options.retry, "Task failed: {error}");
          if queue.inner.options.retry {
            state.queue.push_back((job, args));
          } else {
            state.processing.remove(&job);
          }

          state.processed = HashSet::new();
          if let Some(run) = state.run.take() {
            let _ = run.send(Err(error));
          }
        }
      }
    });
  }
}
