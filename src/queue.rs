//! Serial task queue.
//!
//! [`SerialTaskQueue`] accepts asynchronous units of work from any number of
//! concurrent callers and runs them strictly one at a time, in the order they
//! were submitted. Each caller receives a [`QueuedTask`] future that resolves
//! to its own task's outcome.
//!
//! The queue is drained by a single Tokio task that is spawned on demand, so
//! [`enqueue`](SerialTaskQueue::enqueue) must be called from within a Tokio
//! runtime.
//!
//! # Example
//!
//! ```
//! use seekframe::{SeekframeError, SerialTaskQueue};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SeekframeError> {
//! let queue = SerialTaskQueue::new();
//!
//! let first = queue.enqueue(|| async { Ok::<_, SeekframeError>(1) });
//! let second = queue.enqueue(|| async { Ok::<_, SeekframeError>(2) });
//!
//! assert_eq!(first.await?, 1);
//! assert_eq!(second.await?, 2);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot::{self, Receiver, Sender};

use crate::error::SeekframeError;

type RunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A type-erased pending task.
///
/// Either [`run`](PendingTask::run) or [`reject`](PendingTask::reject) is
/// called exactly once, after the task has been removed from the pending
/// sequence.
trait PendingTask: Send {
    fn id(&self) -> u64;
    fn run(self: Box<Self>) -> RunFuture;
    fn reject(self: Box<Self>, error: SeekframeError);
}

struct TypedTask<T, F> {
    id: u64,
    task: F,
    reply: Sender<Result<T, SeekframeError>>,
}

impl<T, F, Fut> PendingTask for TypedTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, SeekframeError>> + Send + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn run(self: Box<Self>) -> RunFuture {
        let TypedTask { id, task, reply } = *self;
        Box::pin(async move {
            // Spawned so that a panic inside the task surfaces as a JoinError
            // instead of tearing down the drain loop.
            let outcome = match tokio::spawn(async move { task().await }).await {
                Ok(result) => result,
                Err(error) => {
                    log::warn!("Queued task {id} did not complete: {error}");
                    Err(SeekframeError::TaskPanicked(format!("task {id}: {error}")))
                }
            };
            let _ = reply.send(outcome);
        })
    }

    fn reject(self: Box<Self>, error: SeekframeError) {
        let _ = self.reply.send(Err(error));
    }
}

struct QueueState {
    pending: VecDeque<Box<dyn PendingTask>>,
    /// `true` while a drain loop is active.
    running: bool,
    stopped: bool,
    last_id: u64,
}

/// A FIFO queue that runs asynchronous tasks one at a time.
///
/// Guarantees:
///
/// - For tasks A enqueued before B, A begins **and completes** before B
///   begins, regardless of how long A takes.
/// - At most one task runs at any instant.
/// - A task's failure (or panic) is delivered only to that task's caller and
///   never blocks the tasks behind it.
///
/// Cloning the queue yields another handle to the same pending sequence.
#[derive(Clone)]
pub struct SerialTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Debug for SerialTaskQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let state = lock(&self.state);
        f.debug_struct("SerialTaskQueue")
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("stopped", &state.stopped)
            .field("last_id", &state.last_id)
            .finish()
    }
}

impl Default for SerialTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTaskQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: false,
                stopped: false,
                last_id: 0,
            })),
        }
    }

    /// Submit a task.
    ///
    /// The task is appended to the pending sequence immediately (not when the
    /// returned future is first polled), so submission order is call order.
    /// `task` is invoked at most once, when it reaches the head of the queue.
    ///
    /// If the queue has been [stopped](SerialTaskQueue::stop) the returned
    /// future resolves to [`SeekframeError::QueueStopped`] and `task` is never
    /// invoked.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while the queue is idle.
    pub fn enqueue<T, F, Fut>(&self, task: F) -> QueuedTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SeekframeError>> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();

        let mut state = lock(&self.state);
        if state.stopped {
            drop(state);
            log::debug!("Rejecting task submitted to a stopped queue");
            return QueuedTask::rejected(SeekframeError::QueueStopped);
        }

        state.last_id += 1;
        let id = state.last_id;
        state
            .pending
            .push_back(Box::new(TypedTask { id, task, reply }));
        log::trace!("Enqueued task {id} ({} pending)", state.pending.len());

        let start_drain = !state.running;
        state.running = true;
        drop(state);

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.state)));
        }

        QueuedTask {
            id: Some(id),
            receiver,
        }
    }

    /// Reject every pending (not yet started) task with
    /// [`SeekframeError::TaskCleared`] and empty the pending sequence.
    ///
    /// A task that is already running is unaffected. The queue stays open.
    /// Returns the number of tasks rejected.
    pub fn clear(&self, reason: impl Into<String>) -> usize {
        let reason = reason.into();
        let cleared: Vec<_> = lock(&self.state).pending.drain(..).collect();
        let count = cleared.len();
        for task in cleared {
            task.reject(SeekframeError::TaskCleared {
                reason: reason.clone(),
            });
        }
        if count > 0 {
            log::debug!("Cleared {count} pending task(s): {reason}");
        }
        count
    }

    /// Permanently close the queue.
    ///
    /// Every pending task is rejected with [`SeekframeError::QueueStopped`].
    /// A task that is already running still delivers its outcome normally.
    /// All later [`enqueue`](SerialTaskQueue::enqueue) calls reject
    /// immediately. Calling `stop` again has no further effect.
    pub fn stop(&self) {
        let rejected: Vec<_> = {
            let mut state = lock(&self.state);
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.pending.drain(..).collect()
        };

        log::debug!("Stopping task queue ({} pending task(s) rejected)", rejected.len());
        for task in rejected {
            task.reject(SeekframeError::QueueStopped);
        }
    }

    /// Returns `true` while the queue is draining (a task is running or about
    /// to start).
    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Returns `true` once [`stop`](SerialTaskQueue::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    /// Number of tasks waiting to start. The running task is not counted.
    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Returns `true` if no task is waiting to start.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain loop. Only one instance runs per queue at a time; `running` is
/// cleared under the same lock that observes the empty sequence, so a
/// concurrent `enqueue` either lands before that check or starts a new loop.
async fn drain(state: Arc<Mutex<QueueState>>) {
    loop {
        let next = {
            let mut guard = lock(&state);
            match guard.pending.pop_front() {
                Some(task) => task,
                None => {
                    guard.running = false;
                    return;
                }
            }
        };

        let id = next.id();
        log::trace!("Running task {id}");
        next.run().await;
        log::trace!("Task {id} settled");
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The pending outcome of a task submitted to a [`SerialTaskQueue`].
///
/// Resolves once the task has run (or has been rejected by
/// [`clear`](SerialTaskQueue::clear) / [`stop`](SerialTaskQueue::stop)).
/// Dropping a `QueuedTask` does not withdraw the task from the queue.
#[must_use = "a queued task does nothing observable unless awaited"]
pub struct QueuedTask<T> {
    id: Option<u64>,
    receiver: Receiver<Result<T, SeekframeError>>,
}

impl<T> QueuedTask<T> {
    /// A task that was refused at submission and resolves to `error`.
    pub(crate) fn rejected(error: SeekframeError) -> Self {
        let (reply, receiver) = oneshot::channel();
        let _ = reply.send(Err(error));
        Self { id: None, receiver }
    }

    /// The ordinal id assigned at submission, or `None` if the task was
    /// refused before entering the queue.
    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

impl<T> Debug for QueuedTask<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("QueuedTask").field("id", &self.id).finish()
    }
}

impl<T> Future for QueuedTask<T> {
    type Output = Result<T, SeekframeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender only disappears without replying if the runtime dropped
        // the drain loop, which can only happen while shutting down.
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SeekframeError::QueueStopped)))
    }
}
