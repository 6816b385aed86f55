/*!
 * Task Operation
 *
 * Imperative handle around one unit of queued work: create it, hand it
 * around, `start` it at most once, `cancel` it cooperatively, observe
 * its state transitions, and read its broadcast result any number of
 * times. The body executes on a [`TaskQueue`](super::TaskQueue) under
 * the operation's cancellation token.
 */

use super::{Flags, TaskQueue};
use crate::core::errors::{WaitError, WaitResult};
use crate::core::types::Priority;
use crate::promise::Promise;
use crate::sync::AsyncObject;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Externally observable lifecycle of an operation.
///
/// `New -> Executing -> Finished`; `Finished` is terminal, and an
/// operation is never executing and finished at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    New,
    Executing,
    Finished,
}

type Body<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct OperationInner<T> {
    id: Uuid,
    queue: Arc<TaskQueue>,
    flags: Flags,
    priority: Option<Priority>,
    token: CancellationToken,
    state: watch::Sender<OperationState>,
    body: Mutex<Option<Body<T>>>,
    result: Promise<WaitResult<T>>,
    tracker: Option<TaskTracker>,
}

impl<T: Clone> OperationInner<T> {
    fn finish(&self, outcome: WaitResult<T>) {
        self.result.fulfill(outcome);
        let changed = self.state.send_if_modified(|state| {
            if *state == OperationState::Finished {
                false
            } else {
                *state = OperationState::Finished;
                true
            }
        });
        if changed {
            debug!("operation {} finished", self.id);
        }
    }
}

/// Cloneable handle to one queued, cancellable unit of work.
pub struct TaskOperation<T> {
    inner: Arc<OperationInner<T>>,
}

impl<T> Clone for TaskOperation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> TaskOperation<T> {
    /// Create an operation that will run `body` on `queue`. Nothing
    /// happens until [`start`](TaskOperation::start).
    pub fn new<F>(queue: Arc<TaskQueue>, flags: Flags, priority: Option<Priority>, body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::build(queue, flags, priority, None, body)
    }

    /// Like [`new`](TaskOperation::new), but the operation also waits
    /// for every task spawned through `tracker` before finishing, so
    /// unstructured children started by the body are joined.
    pub fn with_tracker<F>(
        queue: Arc<TaskQueue>,
        flags: Flags,
        priority: Option<Priority>,
        tracker: TaskTracker,
        body: F,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::build(queue, flags, priority, Some(tracker), body)
    }

    fn build<F>(
        queue: Arc<TaskQueue>,
        flags: Flags,
        priority: Option<Priority>,
        tracker: Option<TaskTracker>,
        body: F,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (state, _) = watch::channel(OperationState::New);
        Self {
            inner: Arc::new(OperationInner {
                id: Uuid::new_v4(),
                queue,
                flags,
                priority,
                token: CancellationToken::new(),
                state,
                body: Mutex::new(Some(Box::pin(body))),
                result: Promise::new(),
                tracker,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> OperationState {
        *self.inner.state.borrow()
    }

    pub fn is_executing(&self) -> bool {
        self.state() == OperationState::Executing
    }

    pub fn is_finished(&self) -> bool {
        self.state() == OperationState::Finished
    }

    /// True once cooperative cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Token the body (and its children) can watch for cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Observe state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.inner.state.subscribe()
    }

    /// Start the operation. Only the first call on a `New` operation
    /// has any effect; the body is spawned onto the runtime and runs
    /// through the operation's queue.
    pub fn start(&self) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == OperationState::New {
                *state = OperationState::Executing;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(
                "start on operation {} ignored in state {:?}",
                self.inner.id,
                self.state()
            );
            return;
        }
        debug!("operation {} started", self.inner.id);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let body = inner.body.lock().take();
            let outcome = match body {
                Some(body) => {
                    inner
                        .queue
                        .exec_cancellable(inner.flags, inner.priority, &inner.token, body)
                        .await
                }
                // The body can only be taken once; a missing body means
                // a cancel already settled the result.
                None => Err(WaitError::Cancelled),
            };
            if let Some(tracker) = &inner.tracker {
                tracker.close();
                tracker.wait().await;
            }
            inner.finish(outcome);
        });
    }

    /// Request cooperative cancellation. A never-started operation
    /// settles its result with [`WaitError::Cancelled`] immediately
    /// and its body will never run.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let was_new = self.inner.state.send_if_modified(|state| {
            if *state == OperationState::New {
                *state = OperationState::Finished;
                true
            } else {
                false
            }
        });
        if was_new {
            self.inner.result.fulfill(Err(WaitError::Cancelled));
            debug!("operation {} cancelled before start", self.inner.id);
        }
    }

    /// The operation's outcome, awaited as often as needed. Reading it
    /// from a `New` operation is an error: nothing would ever settle.
    pub async fn result(&self) -> WaitResult<T> {
        if self.state() == OperationState::New {
            return Err(WaitError::EarlyInvoke);
        }
        self.inner.result.get().await
    }

    /// Suspend until the operation reaches `Finished`.
    pub async fn wait_until_finished(&self) {
        let mut receiver = self.inner.state.subscribe();
        // The sender lives in `inner`, so `wait_for` cannot fail while
        // this handle is alive.
        let _ = receiver
            .wait_for(|state| *state == OperationState::Finished)
            .await;
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> AsyncObject for TaskOperation<T> {
    /// Start the operation (idempotent).
    fn signal(&self) {
        self.start();
    }

    /// Suspend until the operation finishes.
    async fn wait(&self) {
        self.wait_until_finished().await;
    }
}
