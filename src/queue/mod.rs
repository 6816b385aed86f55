/*!
 * Task Queue
 *
 * Admission-controlled executor. Ordinary submissions run as soon as
 * nothing holds the queue; `block` submissions make the queue
 * exclusive until they complete; `barrier` submissions additionally
 * wait for every running operation to finish first. Everything else
 * parks in strict FIFO order and is resumed by the completion
 * protocol.
 *
 * `running` moves exactly once per admission: the fast path increments
 * it inline, the drain increments it before waking the resumed waiter,
 * and an admitted-but-abandoned waiter rolls it back through the same
 * completion path.
 */

mod flags;
pub mod operation;

pub use flags::Flags;
pub use operation::{OperationState, TaskOperation};

use crate::core::errors::{WaitError, WaitResult};
use crate::core::types::{Priority, PRIORITY_DEFAULT};
use crate::sync::registry::{WaitKey, WaiterQueue};
use crate::sync::AsyncObject;
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    /// Effective priority of the operation currently running on this
    /// task, consulted by nested non-detached submissions.
    static CONTEXT_PRIORITY: Priority;
}

/// Priority of the queue operation the current task is running inside,
/// if any.
pub fn current_priority() -> Option<Priority> {
    CONTEXT_PRIORITY.try_with(|priority| *priority).ok()
}

struct QueueState {
    blocked: bool,
    running: usize,
    waiters: WaiterQueue<(), Flags>,
}

/// FIFO admission-controlled task queue.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    default_priority: Priority,
}

impl TaskQueue {
    pub fn new(default_priority: Priority) -> Self {
        Self {
            state: Mutex::new(QueueState {
                blocked: false,
                running: 0,
                waiters: WaiterQueue::new(),
            }),
            default_priority,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PRIORITY_DEFAULT)
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority
    }

    /// Submissions parked behind the current admissions.
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Admitted operations that have not completed.
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// True while a `block` or `barrier` operation holds the queue.
    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    /// Run `op` on the queue under `flags`, suspending until admission.
    /// Completion (or abandonment) always runs the drain protocol.
    pub async fn exec<F>(&self, flags: Flags, priority: Option<Priority>, op: F) -> F::Output
    where
        F: Future,
    {
        let guard = Admission {
            queue: self,
            flags,
            key: None,
            admitted: false,
        }
        .await;
        let effective = self.resolve_priority(flags, priority);
        trace!(
            "admitted queue operation (priority {}, flags {:?})",
            effective,
            flags
        );
        let output = CONTEXT_PRIORITY.scope(effective, op).await;
        drop(guard);
        output
    }

    /// [`exec`](TaskQueue::exec), failing with [`WaitError::Cancelled`]
    /// when `token` fires. A cancelled queued submission is de-tabled
    /// without ever running `op`; a cancelled running one drops `op`
    /// and still runs the completion protocol.
    pub async fn exec_cancellable<F>(
        &self,
        flags: Flags,
        priority: Option<Priority>,
        token: &CancellationToken,
        op: F,
    ) -> WaitResult<F::Output>
    where
        F: Future,
    {
        if token.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        tokio::select! {
            _ = token.cancelled() => Err(WaitError::Cancelled),
            output = self.exec(flags, priority, op) => Ok(output),
        }
    }

    /// Effective priority for one submission.
    ///
    /// `enforce` takes the maximum of the requested, queue-default, and
    /// ambient priorities; otherwise the requested one wins and the
    /// queue default backs it up. `detached` drops the ambient
    /// candidate.
    fn resolve_priority(&self, flags: Flags, requested: Option<Priority>) -> Priority {
        if flags.enforce {
            let context = if flags.detached {
                None
            } else {
                current_priority()
            };
            requested
                .into_iter()
                .chain(Some(self.default_priority))
                .chain(context)
                .max()
                .unwrap_or(self.default_priority)
        } else {
            requested.unwrap_or(self.default_priority)
        }
    }

    fn complete_locked(state: &mut QueueState, flags: Flags) {
        state.running = state.running.saturating_sub(1);
        if flags.exclusive() {
            state.blocked = false;
        }
        Self::drain_locked(state);
    }

    /// Resume parked submissions from the front while the admission
    /// predicate holds. A resumed `block`/`barrier` entry stops the
    /// drain.
    fn drain_locked(state: &mut QueueState) {
        loop {
            let Some(head) = state.waiters.front_tag().copied() else {
                break;
            };
            if state.blocked || (head.barrier && state.running > 0) {
                break;
            }
            state.running += 1;
            if head.exclusive() {
                state.blocked = true;
            }
            state.waiters.resume_front(());
            if head.exclusive() {
                trace!("drained up to an exclusive queue entry");
                break;
            }
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl AsyncObject for TaskQueue {
    /// Admission is driven by completions; there is nothing to signal.
    fn signal(&self) {
        trace!("signal on a task queue ignored");
    }

    /// Wait for every admitted and queued operation ahead of the
    /// caller to complete, by taking a barrier turn.
    async fn wait(&self) {
        self.exec(Flags::BARRIER, None, async {}).await
    }
}

/// Suspends until the queue admits the submission; resolves to the
/// guard that runs the completion protocol.
struct Admission<'a> {
    queue: &'a TaskQueue,
    flags: Flags,
    key: Option<WaitKey>,
    admitted: bool,
}

impl<'a> Future for Admission<'a> {
    type Output = CompletionGuard<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.queue.state.lock();
        match this.key {
            Some(key) => match state.waiters.poll_entry(key, cx) {
                Poll::Ready(()) => {
                    // The drain that resumed us already took the
                    // running slot and the blocked bit.
                    this.key = None;
                    this.admitted = true;
                    Poll::Ready(CompletionGuard {
                        queue: this.queue,
                        flags: this.flags,
                    })
                }
                Poll::Pending => Poll::Pending,
            },
            None => {
                let admissible = !state.blocked
                    && state.waiters.is_empty()
                    && !(this.flags.barrier && state.running > 0);
                if admissible {
                    state.running += 1;
                    if this.flags.exclusive() {
                        state.blocked = true;
                    }
                    this.admitted = true;
                    Poll::Ready(CompletionGuard {
                        queue: this.queue,
                        flags: this.flags,
                    })
                } else {
                    this.key = Some(state.waiters.insert(cx.waker().clone(), this.flags));
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        if let Some(key) = self.key {
            let mut state = self.queue.state.lock();
            if state.waiters.cancel(key).is_some() {
                // Admitted after cancellation won the race; give the
                // slot back and let the drain hand it on.
                TaskQueue::complete_locked(&mut state, self.flags);
            }
        }
    }
}

struct CompletionGuard<'a> {
    queue: &'a TaskQueue,
    flags: Flags,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        TaskQueue::complete_locked(&mut state, self.flags);
    }
}
