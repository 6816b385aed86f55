/*!
 * Countdown Event
 *
 * Event that is *set* whenever its live count is at or below a fixed
 * limit. Signals decrement the count; increments and resets move it
 * back up. Release decisions are made only under the lock, at the
 * moment the count changes, so a reset that lands above the limit can
 * never spuriously release a tabled waiter.
 */

use super::registry::{WaitKey, WaiterQueue};
use super::traits::AsyncObject;
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

struct CountdownState {
    limit: usize,
    initial: usize,
    count: usize,
    waiters: WaiterQueue<()>,
}

impl CountdownState {
    fn is_set(&self) -> bool {
        self.count <= self.limit
    }

    fn release_if_set(&mut self) {
        if self.is_set() {
            if !self.waiters.is_empty() {
                trace!(
                    "countdown at {} (limit {}), releasing {} waiters",
                    self.count,
                    self.limit,
                    self.waiters.len()
                );
            }
            self.waiters.resume_all(|| ());
        }
    }
}

/// Countdown event: set iff `count <= limit`.
pub struct CountdownEvent {
    state: Mutex<CountdownState>,
}

impl CountdownEvent {
    /// Create with the given release threshold and a zero count. The
    /// event starts out set.
    pub fn new(limit: usize) -> Self {
        Self::with_initial(limit, 0)
    }

    /// Create with a release threshold and a starting count, which is
    /// also the baseline `reset()` restores.
    pub fn with_initial(limit: usize, initial: usize) -> Self {
        Self {
            state: Mutex::new(CountdownState {
                limit,
                initial,
                count: initial,
                waiters: WaiterQueue::new(),
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().is_set()
    }

    pub fn current_count(&self) -> usize {
        self.state.lock().count
    }

    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Decrement the count by `count`, saturating at zero. Crossing the
    /// limit releases every waiter.
    pub fn signal_by(&self, count: usize) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(count);
        state.release_if_set();
    }

    /// Raise the count by `count`. Raising it above the limit silently
    /// unsets the event; waiters released earlier are unaffected.
    pub fn increment(&self, count: usize) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(count);
    }

    /// Restore the count to the construction-time baseline.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.count = state.initial;
        state.release_if_set();
    }

    /// Replace the baseline and set the count to it.
    pub fn reset_to(&self, initial: usize) {
        let mut state = self.state.lock();
        state.initial = initial;
        state.count = initial;
        state.release_if_set();
    }
}

#[async_trait]
impl AsyncObject for CountdownEvent {
    fn signal(&self) {
        self.signal_by(1);
    }

    async fn wait(&self) {
        CountdownWait {
            event: self,
            key: None,
        }
        .await
    }
}

struct CountdownWait<'a> {
    event: &'a CountdownEvent,
    key: Option<WaitKey>,
}

impl Future for CountdownWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.event.state.lock();
        match this.key {
            Some(key) => match state.waiters.poll_entry(key, cx) {
                Poll::Ready(()) => {
                    this.key = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None if state.is_set() => Poll::Ready(()),
            None => {
                this.key = Some(state.waiters.insert(cx.waker().clone(), ()));
                Poll::Pending
            }
        }
    }
}

impl Drop for CountdownWait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.event.state.lock().waiters.cancel(key);
        }
    }
}
