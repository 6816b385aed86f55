/*!
 * Async Semaphore
 *
 * Counting semaphore with FIFO handoff. A release hands the permit
 * directly to the oldest parked waiter; only when nobody is parked
 * does it raise the free count, capped at the construction limit.
 */

use super::registry::{WaitKey, WaiterQueue};
use super::traits::AsyncObject;
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

struct SemaphoreState {
    value: usize,
    limit: usize,
    waiters: WaiterQueue<()>,
}

impl SemaphoreState {
    fn release(&mut self) {
        if self.waiters.resume_front(()) {
            trace!("permit handed to a parked waiter");
        } else {
            self.value = (self.value + 1).min(self.limit);
        }
    }
}

/// Counting semaphore. `wait` takes a permit or parks; `signal`
/// releases one.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
}

impl Semaphore {
    /// Create with `value` free permits, which is also the cap surplus
    /// signals can never push the count past.
    pub fn new(value: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                value,
                limit: value,
                waiters: WaiterQueue::new(),
            }),
        }
    }

    /// Free permits right now.
    pub fn available(&self) -> usize {
        self.state.lock().value
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Take a permit without suspending, if one is free.
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl AsyncObject for Semaphore {
    fn signal(&self) {
        self.state.lock().release();
    }

    async fn wait(&self) {
        SemaphoreWait {
            semaphore: self,
            key: None,
        }
        .await
    }
}

struct SemaphoreWait<'a> {
    semaphore: &'a Semaphore,
    key: Option<WaitKey>,
}

impl Future for SemaphoreWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.semaphore.state.lock();
        match this.key {
            Some(key) => match state.waiters.poll_entry(key, cx) {
                // Handoff: the permit was granted at signal time, the
                // free count never moved.
                Poll::Ready(()) => {
                    this.key = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None if state.value > 0 => {
                state.value -= 1;
                Poll::Ready(())
            }
            None => {
                this.key = Some(state.waiters.insert(cx.waker().clone(), ()));
                Poll::Pending
            }
        }
    }
}

impl Drop for SemaphoreWait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            let mut state = self.semaphore.state.lock();
            if state.waiters.cancel(key).is_some() {
                // A permit was handed to us after cancellation won the
                // race; pass it on instead of leaking it.
                state.release();
            }
        }
    }
}
