/*!
 * Async Event
 *
 * Manual-reset event. `signal` releases every current waiter and lets
 * every future waiter through until `reset` clears the state.
 */

use super::registry::{WaitKey, WaiterQueue};
use super::traits::AsyncObject;
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

struct EventState {
    set: bool,
    waiters: WaiterQueue<()>,
}

/// Manual-reset event for suspending tasks.
///
/// # Examples
///
/// ```
/// use task_sync::{AsyncObject, Event};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let event = Event::new();
/// event.signal();
/// event.wait().await;
/// assert!(event.is_set());
/// # });
/// ```
pub struct Event {
    state: Mutex<EventState>,
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        Self::with_state(false)
    }

    /// Create an event in the given state.
    pub fn with_state(set: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                set,
                waiters: WaiterQueue::new(),
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }

    /// Clear the event so subsequent waits park again. Waiters already
    /// released by an earlier signal are unaffected.
    pub fn reset(&self) {
        self.state.lock().set = false;
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncObject for Event {
    fn signal(&self) {
        let mut state = self.state.lock();
        state.set = true;
        trace!("event set, releasing {} waiters", state.waiters.len());
        state.waiters.resume_all(|| ());
    }

    async fn wait(&self) {
        EventWait {
            event: self,
            key: None,
        }
        .await
    }
}

struct EventWait<'a> {
    event: &'a Event,
    key: Option<WaitKey>,
}

impl Future for EventWait<'_> {
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
            None if state.set => Poll::Ready(()),
            None => {
                this.key = Some(state.waiters.insert(cx.waker().clone(), ()));
                Poll::Pending
            }
        }
    }
}

impl Drop for EventWait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.event.state.lock().waiters.cancel(key);
        }
    }
}
