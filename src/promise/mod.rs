/*!
 * Promise
 *
 * Single-assignment cell broadcasting one value to any number of
 * waiters. Settlement is terminal: the first `fulfill` wins, every
 * later one is discarded, and every reader from then on observes the
 * stored value without parking.
 *
 * The fallible shape of the cell is `Promise<Result<T, E>>`; the error
 * travels through the value channel, so one type covers both cases.
 */

mod combinators;

use crate::core::errors::{WaitError, WaitResult};
use crate::sync::registry::{WaitKey, WaiterQueue};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum PromiseState<T> {
    Pending(WaiterQueue<()>),
    Settled(T),
}

struct PromiseInner<T> {
    state: Mutex<PromiseState<T>>,
}

/// Shared handle to a single-assignment broadcast cell.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Promise<T> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                state: Mutex::new(PromiseState::Pending(WaiterQueue::new())),
            }),
        }
    }

    /// Create an already-settled promise.
    pub fn settled(value: T) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                state: Mutex::new(PromiseState::Settled(value)),
            }),
        }
    }

    /// Settle the cell and resume every waiter with a copy of `value`.
    /// Returns false when the promise was already settled; the late
    /// value is discarded.
    pub fn fulfill(&self, value: T) -> bool {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, PromiseState::Settled(value)) {
            PromiseState::Pending(mut waiters) => {
                waiters.resume_all(|| ());
                true
            }
            PromiseState::Settled(previous) => {
                // First settlement wins; restore it.
                *state = PromiseState::Settled(previous);
                log::trace!("fulfill on a settled promise discarded");
                false
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(&*self.inner.state.lock(), PromiseState::Settled(_))
    }

    /// The settled value, if any, without parking.
    pub fn try_get(&self) -> Option<T> {
        match &*self.inner.state.lock() {
            PromiseState::Settled(value) => Some(value.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        match &*self.inner.state.lock() {
            PromiseState::Pending(waiters) => waiters.len(),
            PromiseState::Settled(_) => 0,
        }
    }

    /// Suspend until settlement and return a copy of the value.
    pub fn get(&self) -> Get<'_, T> {
        Get {
            promise: self,
            key: None,
        }
    }

    /// Bounded `get`.
    pub async fn get_timeout(&self, timeout: Duration) -> WaitResult<T> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| WaitError::Timeout)
    }

    /// `get`, failing with [`WaitError::Cancelled`] when `token` fires.
    /// The promise itself is unaffected by the caller's cancellation.
    pub async fn get_cancellable(&self, token: &CancellationToken) -> WaitResult<T> {
        if token.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        tokio::select! {
            _ = token.cancelled() => Err(WaitError::Cancelled),
            value = self.get() => Ok(value),
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Promise::get`].
pub struct Get<'a, T> {
    promise: &'a Promise<T>,
    key: Option<WaitKey>,
}

impl<T: Clone> Future for Get<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let mut state = this.promise.inner.state.lock();
        match &mut *state {
            PromiseState::Settled(value) => {
                // Settlement dropped the old table; the key is dead.
                this.key = None;
                Poll::Ready(value.clone())
            }
            PromiseState::Pending(waiters) => {
                match this.key {
                    Some(key) => {
                        // Still pending: only the waker can need refreshing.
                        let _ = waiters.poll_entry(key, cx);
                    }
                    None => this.key = Some(waiters.insert(cx.waker().clone(), ())),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Get<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            if let PromiseState::Pending(waiters) = &mut *self.promise.inner.state.lock() {
                waiters.cancel(key);
            }
        }
    }
}
