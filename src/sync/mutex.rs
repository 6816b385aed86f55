/*!
 * Async Mutex
 *
 * Suspending mutual exclusion with FIFO handoff on release. `lock`
 * returns an RAII guard; the wait-protocol `wait`/`signal` pair maps
 * onto acquire/release for callers driving it through [`AsyncObject`].
 */

use super::registry::{WaitKey, WaiterQueue};
use super::traits::AsyncObject;
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex as RawMutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

struct LockState {
    locked: bool,
    waiters: WaiterQueue<()>,
}

impl LockState {
    fn release(&mut self) {
        // Handoff keeps `locked` true for the resumed waiter.
        if self.waiters.resume_front(()) {
            trace!("lock handed to a parked waiter");
        } else {
            self.locked = false;
        }
    }
}

/// Suspending mutex. Holds no data; it is an ownership token guarding
/// whatever the caller associates with it.
pub struct AsyncMutex {
    state: RawMutex<LockState>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self {
            state: RawMutex::new(LockState {
                locked: false,
                waiters: WaiterQueue::new(),
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquire, suspending until the mutex is free.
    pub async fn lock(&self) -> AsyncMutexGuard<'_> {
        LockWait {
            mutex: self,
            key: None,
        }
        .await;
        AsyncMutexGuard { mutex: self }
    }

    /// Acquire without suspending.
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<'_>> {
        let mut state = self.state.lock();
        if state.locked {
            None
        } else {
            state.locked = true;
            Some(AsyncMutexGuard { mutex: self })
        }
    }

    fn unlock(&self) {
        self.state.lock().release();
    }
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII ownership token; releases the mutex on drop.
pub struct AsyncMutexGuard<'a> {
    mutex: &'a AsyncMutex,
}

impl Drop for AsyncMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[async_trait]
impl AsyncObject for AsyncMutex {
    /// Release. With no owner this is a no-op.
    fn signal(&self) {
        self.unlock();
    }

    /// Acquire without a guard; the caller releases with `signal`.
    async fn wait(&self) {
        LockWait {
            mutex: self,
            key: None,
        }
        .await
    }
}

struct LockWait<'a> {
    mutex: &'a AsyncMutex,
    key: Option<WaitKey>,
}

impl Future for LockWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.mutex.state.lock();
        match this.key {
            Some(key) => match state.waiters.poll_entry(key, cx) {
                Poll::Ready(()) => {
                    this.key = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None if !state.locked => {
                state.locked = true;
                Poll::Ready(())
            }
            None => {
                this.key = Some(state.waiters.insert(cx.waker().clone(), ()));
                Poll::Pending
            }
        }
    }
}

impl Drop for LockWait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            let mut state = self.mutex.state.lock();
            if state.waiters.cancel(key).is_some() {
                // Ownership was handed to us after cancellation won the
                // race; pass it to the next waiter.
                state.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let mutex = AsyncMutex::new();
        {
            let _guard = mutex.lock().await;
            assert!(mutex.is_locked());
            assert!(mutex.try_lock().is_none());
        }
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn test_contended_lock_hands_off_in_order() {
        let mutex = Arc::new(AsyncMutex::new());
        let order = Arc::new(RawMutex::new(Vec::new()));

        let guard = mutex.lock().await;
        let mut tasks = Vec::new();
        for i in 0..3 {
            let mutex = mutex.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = mutex.lock().await;
                order.lock().push(i);
            }));
            // Park the waiters one at a time so arrival order is fixed.
            tokio::task::yield_now().await;
        }

        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_signal_without_owner_is_noop() {
        let mutex = AsyncMutex::new();
        mutex.signal();
        assert!(!mutex.is_locked());
        let _guard = mutex.lock().await;
    }

    #[tokio::test]
    async fn test_wait_protocol_acquires_and_releases() {
        let mutex = AsyncMutex::new();
        mutex.wait().await;
        assert!(mutex.is_locked());
        mutex.signal();
        assert!(!mutex.is_locked());
    }
}
