/*!
 * Async Barrier
 *
 * Rendezvous point for a fixed party size. Arrivals accumulate; when
 * the party fills, every parked arrival releases and the count resets
 * for the next generation.
 */

use super::registry::{WaitKey, WaiterQueue};
use super::traits::AsyncObject;
use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

struct BarrierState {
    limit: usize,
    arrived: usize,
    waiters: WaiterQueue<()>,
}

impl BarrierState {
    /// The party is full: release everyone parked and start the next
    /// generation.
    fn trip(&mut self) {
        debug!(
            "barrier filled with {} parties, releasing {} waiters",
            self.limit,
            self.waiters.len()
        );
        self.arrived = 0;
        self.waiters.resume_all(|| ());
    }
}

/// Reusable barrier for `limit` parties.
pub struct Barrier {
    state: Mutex<BarrierState>,
}

impl Barrier {
    /// Create for a party of `limit`. A zero limit behaves like one: a
    /// lone arrival passes straight through.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                limit: limit.max(1),
                arrived: 0,
                waiters: WaiterQueue::new(),
            }),
        }
    }

    /// Arrivals recorded toward the current generation.
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }

    /// Approximate count of parked waiters (diagnostics).
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[async_trait]
impl AsyncObject for Barrier {
    /// Arrive without waiting. Filling the party releases everyone
    /// parked and starts the next generation.
    fn signal(&self) {
        let mut state = self.state.lock();
        state.arrived += 1;
        trace!("barrier arrival {}/{}", state.arrived, state.limit);
        if state.arrived >= state.limit {
            state.trip();
        }
    }

    /// Arrive and park until the party fills.
    async fn wait(&self) {
        BarrierWait {
            barrier: self,
            key: None,
        }
        .await
    }
}

struct BarrierWait<'a> {
    barrier: &'a Barrier,
    key: Option<WaitKey>,
}

impl Future for BarrierWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.barrier.state.lock();
        match this.key {
            Some(key) => match state.waiters.poll_entry(key, cx) {
                Poll::Ready(()) => {
                    this.key = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            None => {
                state.arrived += 1;
                trace!("barrier arrival {}/{}", state.arrived, state.limit);
                if state.arrived >= state.limit {
                    // Last arrival trips the generation and passes through.
                    state.trip();
                    Poll::Ready(())
                } else {
                    this.key = Some(state.waiters.insert(cx.waker().clone(), ()));
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for BarrierWait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            let mut state = self.barrier.state.lock();
            if state.waiters.cancel(key).is_none() {
                // Still parked: withdraw this arrival from the current
                // generation.
                state.arrived = state.arrived.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_party_releases_together() {
        let barrier = Arc::new(Barrier::new(3));
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move { barrier.wait().await }));
        }
        tokio::task::yield_now().await;
        assert_eq!(barrier.arrived(), 2);

        barrier.wait().await;
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(barrier.arrived(), 0);
    }

    #[tokio::test]
    async fn test_signal_counts_as_arrival() {
        let barrier = Arc::new(Barrier::new(2));
        let barrier_clone = barrier.clone();
        let waiter = tokio::spawn(async move { barrier_clone.wait().await });
        tokio::task::yield_now().await;

        barrier.signal();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_arrival_withdraws() {
        let barrier = Barrier::new(2);
        let result = barrier.wait_timeout(Duration::from_millis(10)).await;
        assert!(result.is_err());
        assert_eq!(barrier.arrived(), 0);
        assert_eq!(barrier.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_barrier_is_reusable() {
        let barrier = Barrier::new(1);
        barrier.wait().await;
        barrier.wait().await;
    }
}
