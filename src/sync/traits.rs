/*!
 * Wait Protocol
 *
 * Uniform signal/wait facade implemented by every primitive in this
 * crate. `wait_timeout` and `wait_cancellable` are provided methods so
 * a primitive only supplies the two fundamental operations.
 */

use crate::core::errors::{WaitError, WaitResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// An object tasks can signal and suspend on.
///
/// Dropping the future returned by [`wait`](AsyncObject::wait) is the
/// cancellation path: the waiter is removed from the object's table
/// before the drop returns, so later signallers never resume a stale
/// slot.
#[async_trait]
pub trait AsyncObject: Send + Sync {
    /// Signal the object. Non-suspending; what "signal" means is
    /// primitive-specific (set, decrement, release, arrive, start).
    fn signal(&self);

    /// Suspend until the object's condition releases the caller.
    async fn wait(&self);

    /// Bounded wait. A zero duration is legal and reports the current
    /// state: an already-released condition completes on the first
    /// poll, before the elapsed timer is consulted.
    async fn wait_timeout(&self, timeout: Duration) -> WaitResult<()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(WaitError::Timeout),
        }
    }

    /// Wait, failing with [`WaitError::Cancelled`] when `token` fires.
    ///
    /// An already-cancelled token short-circuits without touching the
    /// object's waiter table.
    async fn wait_cancellable(&self, token: &CancellationToken) -> WaitResult<()> {
        if token.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        tokio::select! {
            _ = token.cancelled() => Err(WaitError::Cancelled),
            _ = self.wait() => Ok(()),
        }
    }
}
