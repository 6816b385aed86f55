/*!
 * task-sync
 *
 * Asynchronous coordination primitives for tokio tasks: events,
 * countdown events, semaphores, mutexes, barriers, broadcast promises,
 * an admission-controlled task queue, and an imperative operation
 * handle. Everything shares one waiter registry, one wait protocol,
 * and one cancellation model (drop the wait, or hand in a token).
 */

pub mod core;
pub mod promise;
pub mod queue;
pub mod sync;

pub use crate::core::{
    Priority, WaitError, WaitResult, PRIORITY_BACKGROUND, PRIORITY_CRITICAL, PRIORITY_DEFAULT,
    PRIORITY_HIGH, PRIORITY_LOW,
};
pub use promise::Promise;
pub use queue::{current_priority, Flags, OperationState, TaskOperation, TaskQueue};
pub use sync::{
    AsyncMutex, AsyncMutexGuard, AsyncObject, Barrier, CountdownEvent, Event, Semaphore,
};

// The cancellation and child-task handles this crate's API speaks.
pub use tokio_util::sync::CancellationToken;
pub use tokio_util::task::TaskTracker;
