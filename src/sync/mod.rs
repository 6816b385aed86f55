/*!
 * Coordination Primitives
 *
 * The event family over a shared waiter registry. Every primitive owns
 * one lock guarding its waiter table and condition state; locks are
 * never held across suspension points. Dropping any wait future
 * de-tables the waiter before the drop returns.
 */

mod barrier;
mod countdown;
mod event;
mod mutex;
pub(crate) mod registry;
mod semaphore;
mod traits;

pub use barrier::Barrier;
pub use countdown::CountdownEvent;
pub use event::Event;
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use semaphore::Semaphore;
pub use traits::AsyncObject;
