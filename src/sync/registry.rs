/*!
 * Waiter Registry
 *
 * Insertion-ordered table of suspended callers, shared by every
 * primitive in this crate. Each entry is a single-shot resumption slot
 * that moves from `Waiting` to `Ready` exactly once, always under the
 * owning primitive's lock.
 *
 * # Races
 *
 * Three races meet here and each has one resolution:
 *
 * - *Registration vs. resume*: primitives check their terminal state
 *   before tabling, so a waiter is never inserted into a table that
 *   already decided to release everyone.
 * - *Resume vs. cancellation*: a wait future that is dropped calls
 *   [`WaiterQueue::cancel`]; if the slot was already `Ready` the
 *   carried value is returned so the primitive can hand it to the next
 *   waiter instead of leaking it.
 * - *Registration vs. cancellation*: a wait future that was never
 *   polled has no entry, so there is nothing to tear down.
 */

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::task::{Context, Poll, Waker};

/// Identity of a tabled waiter. Keys are monotonic per table, which
/// doubles as FIFO order.
pub(crate) type WaitKey = u64;

enum SlotState<V> {
    /// Suspended; holds the waker to resume the caller.
    Waiting(Waker),
    /// Resumed; holds the value until the caller's next poll consumes it.
    Ready(V),
}

struct Slot<V, T> {
    tag: T,
    state: SlotState<V>,
}

/// FIFO waiter table. `V` is the value handed to a resumed waiter, `T`
/// an optional per-waiter tag a primitive may inspect before resuming
/// (the task queue stores admission flags there).
pub(crate) struct WaiterQueue<V, T = ()> {
    next_key: WaitKey,
    slots: BTreeMap<WaitKey, Slot<V, T>>,
}

impl<V, T> WaiterQueue<V, T> {
    pub(crate) fn new() -> Self {
        Self {
            next_key: 0,
            slots: BTreeMap::new(),
        }
    }

    /// Number of tabled entries, resumed-but-unconsumed included.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Table a new waiter. The caller suspends until a signaller moves
    /// the slot to `Ready`.
    pub(crate) fn insert(&mut self, waker: Waker, tag: T) -> WaitKey {
        let key = self.next_key;
        self.next_key += 1;
        self.slots.insert(
            key,
            Slot {
                tag,
                state: SlotState::Waiting(waker),
            },
        );
        key
    }

    /// Re-poll a tabled waiter. Refreshes the stored waker while the
    /// slot is `Waiting`; consumes and removes the slot once `Ready`.
    pub(crate) fn poll_entry(&mut self, key: WaitKey, cx: &mut Context<'_>) -> Poll<V> {
        let Entry::Occupied(mut occupied) = self.slots.entry(key) else {
            // Only the owning wait future removes its entry.
            panic!("waiter {} polled after removal", key);
        };

        if let SlotState::Waiting(waker) = &mut occupied.get_mut().state {
            if !waker.will_wake(cx.waker()) {
                *waker = cx.waker().clone();
            }
            return Poll::Pending;
        }

        match occupied.remove().state {
            SlotState::Ready(value) => Poll::Ready(value),
            SlotState::Waiting(_) => unreachable!(),
        }
    }

    /// De-table on cancellation. Returns the value when the slot had
    /// already been resumed; the caller must redistribute it.
    pub(crate) fn cancel(&mut self, key: WaitKey) -> Option<V> {
        match self.slots.remove(&key)?.state {
            SlotState::Ready(value) => Some(value),
            SlotState::Waiting(_) => None,
        }
    }

    /// Tag of the frontmost still-waiting entry.
    pub(crate) fn front_tag(&self) -> Option<&T> {
        self.slots
            .values()
            .find(|slot| matches!(slot.state, SlotState::Waiting(_)))
            .map(|slot| &slot.tag)
    }

    /// Resume the frontmost still-waiting entry with `value`. Returns
    /// false when nobody is waiting.
    pub(crate) fn resume_front(&mut self, value: V) -> bool {
        for slot in self.slots.values_mut() {
            if matches!(slot.state, SlotState::Waiting(_)) {
                match std::mem::replace(&mut slot.state, SlotState::Ready(value)) {
                    SlotState::Waiting(waker) => waker.wake(),
                    SlotState::Ready(_) => unreachable!(),
                }
                return true;
            }
        }
        false
    }

    /// Resume every still-waiting entry, minting one value per waiter.
    pub(crate) fn resume_all(&mut self, mut value: impl FnMut() -> V) {
        for slot in self.slots.values_mut() {
            if matches!(slot.state, SlotState::Waiting(_)) {
                match std::mem::replace(&mut slot.state, SlotState::Ready(value())) {
                    SlotState::Waiting(waker) => waker.wake(),
                    SlotState::Ready(_) => unreachable!(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_insert_keys_are_fifo() {
        let mut queue = WaiterQueue::<(), u32>::new();
        let waker = noop_waker();
        let a = queue.insert(waker.clone(), 1);
        let b = queue.insert(waker.clone(), 2);
        let c = queue.insert(waker, 3);
        assert!(a < b && b < c);
        assert_eq!(queue.front_tag(), Some(&1));
    }

    #[test]
    fn test_resume_front_is_at_most_once() {
        let mut queue = WaiterQueue::<u8>::new();
        let waker = noop_waker();
        let key = queue.insert(waker.clone(), ());
        assert!(queue.resume_front(7));
        // The slot is Ready now; a second resume finds nobody waiting.
        assert!(!queue.resume_front(8));

        let mut cx = Context::from_waker(&waker);
        assert_eq!(queue.poll_entry(key, &mut cx), Poll::Ready(7));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_waiting_entry_returns_none() {
        let mut queue = WaiterQueue::<u8>::new();
        let key = queue.insert(noop_waker(), ());
        assert_eq!(queue.cancel(key), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_resumed_entry_returns_value() {
        let mut queue = WaiterQueue::<u8>::new();
        let key = queue.insert(noop_waker(), ());
        assert!(queue.resume_front(9));
        // The race loser gets the value back for redistribution.
        assert_eq!(queue.cancel(key), Some(9));
    }

    #[test]
    fn test_resume_all_skips_ready_slots() {
        let mut queue = WaiterQueue::<u32>::new();
        let waker = noop_waker();
        let first = queue.insert(waker.clone(), ());
        let second = queue.insert(waker.clone(), ());
        assert!(queue.resume_front(1));

        let mut minted = 10;
        queue.resume_all(|| {
            minted += 1;
            minted
        });

        let mut cx = Context::from_waker(&waker);
        assert_eq!(queue.poll_entry(first, &mut cx), Poll::Ready(1));
        assert_eq!(queue.poll_entry(second, &mut cx), Poll::Ready(11));
    }

    #[test]
    fn test_poll_entry_refreshes_waker() {
        let mut queue = WaiterQueue::<()>::new();
        let waker = noop_waker();
        let key = queue.insert(waker.clone(), ());
        let mut cx = Context::from_waker(&waker);
        assert_eq!(queue.poll_entry(key, &mut cx), Poll::Pending);
        assert_eq!(queue.len(), 1);
        assert!(queue.resume_front(()));
        assert_eq!(queue.poll_entry(key, &mut cx), Poll::Ready(()));
    }
}
