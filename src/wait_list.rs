use std::collections::{HashMap, VecDeque};
use std::task::Waker;

/// Identifier of a suspended party, unique within its owning primitive.
pub(crate) type WaiterId = u64;

/// FIFO list of suspended futures and their wakers.
///
/// Owned by one primitive and mutated only between suspension points, so it
/// carries no synchronization of its own. A waiter stays in the list until it
/// is popped by the owner (it was chosen to proceed) or removed by its own
/// future (it was cancelled).
#[derive(Debug, Default)]
pub(crate) struct WaitList {
    order: VecDeque<WaiterId>,
    wakers: HashMap<WaiterId, Waker>,
}

impl WaitList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues `id` at the back of the list.
    pub(crate) fn push(&mut self, id: WaiterId, waker: &Waker) {
        self.order.push_back(id);
        self.wakers.insert(id, waker.clone());
    }

    /// Refreshes the stored waker of a queued waiter.
    ///
    /// Returns `false` if `id` is no longer queued.
    pub(crate) fn update(&mut self, id: WaiterId, waker: &Waker) -> bool {
        match self.wakers.get_mut(&id) {
            Some(stored) => {
                if !stored.will_wake(waker) {
                    *stored = waker.clone();
                }
                true
            }
            None => false,
        }
    }

    /// Removes a waiter that gave up. Returns `true` if it was still queued.
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        if self.wakers.remove(&id).is_none() {
            return false;
        }
        if let Some(pos) = self.order.iter().position(|&queued| queued == id) {
            self.order.remove(pos);
        }
        true
    }

    /// Pops the oldest waiter together with its waker.
    pub(crate) fn pop_front(&mut self) -> Option<(WaiterId, Waker)> {
        let id = self.order.pop_front()?;
        let waker = self.wakers.remove(&id)?;
        Some((id, waker))
    }

    /// Pops every waiter, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<(WaiterId, Waker)> {
        std::iter::from_fn(|| self.pop_front()).collect()
    }

    pub(crate) fn contains(&self, id: WaiterId) -> bool {
        self.wakers.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
