use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::cancellation::Cancelled;
use crate::wait_list::WaiterId;

thread_local! {
    /// Monotonic counter stamped on every resolution, so handles can be
    /// ordered by when they actually completed.
    static COMPLETION_SEQ: Cell<u64> = const { Cell::new(0) };
}

fn next_completion() -> u64 {
    COMPLETION_SEQ.with(|seq| {
        let value = seq.get();
        seq.set(value + 1);
        value
    })
}

/// Anything whose scheduling priority is how many parties wait on it.
pub trait Demand {
    /// Number of parties currently suspended waiting on this item.
    fn demand(&self) -> usize;
}

enum State<T> {
    Pending,
    Ready(T),
    Cancelled,
}

struct Shared<T> {
    state: State<T>,
    waiters: HashMap<WaiterId, Waker>,
    next_waiter: WaiterId,
    completed_at: Option<u64>,
    /// Task computing the value, woken when the handle is cancelled.
    producer: Option<Waker>,
}

/// Single-assignment result handle that knows who is waiting on it.
///
/// A `SmartFuture` is shared: clones refer to the same slot. Each clone is an
/// independent awaiter, and while a clone is suspended on the slot it counts
/// toward [`num_waiters()`](SmartFuture::num_waiters). Demand-ordered queues
/// use that count to run the most awaited work first.
///
/// Awaiting yields a clone of the stored value, or `Err(Cancelled)` if the
/// producer gave up before resolving it.
///
/// # Example
///
/// ```
/// use redlilium_tasks::SmartFuture;
///
/// let fut = SmartFuture::new();
/// assert!(!fut.is_done());
/// fut.set(42u32).unwrap();
/// assert_eq!(fut.try_get(), Some(Ok(42)));
/// ```
pub struct SmartFuture<T> {
    shared: Rc<RefCell<Shared<T>>>,
    waiter: Option<WaiterId>,
}

impl<T> SmartFuture<T> {
    /// Creates an unresolved handle.
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                state: State::Pending,
                waiters: HashMap::new(),
                next_waiter: 0,
                completed_at: None,
                producer: None,
            })),
            waiter: None,
        }
    }

    /// Creates a handle that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        let fut = Self::new();
        // A fresh handle is always pending.
        let _ = fut.set(value);
        fut
    }

    /// Resolves the handle and wakes every waiter.
    ///
    /// Returns the value back if the handle was already resolved or cancelled.
    pub fn set(&self, value: T) -> Result<(), T> {
        let wakers = {
            let mut shared = self.shared.borrow_mut();
            if !matches!(shared.state, State::Pending) {
                return Err(value);
            }
            shared.state = State::Ready(value);
            shared.completed_at = Some(next_completion());
            shared.producer = None;
            shared.waiters.values().cloned().collect::<Vec<_>>()
        };
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Marks the handle as never going to resolve and wakes every waiter.
    ///
    /// The task producing the value is woken too and stops at its next
    /// poll, releasing whatever it holds.
    ///
    /// Returns `false` if the handle was already resolved or cancelled.
    pub fn cancel(&self) -> bool {
        let wakers = {
            let mut shared = self.shared.borrow_mut();
            if !matches!(shared.state, State::Pending) {
                return false;
            }
            shared.state = State::Cancelled;
            shared.completed_at = Some(next_completion());
            let producer = shared.producer.take();
            shared
                .waiters
                .values()
                .cloned()
                .chain(producer)
                .collect::<Vec<_>>()
        };
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    /// Returns `true` once the handle is resolved or cancelled.
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.borrow().state, State::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.borrow().state, State::Cancelled)
    }

    /// Number of clones currently suspended on this handle.
    pub fn num_waiters(&self) -> usize {
        self.shared.borrow().waiters.len()
    }

    /// Position of this handle in the thread's resolution order.
    ///
    /// `None` while pending. Smaller values completed earlier.
    pub fn completion_order(&self) -> Option<u64> {
        self.shared.borrow().completed_at
    }

    /// Returns `true` if both handles share the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Heap ordering by demand: `Less` when `self` has more waiters, so a
    /// min-heap pops the most contended handle first.
    pub fn cmp_demand(&self, other: &Self) -> Ordering {
        other.num_waiters().cmp(&self.num_waiters())
    }

    /// Future the producer races its computation against. Resolves once
    /// the handle is cancelled and does not count as a waiter.
    pub(crate) fn abandoned(&self) -> Abandoned<T> {
        Abandoned {
            shared: Rc::clone(&self.shared),
        }
    }

    fn unregister(&mut self) {
        if let Some(id) = self.waiter.take()
            && let Ok(mut shared) = self.shared.try_borrow_mut()
        {
            shared.waiters.remove(&id);
        }
    }
}

impl<T: Clone> SmartFuture<T> {
    /// Returns the outcome without waiting, or `None` while pending.
    pub fn try_get(&self) -> Option<Result<T, Cancelled>> {
        match &self.shared.borrow().state {
            State::Pending => None,
            State::Ready(value) => Some(Ok(value.clone())),
            State::Cancelled => Some(Err(Cancelled)),
        }
    }
}

impl<T> Clone for SmartFuture<T> {
    /// The clone shares the slot but is not registered as a waiter until it
    /// is polled.
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            waiter: None,
        }
    }
}

impl<T> Default for SmartFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SmartFuture<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl<T> Demand for SmartFuture<T> {
    fn demand(&self) -> usize {
        self.num_waiters()
    }
}

impl<T: Clone> Future for SmartFuture<T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = {
            let mut shared = this.shared.borrow_mut();
            let outcome = match &shared.state {
                State::Ready(value) => Some(Ok(value.clone())),
                State::Cancelled => Some(Err(Cancelled)),
                State::Pending => None,
            };
            if outcome.is_none() {
                let id = match this.waiter {
                    Some(id) => id,
                    None => {
                        let id = shared.next_waiter;
                        shared.next_waiter += 1;
                        this.waiter = Some(id);
                        id
                    }
                };
                shared.waiters.insert(id, cx.waker().clone());
            }
            outcome
        };

        match outcome {
            Some(outcome) => {
                this.unregister();
                Poll::Ready(outcome)
            }
            None => Poll::Pending,
        }
    }
}

/// Future returned by [`SmartFuture::abandoned`].
pub(crate) struct Abandoned<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Future for Abandoned<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.borrow_mut();
        match shared.state {
            State::Cancelled => Poll::Ready(()),
            State::Pending => {
                shared.producer = Some(cx.waker().clone());
                Poll::Pending
            }
            // Resolved handles are never abandoned.
            State::Ready(_) => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for SmartFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        let state = match shared.state {
            State::Pending => "pending",
            State::Ready(_) => "finished",
            State::Cancelled => "cancelled",
        };
        f.debug_struct("SmartFuture")
            .field("waiters", &shared.waiters.len())
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn pending_until_set() {
        let fut = SmartFuture::new();
        let mut waiter = fut.clone();
        assert!(poll_once(&mut waiter).is_pending());
        fut.set("done").unwrap();
        assert_eq!(poll_once(&mut waiter), Poll::Ready(Ok("done")));
    }

    #[test]
    fn set_twice_returns_value() {
        let fut = SmartFuture::new();
        fut.set(1).unwrap();
        assert_eq!(fut.set(2), Err(2));
        assert_eq!(fut.try_get(), Some(Ok(1)));
    }

    #[test]
    fn cancel_resolves_waiters_with_error() {
        let fut: SmartFuture<u8> = SmartFuture::new();
        let mut waiter = fut.clone();
        assert!(poll_once(&mut waiter).is_pending());
        assert!(fut.cancel());
        assert!(!fut.cancel());
        assert!(fut.is_cancelled());
        assert_eq!(poll_once(&mut waiter), Poll::Ready(Err(Cancelled)));
        assert_eq!(fut.set(3), Err(3));
    }

    #[test]
    fn waiter_count_tracks_suspended_clones() {
        let fut: SmartFuture<u8> = SmartFuture::new();
        let mut a = fut.clone();
        let mut b = fut.clone();
        let idle = fut.clone();
        assert_eq!(fut.num_waiters(), 0);

        assert!(poll_once(&mut a).is_pending());
        assert!(poll_once(&mut b).is_pending());
        // Re-polling does not double count.
        assert!(poll_once(&mut a).is_pending());
        assert_eq!(fut.num_waiters(), 2);
        assert_eq!(idle.demand(), 2);

        drop(b);
        assert_eq!(fut.num_waiters(), 1);

        fut.set(9).unwrap();
        assert_eq!(poll_once(&mut a), Poll::Ready(Ok(9)));
        assert_eq!(fut.num_waiters(), 0);
    }

    #[test]
    fn more_waiters_sorts_first() {
        let busy: SmartFuture<u8> = SmartFuture::new();
        let quiet: SmartFuture<u8> = SmartFuture::new();
        let mut w = busy.clone();
        assert!(poll_once(&mut w).is_pending());
        assert_eq!(busy.cmp_demand(&quiet), Ordering::Less);
        assert_eq!(quiet.cmp_demand(&busy), Ordering::Greater);
    }

    #[test]
    fn completion_order_follows_resolution() {
        let first = SmartFuture::new();
        let second = SmartFuture::new();
        assert_eq!(first.completion_order(), None);
        second.set(()).unwrap();
        first.set(()).unwrap();
        assert!(second.completion_order() < first.completion_order());
    }

    #[test]
    fn abandoned_resolves_on_cancel_only() {
        let fut: SmartFuture<u8> = SmartFuture::new();
        let mut abandoned = fut.abandoned();
        assert!(poll_once(&mut abandoned).is_pending());
        assert_eq!(fut.num_waiters(), 0);

        fut.cancel();
        assert_eq!(poll_once(&mut abandoned), Poll::Ready(()));

        let done = SmartFuture::ready(1u8);
        assert!(poll_once(&mut done.abandoned()).is_pending());
    }

    #[test]
    fn clones_share_slot() {
        let fut = SmartFuture::<u8>::new();
        let other = fut.clone();
        assert!(fut.ptr_eq(&other));
        assert!(!fut.ptr_eq(&SmartFuture::new()));
        assert_eq!(SmartFuture::ready(4).try_get(), Some(Ok(4)));
    }
}
