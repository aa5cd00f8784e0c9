use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::priority::{Ranked, SemaphorePriority};
use crate::wait_list::{WaitList, WaiterId};

struct State<P> {
    name: Option<String>,
    capacity: usize,
    available: usize,
    /// One FIFO list per priority that has queued waiters.
    buckets: HashMap<P, WaitList>,
    /// Holds exactly one entry per key of `buckets`.
    heap: BinaryHeap<Ranked<P>>,
    /// Waiters a `release` handed a permit to, not yet polled.
    granted: HashSet<WaiterId>,
    next_waiter: WaiterId,
}

impl<P: SemaphorePriority> State<P> {
    fn has_waiters(&self) -> bool {
        !self.heap.is_empty()
    }

    fn enqueue(&mut self, priority: P, id: WaiterId, waker: &Waker) {
        match self.buckets.get_mut(&priority) {
            Some(bucket) => bucket.push(id, waker),
            None => {
                let mut bucket = WaitList::new();
                bucket.push(id, waker);
                self.buckets.insert(priority.clone(), bucket);
                self.heap.push(Ranked(priority));
            }
        }
    }

    fn dequeue(&mut self, priority: &P, id: WaiterId) {
        let Some(bucket) = self.buckets.get_mut(priority) else {
            return;
        };
        bucket.remove(id);
        if bucket.is_empty() {
            self.buckets.remove(priority);
            self.heap.retain(|ranked| ranked.0 != *priority);
        }
    }

    /// Hands one permit to the oldest waiter of the best-ranked bucket.
    ///
    /// Returns the waker to call once the state borrow is released, or
    /// `None` if nobody was queued.
    fn grant_next(&mut self) -> Option<Waker> {
        let Ranked(priority) = self.heap.pop()?;
        let Some(bucket) = self.buckets.get_mut(&priority) else {
            log::error!("semaphore {:?}: bucket {priority:?} missing from map", self.name);
            panic!("priority semaphore heap out of sync with its buckets");
        };
        let Some((id, waker)) = bucket.pop_front() else {
            log::error!("semaphore {:?}: empty bucket {priority:?} left queued", self.name);
            panic!("priority semaphore kept an empty bucket");
        };
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        } else {
            self.heap.push(Ranked(priority.clone()));
        }
        log::trace!("semaphore {:?}: permit handed to waiter {id} at {priority:?}", self.name);
        self.granted.insert(id);
        Some(waker)
    }

    fn waiters(&self) -> usize {
        self.buckets.values().map(WaitList::len).sum()
    }
}

/// Counting semaphore whose waiters are served by priority.
///
/// Waiters are grouped into one FIFO bucket per priority value. A released
/// permit always goes to the oldest waiter of the best-ranked bucket; with
/// numeric priorities that is the lowest value. [`acquire`] without a
/// priority queues at [`SemaphorePriority::top`].
///
/// Permits are handed over directly: `release` picks the next waiter, marks
/// it as granted and wakes it. A fresh acquire never takes a permit while
/// anyone is queued, so priorities cannot be bypassed.
///
/// Share it between tasks behind an `Rc`.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use redlilium_tasks::{LocalPool, Priority, PrioritySemaphore};
///
/// let pool = LocalPool::new();
/// let sem = Rc::new(PrioritySemaphore::new(2));
///
/// let s = sem.clone();
/// let handle = pool.spawn(Priority::High, async move {
///     let _permit = s.acquire_with(3).await;
///     "done"
/// });
///
/// assert_eq!(pool.block_on(handle).unwrap(), Ok("done"));
/// assert_eq!(sem.available(), 2);
/// ```
///
/// [`acquire`]: PrioritySemaphore::acquire
pub struct PrioritySemaphore<P = i64> {
    state: RefCell<State<P>>,
}

impl<P: SemaphorePriority> PrioritySemaphore<P> {
    /// Creates a semaphore with `capacity` free permits.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RefCell::new(State {
                name: None,
                capacity,
                available: capacity,
                buckets: HashMap::new(),
                heap: BinaryHeap::new(),
                granted: HashSet::new(),
                next_waiter: 0,
            }),
        }
    }

    /// Sets a name shown in logs and `Debug` output.
    pub fn named(self, name: impl Into<String>) -> Self {
        self.state.borrow_mut().name = Some(name.into());
        self
    }

    /// Waits for a permit at the top priority.
    pub fn acquire(&self) -> Acquire<'_, P> {
        self.acquire_with(P::top())
    }

    /// Waits for a permit at `priority`.
    pub fn acquire_with(&self, priority: P) -> Acquire<'_, P> {
        Acquire {
            semaphore: self,
            priority,
            waiter: None,
        }
    }

    /// Takes a permit if one is free and nobody is queued.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_, P>> {
        let mut state = self.state.borrow_mut();
        if state.available == 0 || state.has_waiters() {
            return None;
        }
        state.available -= 1;
        Some(SemaphorePermit::new(self))
    }

    /// Returns a permit.
    ///
    /// Wakes the next waiter if there is one, otherwise makes the permit
    /// available again. Permits normally come back through
    /// [`SemaphorePermit`]'s drop; call this directly only to return one
    /// that was [`forget`](SemaphorePermit::forget)-ed.
    pub fn release(&self) {
        let waker = {
            let mut state = self.state.borrow_mut();
            let waker = state.grant_next();
            if waker.is_none() {
                state.available += 1;
                if state.available > state.capacity {
                    log::warn!(
                        "semaphore {:?}: released above capacity ({} > {})",
                        state.name,
                        state.available,
                        state.capacity
                    );
                }
            }
            waker
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Returns `true` if an acquire would have to wait.
    pub fn locked(&self) -> bool {
        let state = self.state.borrow();
        state.available == 0 || state.has_waiters()
    }

    /// Number of permits free right now.
    pub fn available(&self) -> usize {
        self.state.borrow().available
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    /// Number of queued acquires, across all priorities.
    pub fn waiters(&self) -> usize {
        self.state.borrow().waiters()
    }

    pub fn name(&self) -> Option<String> {
        self.state.borrow().name.clone()
    }
}

impl<P: SemaphorePriority> fmt::Debug for PrioritySemaphore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PrioritySemaphore")
            .field("name", &state.name)
            .field("capacity", &state.capacity)
            .field("available", &state.available)
            .field("waiters", &state.waiters())
            .finish()
    }
}

/// Future returned by [`PrioritySemaphore::acquire_with`].
///
/// Dropping it while queued removes it from its bucket. Dropping it after a
/// permit was handed to it but before it was polled passes the permit on.
pub struct Acquire<'a, P: SemaphorePriority> {
    semaphore: &'a PrioritySemaphore<P>,
    priority: P,
    waiter: Option<WaiterId>,
}

impl<P: SemaphorePriority> Unpin for Acquire<'_, P> {}

impl<'a, P: SemaphorePriority> Future for Acquire<'a, P> {
    type Output = SemaphorePermit<'a, P>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let semaphore = this.semaphore;
        let mut state = semaphore.state.borrow_mut();

        match this.waiter {
            None => {
                if state.available > 0 && !state.has_waiters() {
                    state.available -= 1;
                    return Poll::Ready(SemaphorePermit::new(semaphore));
                }
                let id = state.next_waiter;
                state.next_waiter += 1;
                log::trace!(
                    "semaphore {:?}: waiter {id} queued at {:?}",
                    state.name,
                    this.priority
                );
                state.enqueue(this.priority.clone(), id, cx.waker());
                this.waiter = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if state.granted.remove(&id) {
                    this.waiter = None;
                    return Poll::Ready(SemaphorePermit::new(semaphore));
                }
                if let Some(bucket) = state.buckets.get_mut(&this.priority) {
                    bucket.update(id, cx.waker());
                }
                Poll::Pending
            }
        }
    }
}

impl<P: SemaphorePriority> Drop for Acquire<'_, P> {
    fn drop(&mut self) {
        let Some(id) = self.waiter.take() else {
            return;
        };
        let forward = {
            let mut state = self.semaphore.state.borrow_mut();
            if state.granted.remove(&id) {
                true
            } else {
                state.dequeue(&self.priority, id);
                false
            }
        };
        if forward {
            log::trace!("semaphore: granted waiter {id} dropped, forwarding permit");
            self.semaphore.release();
        }
    }
}

impl<P: SemaphorePriority> fmt::Debug for Acquire<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("priority", &self.priority)
            .field("queued", &self.waiter.is_some())
            .finish()
    }
}

/// RAII permit that releases back to its [`PrioritySemaphore`] on drop.
///
/// `!Send`, like the semaphore itself.
pub struct SemaphorePermit<'a, P: SemaphorePriority> {
    semaphore: &'a PrioritySemaphore<P>,
    _not_send: PhantomData<*mut ()>,
}

impl<'a, P: SemaphorePriority> SemaphorePermit<'a, P> {
    fn new(semaphore: &'a PrioritySemaphore<P>) -> Self {
        Self {
            semaphore,
            _not_send: PhantomData,
        }
    }

    /// Keeps the permit taken without releasing it.
    ///
    /// The capacity stays reduced until [`PrioritySemaphore::release`] is
    /// called by hand.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl<P: SemaphorePriority> Drop for SemaphorePermit<'_, P> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl<P: SemaphorePriority> fmt::Debug for SemaphorePermit<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphorePermit").finish_non_exhaustive()
    }
}
