//! Async work queues and the worker pools built on them.
//!
//! [`Queue`] is an awaitable buffer with optional size limit and
//! `task_done`/`join` accounting. Its storage policy is a [`Buffer`]:
//!
//! - [`Fifo`]: submission order ([`FifoQueue`]).
//! - [`Prioritized`]: lowest priority value first ([`PriorityQueue`]).
//! - [`ByDemand`]: most awaited item first, re-evaluated on every pop
//!   ([`VariablePriorityQueue`]).
//!
//! [`ProcessingQueue`] binds one async function to a queue and a fixed set of
//! worker loops that execute submitted calls.

mod buffer;
mod processing;

pub use buffer::{Buffer, ByDemand, Fifo, Prioritized, Slot};
pub use processing::{
    Job, PriorityProcessingQueue, ProcessingQueue, QueueConfig, SmartProcessingQueue,
    default_workers,
};

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::error::TaskError;
use crate::wait_list::{WaitList, WaiterId};

/// Queue served in submission order.
pub type FifoQueue<T> = Queue<Fifo<T>>;

/// Queue served lowest priority value first.
pub type PriorityQueue<P, T> = Queue<Prioritized<P, T>>;

/// Queue served by current demand of its items.
pub type VariablePriorityQueue<T> = Queue<ByDemand<T>>;

struct Inner<B> {
    buffer: B,
    maxsize: Option<usize>,
    getters: WaitList,
    putters: WaitList,
    /// Putters woken for a free slot that have not been polled yet.
    woken_putters: usize,
    joiners: WaitList,
    unfinished: usize,
    next_waiter: WaiterId,
}

impl<B: Buffer> Inner<B> {
    fn is_full(&self) -> bool {
        self.maxsize.is_some_and(|max| self.buffer.len() >= max)
    }

    /// Whether a new putter has to queue. Slots freed for woken putters and
    /// suspended putters come before it.
    fn must_wait(&self) -> bool {
        self.maxsize.is_some_and(|max| {
            self.buffer.len() + self.woken_putters >= max || !self.putters.is_empty()
        })
    }

    fn wake_putter(&mut self) -> Option<Waker> {
        let (_, waker) = self.putters.pop_front()?;
        self.woken_putters += 1;
        Some(waker)
    }

    fn next_id(&mut self) -> WaiterId {
        let id = self.next_waiter;
        self.next_waiter += 1;
        id
    }

    /// Stores an item and picks the getter to wake.
    fn push(&mut self, key: B::Key, item: B::Item) -> Option<Waker> {
        self.buffer.push(key, item);
        self.unfinished += 1;
        self.getters.pop_front().map(|(_, waker)| waker)
    }

    /// Takes the next entry and picks the putter to wake.
    fn take(&mut self) -> Option<(B::Entry, Option<Waker>)> {
        let entry = self.buffer.pop()?;
        let putter = self.wake_putter();
        Some((entry, putter))
    }

    fn take_items(&mut self, count: usize) -> (Vec<B::Item>, Vec<Waker>) {
        let mut items = Vec::with_capacity(count.min(self.buffer.len()));
        let mut wakers = Vec::new();
        while items.len() < count {
            let Some((entry, putter)) = self.take() else {
                break;
            };
            items.push(B::into_item(entry));
            wakers.extend(putter);
        }
        (items, wakers)
    }
}

fn wake_all(wakers: impl IntoIterator<Item = Waker>) {
    wakers.into_iter().for_each(Waker::wake);
}

/// Awaitable buffer shared by producers and consumers on one thread.
///
/// Getters suspend while the queue is empty; putters suspend while a bounded
/// queue is full. Each `put` counts as one unfinished item until a consumer
/// calls [`task_done`](Queue::task_done); [`join`](Queue::join) waits for the
/// count to reach zero.
///
/// # Example
///
/// ```
/// use redlilium_tasks::{FifoQueue, LocalPool};
///
/// let pool = LocalPool::new();
/// let queue = FifoQueue::new();
/// queue.put_nowait(1).unwrap();
/// queue.put_nowait(2).unwrap();
///
/// assert_eq!(pool.block_on(queue.get()).unwrap(), 1);
/// assert_eq!(queue.get_all_nowait().unwrap(), vec![2]);
/// ```
pub struct Queue<B: Buffer> {
    inner: RefCell<Inner<B>>,
}

impl<B: Buffer + Default> Queue<B> {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::with_maxsize(None)
    }

    /// Creates a queue holding at most `maxsize` items. Zero means unbounded.
    pub fn bounded(maxsize: usize) -> Self {
        Self::with_maxsize((maxsize > 0).then_some(maxsize))
    }

    fn with_maxsize(maxsize: Option<usize>) -> Self {
        Self {
            inner: RefCell::new(Inner {
                buffer: B::default(),
                maxsize,
                getters: WaitList::new(),
                putters: WaitList::new(),
                woken_putters: 0,
                joiners: WaitList::new(),
                unfinished: 0,
                next_waiter: 0,
            }),
        }
    }
}

impl<B: Buffer + Default> Default for Queue<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Buffer<Key = ()>> Queue<B> {
    /// Adds an item without waiting. Fails with [`TaskError::QueueFull`] if
    /// the queue is bounded and full, or if suspended putters are still
    /// waiting for room; the item is dropped in that case.
    pub fn put_nowait(&self, item: B::Item) -> Result<(), TaskError> {
        self.put_nowait_with((), item)
    }

    /// Adds an item, waiting for room if the queue is bounded and full.
    pub fn put(&self, item: B::Item) -> Put<'_, B> {
        self.put_with((), item)
    }
}

impl<B: Buffer> Queue<B> {
    /// Adds an item under `key` without waiting.
    pub fn put_nowait_with(&self, key: B::Key, item: B::Item) -> Result<(), TaskError> {
        let getter = {
            let mut inner = self.inner.borrow_mut();
            if inner.must_wait() {
                return Err(TaskError::QueueFull);
            }
            inner.push(key, item)
        };
        wake_all(getter);
        Ok(())
    }

    /// Adds an item under `key`, waiting for room if needed.
    pub fn put_with(&self, key: B::Key, item: B::Item) -> Put<'_, B> {
        Put {
            queue: self,
            item: Some((key, item)),
            waiter: None,
        }
    }

    /// Takes the next item without waiting.
    pub fn get_nowait(&self) -> Result<B::Item, TaskError> {
        let (entry, putter) = self
            .inner
            .borrow_mut()
            .take()
            .ok_or(TaskError::QueueEmpty)?;
        wake_all(putter);
        Ok(B::into_item(entry))
    }

    /// Waits for and takes the next item.
    pub fn get(&self) -> Get<'_, B> {
        Get {
            queue: self,
            waiter: None,
        }
    }

    /// Takes every queued item, or fails with [`TaskError::QueueEmpty`].
    pub fn get_all_nowait(&self) -> Result<Vec<B::Item>, TaskError> {
        let (items, putters) = {
            let mut inner = self.inner.borrow_mut();
            let len = inner.buffer.len();
            inner.take_items(len)
        };
        wake_all(putters);
        if items.is_empty() {
            return Err(TaskError::QueueEmpty);
        }
        Ok(items)
    }

    /// Waits until at least one item is queued, then takes all of them.
    pub fn get_all(&self) -> GetMany<'_, B> {
        GetMany::new(self, usize::MAX, true)
    }

    /// Takes `count` items without waiting.
    ///
    /// With `can_return_less`, returns between one and `count` items.
    /// Otherwise fails with [`TaskError::QueueEmpty`] unless `count` items
    /// are queued; nothing is taken on failure. `count` must be at least 2.
    pub fn get_multi_nowait(
        &self,
        count: usize,
        can_return_less: bool,
    ) -> Result<Vec<B::Item>, TaskError> {
        validate_count(count)?;
        let (items, putters) = {
            let mut inner = self.inner.borrow_mut();
            let len = inner.buffer.len();
            if len == 0 || (len < count && !can_return_less) {
                return Err(TaskError::QueueEmpty);
            }
            inner.take_items(count)
        };
        wake_all(putters);
        Ok(items)
    }

    /// Waits for `count` items.
    ///
    /// With `can_return_less`, resolves as soon as at least one item is
    /// available, with up to `count` items. The returned future holds the
    /// items it collected so far; dropping it puts them back in place.
    /// `count` must be at least 2.
    pub fn get_multi(
        &self,
        count: usize,
        can_return_less: bool,
    ) -> Result<GetMany<'_, B>, TaskError> {
        validate_count(count)?;
        Ok(GetMany::new(self, count, can_return_less))
    }

    /// Marks one previously taken item as processed.
    pub fn task_done(&self) -> Result<(), TaskError> {
        let joiners = {
            let mut inner = self.inner.borrow_mut();
            if inner.unfinished == 0 {
                return Err(TaskError::TooManyTaskDone);
            }
            inner.unfinished -= 1;
            if inner.unfinished > 0 {
                return Ok(());
            }
            inner.joiners.drain()
        };
        wake_all(joiners.into_iter().map(|(_, waker)| waker));
        Ok(())
    }

    /// Waits until every item put so far was marked with `task_done`.
    pub fn join(&self) -> Join<'_, B> {
        Join {
            queue: self,
            waiter: None,
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.borrow().is_full()
    }

    pub fn maxsize(&self) -> Option<usize> {
        self.inner.borrow().maxsize
    }

    /// Items put but not yet marked with `task_done`.
    pub fn unfinished(&self) -> usize {
        self.inner.borrow().unfinished
    }
}

fn validate_count(count: usize) -> Result<(), TaskError> {
    if count < 2 {
        return Err(TaskError::InvalidCount(count));
    }
    Ok(())
}

impl<B: Buffer> Drop for Queue<B> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.buffer.is_empty() {
            log::warn!(
                "queue dropped with {} item(s) still queued",
                inner.buffer.len()
            );
        }
    }
}

impl<B: Buffer> fmt::Debug for Queue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Queue")
            .field("len", &inner.buffer.len())
            .field("maxsize", &inner.maxsize)
            .field("unfinished", &inner.unfinished)
            .field("getters", &inner.getters.len())
            .field("putters", &inner.putters.len())
            .finish()
    }
}

/// Future returned by [`Queue::put`] and [`Queue::put_with`].
pub struct Put<'a, B: Buffer> {
    queue: &'a Queue<B>,
    item: Option<(B::Key, B::Item)>,
    waiter: Option<WaiterId>,
}

impl<B: Buffer> Unpin for Put<'_, B> {}

impl<B: Buffer> Future for Put<'_, B> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let getter = {
            let mut inner = this.queue.inner.borrow_mut();
            let woken = match this.waiter {
                Some(id) if inner.putters.update(id, cx.waker()) => return Poll::Pending,
                Some(_) => {
                    this.waiter = None;
                    inner.woken_putters -= 1;
                    true
                }
                None => false,
            };
            // A woken putter only checks for room; a new one queues behind
            // everyone already waiting.
            let blocked = if woken {
                inner.is_full()
            } else {
                inner.must_wait()
            };
            if blocked {
                let id = inner.next_id();
                inner.putters.push(id, cx.waker());
                this.waiter = Some(id);
                return Poll::Pending;
            }
            let Some((key, item)) = this.item.take() else {
                return Poll::Ready(());
            };
            inner.push(key, item)
        };
        wake_all(getter);
        Poll::Ready(())
    }
}

impl<B: Buffer> Drop for Put<'_, B> {
    fn drop(&mut self) {
        let Some(id) = self.waiter.take() else {
            return;
        };
        let next = {
            let mut inner = self.queue.inner.borrow_mut();
            if inner.putters.remove(id) {
                None
            } else {
                // Woken for a free slot it will never use.
                inner.woken_putters -= 1;
                if inner.is_full() {
                    None
                } else {
                    inner.wake_putter()
                }
            }
        };
        wake_all(next);
    }
}

/// Future returned by [`Queue::get`].
pub struct Get<'a, B: Buffer> {
    queue: &'a Queue<B>,
    waiter: Option<WaiterId>,
}

impl<B: Buffer> Future for Get<'_, B> {
    type Output = B::Item;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<B::Item> {
        let this = self.get_mut();
        let (entry, putter) = {
            let mut inner = this.queue.inner.borrow_mut();
            if let Some(id) = this.waiter {
                if inner.getters.update(id, cx.waker()) {
                    return Poll::Pending;
                }
                this.waiter = None;
            }
            match inner.take() {
                Some(taken) => taken,
                None => {
                    let id = inner.next_id();
                    inner.getters.push(id, cx.waker());
                    this.waiter = Some(id);
                    return Poll::Pending;
                }
            }
        };
        wake_all(putter);
        Poll::Ready(B::into_item(entry))
    }
}

impl<B: Buffer> Drop for Get<'_, B> {
    fn drop(&mut self) {
        let Some(id) = self.waiter.take() else {
            return;
        };
        let next = {
            let mut inner = self.queue.inner.borrow_mut();
            if inner.getters.remove(id) || inner.buffer.is_empty() {
                None
            } else {
                // Woken for an item it will never take.
                inner.getters.pop_front().map(|(_, waker)| waker)
            }
        };
        wake_all(next);
    }
}

/// Future returned by [`Queue::get_multi`] and [`Queue::get_all`].
pub struct GetMany<'a, B: Buffer> {
    queue: &'a Queue<B>,
    count: usize,
    can_return_less: bool,
    collected: Vec<B::Entry>,
    waiter: Option<WaiterId>,
}

impl<'a, B: Buffer> GetMany<'a, B> {
    fn new(queue: &'a Queue<B>, count: usize, can_return_less: bool) -> Self {
        Self {
            queue,
            count,
            can_return_less,
            collected: Vec::new(),
            waiter: None,
        }
    }
}

impl<B: Buffer> Unpin for GetMany<'_, B> {}

impl<B: Buffer> Future for GetMany<'_, B> {
    type Output = Vec<B::Item>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Vec<B::Item>> {
        let this = self.get_mut();
        let mut putters = Vec::new();
        let ready = {
            let mut inner = this.queue.inner.borrow_mut();
            if let Some(id) = this.waiter {
                if inner.getters.update(id, cx.waker()) {
                    return Poll::Pending;
                }
                this.waiter = None;
            }
            while this.collected.len() < this.count {
                let Some((entry, putter)) = inner.take() else {
                    break;
                };
                this.collected.push(entry);
                putters.extend(putter);
            }
            let enough = this.collected.len() == this.count
                || (this.can_return_less && !this.collected.is_empty());
            if !enough {
                let id = inner.next_id();
                inner.getters.push(id, cx.waker());
                this.waiter = Some(id);
            }
            enough
        };
        wake_all(putters);
        if !ready {
            return Poll::Pending;
        }
        let items = std::mem::take(&mut this.collected)
            .into_iter()
            .map(B::into_item)
            .collect();
        Poll::Ready(items)
    }
}

impl<B: Buffer> Drop for GetMany<'_, B> {
    fn drop(&mut self) {
        let waiter = self.waiter.take();
        if waiter.is_none() && self.collected.is_empty() {
            return;
        }
        let wakers = {
            let mut inner = self.queue.inner.borrow_mut();
            let queued = waiter.is_some_and(|id| inner.getters.remove(id));
            let returned = self.collected.len();
            for entry in self.collected.drain(..).rev() {
                inner.buffer.unpop(entry);
            }
            // Returned items and a consumed wakeup go to the next getters.
            let owed = returned + usize::from(waiter.is_some() && !queued);
            let owed = owed.min(inner.buffer.len());
            (0..owed)
                .map_while(|_| inner.getters.pop_front().map(|(_, waker)| waker))
                .collect::<Vec<_>>()
        };
        wake_all(wakers);
    }
}

/// Future returned by [`Queue::join`].
pub struct Join<'a, B: Buffer> {
    queue: &'a Queue<B>,
    waiter: Option<WaiterId>,
}

impl<B: Buffer> Future for Join<'_, B> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut inner = this.queue.inner.borrow_mut();
        if inner.unfinished == 0 {
            if let Some(id) = this.waiter.take() {
                inner.joiners.remove(id);
            }
            return Poll::Ready(());
        }
        match this.waiter {
            Some(id) if inner.joiners.update(id, cx.waker()) => {}
            _ => {
                let id = inner.next_id();
                inner.joiners.push(id, cx.waker());
                this.waiter = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<B: Buffer> Drop for Join<'_, B> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.queue.inner.borrow_mut().joiners.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalPool, Priority};
    use std::rc::Rc;

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn fifo_put_get() {
        let queue = FifoQueue::new();
        for i in 0..3 {
            queue.put_nowait(i).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get_nowait(), Ok(0));
        assert_eq!(queue.get_nowait(), Ok(1));
        assert_eq!(queue.get_nowait(), Ok(2));
        assert_eq!(queue.get_nowait(), Err(TaskError::QueueEmpty));
    }

    #[test]
    fn get_waits_for_put() {
        let pool = LocalPool::new();
        let queue: Rc<FifoQueue<&str>> = Rc::new(FifoQueue::new());

        let q = queue.clone();
        let handle = pool.spawn(Priority::High, async move { q.get().await });
        pool.run_until_stalled();
        assert!(!handle.is_finished());

        queue.put_nowait("hello").unwrap();
        pool.run_until_stalled();
        assert_eq!(handle.try_get(), Some(Ok("hello")));
    }

    #[test]
    fn priority_queue_order() {
        let queue = PriorityQueue::new();
        queue.put_nowait_with(3, "c").unwrap();
        queue.put_nowait_with(1, "a").unwrap();
        queue.put_nowait_with(2, "b").unwrap();
        assert_eq!(queue.get_all_nowait().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn bounded_put_waits_for_room() {
        let queue = FifoQueue::bounded(1);
        queue.put_nowait(1).unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.put_nowait(2), Err(TaskError::QueueFull));

        let mut put = queue.put(2);
        assert!(poll_once(&mut put).is_pending());
        assert_eq!(queue.get_nowait(), Ok(1));
        assert!(poll_once(&mut put).is_ready());
        assert_eq!(queue.get_nowait(), Ok(2));
    }

    #[test]
    fn new_putters_queue_behind_woken_ones() {
        let queue = FifoQueue::bounded(1);
        queue.put_nowait(1).unwrap();

        let mut waiting = queue.put(2);
        assert!(poll_once(&mut waiting).is_pending());
        assert_eq!(queue.get_nowait(), Ok(1));

        // The freed slot belongs to the suspended putter.
        assert!(!queue.is_full());
        assert_eq!(queue.put_nowait(3), Err(TaskError::QueueFull));
        let mut late = queue.put(4);
        assert!(poll_once(&mut late).is_pending());

        assert!(poll_once(&mut waiting).is_ready());
        assert_eq!(queue.get_nowait(), Ok(2));
        assert!(poll_once(&mut late).is_ready());
        assert_eq!(queue.get_nowait(), Ok(4));
        assert_eq!(queue.put_nowait(5), Ok(()));
    }

    #[test]
    fn dropped_woken_putter_passes_its_slot_on() {
        let queue = FifoQueue::bounded(1);
        queue.put_nowait(1).unwrap();

        let mut first = queue.put(2);
        let mut second = queue.put(3);
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        assert_eq!(queue.get_nowait(), Ok(1));

        drop(first);
        assert!(poll_once(&mut second).is_ready());
        assert_eq!(queue.get_all_nowait(), Ok(vec![3]));
        assert_eq!(queue.put_nowait(4), Ok(()));
    }

    #[test]
    fn get_all_returns_everything_queued() {
        let queue = FifoQueue::new();
        assert_eq!(queue.get_all_nowait(), Err(TaskError::QueueEmpty));

        let mut all = queue.get_all();
        assert!(poll_once(&mut all).is_pending());
        queue.put_nowait('a').unwrap();
        queue.put_nowait('b').unwrap();
        assert_eq!(poll_once(&mut all), Poll::Ready(vec!['a', 'b']));
    }

    #[test]
    fn get_multi_rejects_small_counts() {
        let queue: FifoQueue<u8> = FifoQueue::new();
        assert_eq!(
            queue.get_multi_nowait(1, false),
            Err(TaskError::InvalidCount(1))
        );
        assert!(matches!(
            queue.get_multi(0, true),
            Err(TaskError::InvalidCount(0))
        ));
    }

    #[test]
    fn get_multi_nowait_takes_nothing_on_failure() {
        let queue = FifoQueue::new();
        queue.put_nowait(1).unwrap();
        queue.put_nowait(2).unwrap();

        assert_eq!(queue.get_multi_nowait(3, false), Err(TaskError::QueueEmpty));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get_multi_nowait(3, true), Ok(vec![1, 2]));
        assert_eq!(queue.get_multi_nowait(2, true), Err(TaskError::QueueEmpty));
    }

    #[test]
    fn get_multi_collects_until_count() {
        let queue = FifoQueue::new();
        let mut multi = queue.get_multi(3, false).unwrap();
        queue.put_nowait(1).unwrap();
        assert!(poll_once(&mut multi).is_pending());
        queue.put_nowait(2).unwrap();
        queue.put_nowait(3).unwrap();
        queue.put_nowait(4).unwrap();
        assert_eq!(poll_once(&mut multi), Poll::Ready(vec![1, 2, 3]));
        assert_eq!(queue.get_nowait(), Ok(4));
    }

    #[test]
    fn dropped_get_multi_puts_items_back_in_place() {
        let queue = FifoQueue::new();
        queue.put_nowait(1).unwrap();
        queue.put_nowait(2).unwrap();
        {
            let mut multi = queue.get_multi(3, false).unwrap();
            assert!(poll_once(&mut multi).is_pending());
            assert!(queue.is_empty());
            queue.put_nowait(3).unwrap();
        }
        assert_eq!(queue.get_all_nowait(), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn woken_getter_dropped_forwards_wakeup() {
        let pool = LocalPool::new();
        let queue: Rc<FifoQueue<u32>> = Rc::new(FifoQueue::new());

        let first = {
            let q = queue.clone();
            pool.spawn(Priority::High, async move { q.get().await })
        };
        let second = {
            let q = queue.clone();
            pool.spawn(Priority::High, async move { q.get().await })
        };
        pool.run_until_stalled();

        queue.put_nowait(7).unwrap();
        first.abort();
        pool.run_until_stalled();

        assert!(first.is_cancelled());
        assert_eq!(second.try_get(), Some(Ok(7)));
    }

    #[test]
    fn join_waits_for_task_done() {
        let queue = FifoQueue::new();
        let mut join = queue.join();
        assert!(poll_once(&mut join).is_ready());

        queue.put_nowait(1).unwrap();
        queue.put_nowait(2).unwrap();
        let mut join = queue.join();
        assert!(poll_once(&mut join).is_pending());

        queue.get_nowait().unwrap();
        queue.task_done().unwrap();
        assert!(poll_once(&mut join).is_pending());
        assert_eq!(queue.unfinished(), 1);

        queue.get_nowait().unwrap();
        queue.task_done().unwrap();
        assert!(poll_once(&mut join).is_ready());
        assert_eq!(queue.task_done(), Err(TaskError::TooManyTaskDone));
    }
}
