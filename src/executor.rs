use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use futures::future::{Either, LocalBoxFuture, select};
use parking_lot::Mutex;

use crate::cancellation::{CancellationToken, Cancelled};
use crate::error::TaskError;
use crate::future::SmartFuture;
use crate::priority::Priority;

type TaskId = u64;

/// Ids of tasks woken since the last tick.
///
/// Wakers must be `Send + Sync`, so this is the one piece of pool state
/// behind a lock.
type Wakeups = Arc<Mutex<Vec<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    wakeups: Wakeups,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakeups.lock().push(self.id);
    }
}

struct FlagWaker(AtomicBool);

impl Wake for FlagWaker {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }
}

/// A spawned task stored in the pool.
struct Task {
    priority: Priority,
    name: Option<String>,
    future: LocalBoxFuture<'static, ()>,
    waker: Waker,
    token: CancellationToken,
    /// Whether the task already sits in the ready heap.
    queued: bool,
}

/// Ready-heap entry: highest priority first, then oldest wakeup.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ReadyEntry {
    priority: Priority,
    seq: Reverse<u64>,
    id: TaskId,
}

struct PoolState {
    tasks: RefCell<HashMap<TaskId, Task>>,
    ready: RefCell<BinaryHeap<ReadyEntry>>,
    wakeups: Wakeups,
    next_id: Cell<TaskId>,
    next_seq: Cell<u64>,
}

/// Cancels the task's result handle if the task is dropped unfinished.
struct CancelOnDrop<T>(Option<SmartFuture<T>>);

impl<T> CancelOnDrop<T> {
    fn resolve(mut self, value: T) {
        if let Some(result) = self.0.take() {
            // Only the task itself ever resolves its handle.
            let _ = result.set(value);
        }
    }
}

impl<T> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        if let Some(result) = self.0.take() {
            result.cancel();
        }
    }
}

/// Handle to a task spawned on a [`LocalPool`].
///
/// Dereferences to the task's [`SmartFuture`], so it can be polled for the
/// result, awaited, or cloned into more awaiters.
///
/// # Example
///
/// ```
/// use redlilium_tasks::{LocalPool, Priority};
///
/// let pool = LocalPool::new();
/// let handle = pool.spawn(Priority::Low, async { 42u32 });
///
/// pool.run_until_stalled();
///
/// assert_eq!(handle.try_get(), Some(Ok(42)));
/// ```
pub struct JoinHandle<T> {
    result: SmartFuture<T>,
    token: CancellationToken,
    waker: Waker,
}

impl<T> JoinHandle<T> {
    /// Requests cancellation. The pool drops the task's future the next time
    /// it would poll it, and the result handle resolves to `Err(Cancelled)`.
    pub fn abort(&self) {
        self.token.cancel();
        self.waker.wake_by_ref();
    }

    /// Returns whether the task has completed or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.result.is_done()
    }

    /// Returns a new awaiter on the task's result.
    pub fn result(&self) -> SmartFuture<T> {
        self.result.clone()
    }
}

impl<T> Deref for JoinHandle<T> {
    type Target = SmartFuture<T>;

    fn deref(&self) -> &SmartFuture<T> {
        &self.result
    }
}

impl<T: Clone> Future for JoinHandle<T> {
    type Output = Result<T, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("result", &self.result)
            .field("aborted", &self.token.is_cancelled())
            .finish()
    }
}

/// Single-threaded cooperative executor.
///
/// Tasks are stored and polled by [`tick`](LocalPool::tick) /
/// [`run_until_stalled`](LocalPool::run_until_stalled) or driven by
/// [`block_on`](LocalPool::block_on). Only woken tasks are polled, highest
/// [`Priority`] first and in wakeup order within a priority. Tasks never run
/// interleaved: shared state touched between two await points needs no lock.
///
/// Cloning a `LocalPool` yields another handle to the same pool, which is
/// how primitives that spawn work (worker pools, task mappings) hold it.
///
/// # Example
///
/// ```
/// use redlilium_tasks::{LocalPool, Priority, yield_now};
///
/// let pool = LocalPool::new();
/// let handle = pool.spawn(Priority::Low, async {
///     yield_now().await;
///     7u32
/// });
///
/// assert_eq!(pool.block_on(handle).unwrap(), Ok(7));
/// ```
#[derive(Clone)]
pub struct LocalPool {
    state: Rc<PoolState>,
}

impl LocalPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            state: Rc::new(PoolState {
                tasks: RefCell::new(HashMap::new()),
                ready: RefCell::new(BinaryHeap::new()),
                wakeups: Arc::new(Mutex::new(Vec::new())),
                next_id: Cell::new(0),
                next_seq: Cell::new(0),
            }),
        }
    }

    /// Spawns a task with the given priority.
    ///
    /// Returns a handle for retrieving the result.
    pub fn spawn<T, F>(&self, priority: Priority, future: F) -> JoinHandle<T>
    where
        T: 'static,
        F: Future<Output = T> + 'static,
    {
        self.spawn_inner(priority, None, future)
    }

    /// Spawns a task carrying a name used in diagnostics.
    pub fn spawn_named<T, F>(
        &self,
        priority: Priority,
        name: impl Into<String>,
        future: F,
    ) -> JoinHandle<T>
    where
        T: 'static,
        F: Future<Output = T> + 'static,
    {
        self.spawn_inner(priority, Some(name.into()), future)
    }

    fn spawn_inner<T, F>(&self, priority: Priority, name: Option<String>, future: F) -> JoinHandle<T>
    where
        T: 'static,
        F: Future<Output = T> + 'static,
    {
        let result = SmartFuture::new();
        let guard = CancelOnDrop(Some(result.clone()));
        let abandoned = result.abandoned();
        let wrapped = async move {
            let guard = guard;
            let future = pin!(future);
            // Cancelling the result handle stops the task like `abort` does.
            match select(future, abandoned).await {
                Either::Left((value, _)) => guard.resolve(value),
                Either::Right(((), _)) => log::trace!("result handle cancelled, task stopped"),
            }
        };

        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);

        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            wakeups: Arc::clone(&self.state.wakeups),
        }));
        let token = CancellationToken::new();

        let task = Task {
            priority,
            name,
            future: Box::pin(wrapped),
            waker: waker.clone(),
            token: token.clone(),
            queued: false,
        };
        self.state.tasks.borrow_mut().insert(id, task);
        self.enqueue(id);

        JoinHandle {
            result,
            token,
            waker,
        }
    }

    /// Polls the highest-priority ready task once.
    ///
    /// Returns the number of tasks that were polled (0 or 1).
    /// Completed and aborted tasks are removed from the pool.
    pub fn tick(&self) -> usize {
        self.collect_wakeups();
        usize::from(self.poll_next_ready())
    }

    /// Polls every task that is ready right now once each.
    ///
    /// Tasks woken while this runs are left for the next call.
    /// Returns the number of tasks that were polled.
    pub fn tick_all(&self) -> usize {
        self.collect_wakeups();
        let batch = self.state.ready.borrow().len();
        let mut polled = 0;
        for _ in 0..batch {
            if self.poll_next_ready() {
                polled += 1;
            }
        }
        polled
    }

    /// Ticks until no task is ready. Returns the total number of polls.
    pub fn run_until_stalled(&self) -> usize {
        let mut polled = 0;
        loop {
            match self.tick() {
                0 => return polled,
                n => polled += n,
            }
        }
    }

    /// Drives `future` to completion on the current thread, running pool
    /// tasks whenever it is pending.
    ///
    /// Fails with [`TaskError::Stalled`] if `future` is still pending and
    /// no task in the pool can make progress.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, TaskError> {
        let mut future = pin!(future);
        let flag = Arc::new(FlagWaker(AtomicBool::new(true)));
        let waker = Waker::from(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);

        loop {
            if flag.0.swap(false, Ordering::AcqRel)
                && let Poll::Ready(output) = future.as_mut().poll(&mut cx)
            {
                return Ok(output);
            }
            if self.tick() == 0 && !flag.0.load(Ordering::Acquire) {
                let pending = self.pending_count();
                log::warn!("block_on stalled with {pending} pending task(s)");
                return Err(TaskError::Stalled { pending });
            }
        }
    }

    /// Returns the number of incomplete tasks, ready or suspended.
    pub fn pending_count(&self) -> usize {
        self.state.tasks.borrow().len()
    }

    fn enqueue(&self, id: TaskId) {
        let mut tasks = self.state.tasks.borrow_mut();
        let Some(task) = tasks.get_mut(&id) else {
            return;
        };
        if task.queued {
            return;
        }
        task.queued = true;
        let seq = self.state.next_seq.get();
        self.state.next_seq.set(seq + 1);
        self.state.ready.borrow_mut().push(ReadyEntry {
            priority: task.priority,
            seq: Reverse(seq),
            id,
        });
    }

    fn collect_wakeups(&self) {
        let woken = std::mem::take(&mut *self.state.wakeups.lock());
        for id in woken {
            self.enqueue(id);
        }
    }

    /// Pops one ready task and polls it. Returns `false` if none was ready.
    fn poll_next_ready(&self) -> bool {
        let Some((id, mut task)) = self.take_ready() else {
            return false;
        };

        if task.token.is_cancelled() {
            log::trace!("dropping aborted task {id} {:?}", task.name);
            return true;
        }

        let mut cx = Context::from_waker(&task.waker);
        match task.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                log::trace!("task {id} {:?} finished", task.name);
            }
            Poll::Pending => {
                self.state.tasks.borrow_mut().insert(id, task);
            }
        }
        true
    }

    fn take_ready(&self) -> Option<(TaskId, Task)> {
        loop {
            let entry = self.state.ready.borrow_mut().pop()?;
            // Tasks are taken out while polled so they can spawn freely.
            if let Some(mut task) = self.state.tasks.borrow_mut().remove(&entry.id) {
                task.queued = false;
                return Some((entry.id, task));
            }
        }
    }
}

impl Default for LocalPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPool")
            .field("pending", &self.pending_count())
            .field("ready", &self.state.ready.borrow().len())
            .finish()
    }
}
