//! Keyed registry of computations.
//!
//! A [`TaskMapping`] binds one async function. Asking it for a key spawns
//! the function for that key on the [`LocalPool`] the first time and hands
//! out the same result handle on every later request. On top of that it
//! offers bulk mapping over a key stream, live [`View`]s and
//! completion-ordered iteration.

mod views;

pub use views::{Items, ItemsView, Keys, KeysView, Select, Values, ValuesView, View, ViewStream};

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::hash::Hash;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::future::{self, LocalBoxFuture};
use futures::stream::{self, LocalBoxStream};
use futures::{FutureExt, Stream, StreamExt};
use indexmap::IndexMap;

use crate::as_completed::{AsCompleted, as_completed};
use crate::cancellation::Cancelled;
use crate::error::TaskError;
use crate::executor::LocalPool;
use crate::future::SmartFuture;
use crate::priority::Priority;
use crate::semaphore::PrioritySemaphore;

type Factory<K, V, E> = Rc<dyn Fn(K) -> LocalBoxFuture<'static, Result<V, E>>>;

/// Result handle of one mapping entry.
pub type Computation<V, E> = SmartFuture<Result<V, E>>;

/// Folds a cancelled computation into the computation's own error type.
pub(crate) fn flatten<V, E: From<Cancelled>>(outcome: Result<Result<V, E>, Cancelled>) -> Result<V, E> {
    outcome.unwrap_or_else(|cancelled| Err(cancelled.into()))
}

struct Inner<K, V, E> {
    pool: LocalPool,
    func: Factory<K, V, E>,
    name: RefCell<Option<String>>,
    priority: Cell<Priority>,
    concurrency: RefCell<Option<Rc<PrioritySemaphore>>>,
    entries: RefCell<IndexMap<K, Computation<V, E>>>,
    /// Keys given up front, spawned by the first `gather` or stream.
    deferred: RefCell<Vec<K>>,
    mapping: Cell<bool>,
}

/// Keyed registry of in-flight and finished computations of one function.
///
/// Every key is computed at most once: [`get`](TaskMapping::get) spawns the
/// computation on first access and caches its handle, later accesses return
/// a clone of the same handle. Entries keep insertion order.
///
/// A failing computation only surfaces where its own key is awaited or
/// gathered; iteration over other keys is unaffected.
///
/// Cloning a `TaskMapping` yields another handle to the same registry.
///
/// # Example
///
/// ```
/// use redlilium_tasks::{LocalPool, TaskError, TaskMapping};
///
/// let pool = LocalPool::new();
/// let squares: TaskMapping<u32, u32, TaskError> =
///     TaskMapping::new(&pool, |x: u32| async move { Ok(x * x) });
///
/// let nine = squares.get(3);
/// assert!(nine.ptr_eq(&squares.get(3)));
///
/// let all = pool.block_on(squares.gather().unwrap()).unwrap().unwrap();
/// assert_eq!(all.get(&3), Some(&9));
/// ```
pub struct TaskMapping<K, V, E> {
    inner: Rc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for TaskMapping<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V, E> TaskMapping<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    /// Creates a mapping computing `func(key)` for each key on `pool`.
    pub fn new<F, Fut>(pool: &LocalPool, func: F) -> Self
    where
        F: Fn(K) -> Fut + 'static,
        Fut: Future<Output = Result<V, E>> + 'static,
    {
        let func: Factory<K, V, E> =
            Rc::new(move |key: K| -> LocalBoxFuture<'static, Result<V, E>> {
                Box::pin(func(key))
            });
        Self {
            inner: Rc::new(Inner {
                pool: pool.clone(),
                func,
                name: RefCell::new(None),
                priority: Cell::new(Priority::High),
                concurrency: RefCell::new(None),
                entries: RefCell::new(IndexMap::new()),
                deferred: RefCell::new(Vec::new()),
                mapping: Cell::new(false),
            }),
        }
    }

    /// Creates a mapping computing `func(key, args)`, with the same fixed
    /// `args` passed to every call.
    pub fn with_args<F, Fut, A>(pool: &LocalPool, func: F, args: A) -> Self
    where
        F: Fn(K, A) -> Fut + 'static,
        Fut: Future<Output = Result<V, E>> + 'static,
        A: Clone + 'static,
    {
        Self::new(pool, move |key| func(key, args.clone()))
    }

    /// Sets the name used for spawned tasks and diagnostics.
    pub fn named(self, name: impl Into<String>) -> Self {
        *self.inner.name.borrow_mut() = Some(name.into());
        self
    }

    /// Sets the pool priority of spawned computations.
    pub fn with_priority(self, priority: Priority) -> Self {
        self.inner.priority.set(priority);
        self
    }

    /// Limits how many computations run at once.
    pub fn with_concurrency(self, limit: usize) -> Self {
        let semaphore: PrioritySemaphore = PrioritySemaphore::new(limit.max(1));
        let semaphore = match self.inner.name.borrow().as_deref() {
            Some(name) => semaphore.named(name),
            None => semaphore,
        };
        *self.inner.concurrency.borrow_mut() = Some(Rc::new(semaphore));
        self
    }

    /// Registers keys to compute without an explicit request.
    ///
    /// A loader task on the pool spawns them the next time the pool runs.
    /// Until then they stay invisible to the sync views;
    /// [`gather`](TaskMapping::gather) and the streams spawn them right away.
    pub fn with_keys(self, keys: impl IntoIterator<Item = K>) -> Self {
        self.inner.deferred.borrow_mut().extend(keys);
        let label = match self.inner.name.borrow().as_deref() {
            Some(name) => format!("{name}:load"),
            None => "load".to_string(),
        };
        let weak: Weak<Inner<K, V, E>> = Rc::downgrade(&self.inner);
        let load = async move {
            if let Some(inner) = weak.upgrade() {
                TaskMapping { inner }.load_deferred();
            }
        };
        self.inner
            .pool
            .spawn_named(self.inner.priority.get(), label, load);
        self
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.borrow().clone()
    }

    /// Returns the handle for `key`, spawning its computation on first use.
    pub fn get(&self, key: K) -> Computation<V, E> {
        if let Some(handle) = self.inner.entries.borrow().get(&key) {
            return handle.clone();
        }
        let handle = self.spawn(&key);
        self.inner.entries.borrow_mut().insert(key, handle.clone());
        handle
    }

    fn spawn(&self, key: &K) -> Computation<V, E> {
        let label = match self.inner.name.borrow().as_deref() {
            Some(name) => format!("{name}[{key:?}]"),
            None => format!("{key:?}"),
        };
        log::debug!("spawning computation {label}");

        let computation = (self.inner.func)(key.clone());
        let semaphore = self.inner.concurrency.borrow().clone();
        let work = async move {
            let _permit = match &semaphore {
                Some(semaphore) => Some(semaphore.acquire().await),
                None => None,
            };
            computation.await
        };
        self.inner
            .pool
            .spawn_named(self.inner.priority.get(), label, work)
            .result()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// Number of spawned entries.
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes an entry and returns its handle. The computation keeps running.
    pub fn pop(&self, key: &K) -> Option<Computation<V, E>> {
        self.inner.entries.borrow_mut().shift_remove(key)
    }

    /// Forgets every entry. Computations keep running.
    pub fn clear(&self) {
        self.inner.entries.borrow_mut().clear();
    }

    /// Computes every key from `keys` and streams `(key, outcome)` pairs as
    /// they complete.
    ///
    /// With `pop`, yielded entries are removed from the mapping. Each
    /// distinct key is yielded once. Only one map may be in progress per
    /// mapping; a second call fails with [`TaskError::MappingInProgress`]
    /// until the first stream is dropped.
    pub fn map<S>(&self, keys: S, pop: bool) -> Result<MapStream<K, V, E>, TaskError>
    where
        S: Stream<Item = K> + 'static,
    {
        if self.inner.mapping.replace(true) {
            return Err(TaskError::MappingInProgress { name: self.name() });
        }
        Ok(MapStream {
            mapping: self.clone(),
            keys: Some(keys.boxed_local()),
            seen: HashSet::new(),
            pending: as_completed(Vec::new()),
            pop,
        })
    }

    /// [`map`](TaskMapping::map) over a plain collection of keys.
    pub fn map_iter<I>(&self, keys: I, pop: bool) -> Result<MapStream<K, V, E>, TaskError>
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        self.map(stream::iter(keys), pop)
    }

    /// Spawns the deferred keys and waits for every entry.
    ///
    /// Resolves to the values in insertion order, or to the first error in
    /// that order. The deferred keys are spawned before this returns, so
    /// the views see them right away. Fails with
    /// [`TaskError::MappingIsEmpty`] when there is nothing to wait for.
    pub fn gather(&self) -> Result<LocalBoxFuture<'static, Result<IndexMap<K, V>, E>>, TaskError> {
        self.load_deferred();
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Err(TaskError::MappingIsEmpty { name: self.name() });
        }
        Ok(async move {
            let mut values = IndexMap::with_capacity(snapshot.len());
            for (key, handle) in snapshot {
                let value = flatten(handle.await)?;
                values.insert(key, value);
            }
            Ok(values)
        }
        .boxed_local())
    }

    /// Returns the entries that already finished, without waiting.
    pub fn completed(&self, pop: bool) -> Vec<(K, Result<V, E>)> {
        let done: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter_map(|(key, handle)| handle.try_get().map(|outcome| (key, flatten(outcome))))
            .collect();
        if pop {
            for (key, _) in &done {
                self.remove_finished(key);
            }
        }
        done
    }

    /// Streams every entry, deferred keys included, as it completes.
    ///
    /// Fails with [`TaskError::MappingIsEmpty`] when there is nothing to
    /// stream.
    pub fn stream(&self) -> Result<ViewStream<(K, Result<V, E>)>, TaskError> {
        self.load_deferred();
        if self.is_empty() {
            return Err(TaskError::MappingIsEmpty { name: self.name() });
        }
        Ok(self.items().stream())
    }

    pub fn keys(&self) -> KeysView<K, V, E> {
        View::new(self.clone())
    }

    pub fn values(&self) -> ValuesView<K, V, E> {
        View::new(self.clone())
    }

    pub fn items(&self) -> ItemsView<K, V, E> {
        View::new(self.clone())
    }

    fn load_deferred(&self) {
        let deferred = std::mem::take(&mut *self.inner.deferred.borrow_mut());
        for key in deferred {
            self.get(key);
        }
    }

    fn snapshot(&self) -> Vec<(K, Computation<V, E>)> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(key, handle)| (key.clone(), handle.clone()))
            .collect()
    }

    fn drain(&self) -> Vec<(K, Computation<V, E>)> {
        std::mem::take(&mut *self.inner.entries.borrow_mut())
            .into_iter()
            .collect()
    }

    /// Removes `key` if its current handle is finished.
    fn remove_finished(&self, key: &K) {
        let mut entries = self.inner.entries.borrow_mut();
        if entries.get(key).is_some_and(SmartFuture::is_done) {
            entries.shift_remove(key);
        }
    }
}

impl<'a, K, V, E> IntoFuture for &'a TaskMapping<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    type Output = Result<Result<IndexMap<K, V>, E>, TaskError>;
    type IntoFuture = LocalBoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self.gather() {
            Ok(all) => all.map(Ok).boxed_local(),
            Err(err) => future::ready(Err(err)).boxed_local(),
        }
    }
}

impl<K: fmt::Debug, V, E> fmt::Debug for TaskMapping<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMapping")
            .field("name", &self.inner.name.borrow())
            .field("entries", &self.inner.entries.borrow())
            .field("deferred", &self.inner.deferred.borrow().len())
            .finish()
    }
}

/// Stream returned by [`TaskMapping::map`].
///
/// Pulls keys from its input as they become available and yields results in
/// completion order. Dropping it ends the map.
pub struct MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    mapping: TaskMapping<K, V, E>,
    keys: Option<LocalBoxStream<'static, K>>,
    seen: HashSet<K>,
    pending: AsCompleted<K, Result<V, E>>,
    pop: bool,
}

impl<K, V, E> MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    /// Yields only the keys, once their computation finished.
    pub fn keys(self) -> impl Stream<Item = K> {
        self.map(|(key, _)| key)
    }

    /// Yields only the outcomes.
    pub fn values(self) -> impl Stream<Item = Result<V, E>> {
        self.map(|(_, outcome)| outcome)
    }
}

impl<K, V, E> Unpin for MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
}

impl<K, V, E> Stream for MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    type Item = (K, Result<V, E>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let mut exhausted = false;
        if let Some(keys) = this.keys.as_mut() {
            loop {
                match keys.poll_next_unpin(cx) {
                    Poll::Ready(Some(key)) => {
                        if this.seen.insert(key.clone()) {
                            let handle = this.mapping.get(key.clone());
                            this.pending.push(key, handle);
                        }
                    }
                    Poll::Ready(None) => {
                        exhausted = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }
        if exhausted {
            this.keys = None;
        }

        match this.pending.poll_next_unpin(cx) {
            Poll::Ready(Some((key, outcome))) => {
                if this.pop {
                    this.mapping.remove_finished(&key);
                }
                Poll::Ready(Some((key, flatten(outcome))))
            }
            Poll::Ready(None) if this.keys.is_none() => Poll::Ready(None),
            _ => Poll::Pending,
        }
    }
}

impl<K, V, E> Drop for MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    fn drop(&mut self) {
        self.mapping.inner.mapping.set(false);
    }
}

impl<K, V, E> fmt::Debug for MapStream<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStream")
            .field("pending", &self.pending.len())
            .field("input_done", &self.keys.is_none())
            .field("pop", &self.pop)
            .finish()
    }
}
