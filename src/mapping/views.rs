use std::fmt;
use std::future::IntoFuture;
use std::hash::Hash;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::stream::{self, LocalBoxStream};
use futures::{FutureExt, Stream, StreamExt};

use super::{Computation, TaskMapping, flatten};
use crate::as_completed::as_completed;
use crate::cancellation::Cancelled;

/// What a [`View`] yields for each entry.
pub trait Select<K, V, E> {
    /// Item of synchronous iteration, taken from the unresolved entry.
    type Entry;
    /// Item of asynchronous iteration, taken from the finished entry.
    type Output;

    fn entry(key: K, handle: Computation<V, E>) -> Self::Entry;

    fn output(key: K, outcome: Result<V, E>) -> Self::Output;
}

/// Selects keys.
#[derive(Debug)]
pub enum Keys {}

/// Selects handles, then outcomes.
#[derive(Debug)]
pub enum Values {}

/// Selects keys paired with handles, then with outcomes.
#[derive(Debug)]
pub enum Items {}

impl<K, V, E> Select<K, V, E> for Keys {
    type Entry = K;
    type Output = K;

    fn entry(key: K, _handle: Computation<V, E>) -> K {
        key
    }

    fn output(key: K, _outcome: Result<V, E>) -> K {
        key
    }
}

impl<K, V, E> Select<K, V, E> for Values {
    type Entry = Computation<V, E>;
    type Output = Result<V, E>;

    fn entry(_key: K, handle: Computation<V, E>) -> Computation<V, E> {
        handle
    }

    fn output(_key: K, outcome: Result<V, E>) -> Result<V, E> {
        outcome
    }
}

impl<K, V, E> Select<K, V, E> for Items {
    type Entry = (K, Computation<V, E>);
    type Output = (K, Result<V, E>);

    fn entry(key: K, handle: Computation<V, E>) -> (K, Computation<V, E>) {
        (key, handle)
    }

    fn output(key: K, outcome: Result<V, E>) -> (K, Result<V, E>) {
        (key, outcome)
    }
}

pub type KeysView<K, V, E> = View<K, V, E, Keys>;
pub type ValuesView<K, V, E> = View<K, V, E, Values>;
pub type ItemsView<K, V, E> = View<K, V, E, Items>;

/// Live view over the entries of a [`TaskMapping`].
///
/// - [`iter`](View::iter) walks the entries spawned so far, without waiting.
/// - Awaiting the view waits for those entries and returns them in
///   insertion order.
/// - [`stream`](View::stream) yields them as they finish.
///
/// A [`popping`](View::popping) view removes every entry it yields from the
/// mapping.
pub struct View<K, V, E, S> {
    mapping: TaskMapping<K, V, E>,
    pop: bool,
    _select: PhantomData<S>,
}

impl<K, V, E, S> View<K, V, E, S>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
    S: Select<K, V, E> + 'static,
{
    pub(super) fn new(mapping: TaskMapping<K, V, E>) -> Self {
        Self {
            mapping,
            pop: false,
            _select: PhantomData,
        }
    }

    /// Removes entries from the mapping as they are yielded.
    pub fn popping(mut self) -> Self {
        self.pop = true;
        self
    }

    /// Number of entries in the mapping.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Iterates over the entries spawned so far, in insertion order.
    ///
    /// A popping view empties the mapping.
    pub fn iter(&self) -> std::vec::IntoIter<S::Entry> {
        let entries = if self.pop {
            self.mapping.drain()
        } else {
            self.mapping.snapshot()
        };
        entries
            .into_iter()
            .map(|(key, handle)| S::entry(key, handle))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Yields entries as they finish.
    pub fn stream(&self) -> ViewStream<S::Output> {
        self.aiter_by_values(false)
    }

    /// Yields entries in completion order. With `reverse`, waits for every
    /// entry and yields the last finished first.
    pub fn aiter_by_values(&self, reverse: bool) -> ViewStream<S::Output> {
        self.mapping.load_deferred();
        let mapping = self.mapping.clone();
        let pop = self.pop;
        let completed = as_completed(self.mapping.snapshot()).map(move |(key, outcome)| {
            if pop {
                mapping.remove_finished(&key);
            }
            S::output(key, flatten(outcome))
        });
        if !reverse {
            return ViewStream::new(completed.boxed_local());
        }
        let reversed = completed
            .collect::<Vec<_>>()
            .map(|mut outputs| {
                outputs.reverse();
                stream::iter(outputs)
            })
            .flatten_stream();
        ViewStream::new(reversed.boxed_local())
    }

    /// Yields entries in insertion order, or the reverse of it, each once
    /// it has finished.
    pub fn aiter_by_keys(&self, reverse: bool) -> ViewStream<S::Output> {
        self.mapping.load_deferred();
        let mut entries = self.mapping.snapshot();
        if reverse {
            entries.reverse();
        }
        let mapping = self.mapping.clone();
        let pop = self.pop;
        let ordered = stream::iter(entries).then(move |(key, handle)| {
            let mapping = mapping.clone();
            async move {
                let outcome = flatten(handle.await);
                if pop {
                    mapping.remove_finished(&key);
                }
                S::output(key, outcome)
            }
        });
        ViewStream::new(ordered.boxed_local())
    }
}

impl<K, V, E, S> IntoFuture for View<K, V, E, S>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
    S: Select<K, V, E> + 'static,
{
    type Output = Vec<S::Output>;
    type IntoFuture = LocalBoxFuture<'static, Vec<S::Output>>;

    fn into_future(self) -> Self::IntoFuture {
        self.aiter_by_keys(false)
            .inner
            .collect::<Vec<_>>()
            .boxed_local()
    }
}

impl<'a, K, V, E, S> IntoIterator for &'a View<K, V, E, S>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + From<Cancelled> + 'static,
    S: Select<K, V, E> + 'static,
{
    type Item = S::Entry;
    type IntoIter = std::vec::IntoIter<S::Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug, V, E, S> fmt::Debug for View<K, V, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("mapping", &self.mapping)
            .field("pop", &self.pop)
            .finish()
    }
}

/// Stream of a [`View`]. Awaiting it collects the rest into a `Vec`.
pub struct ViewStream<T> {
    inner: LocalBoxStream<'static, T>,
}

impl<T> ViewStream<T> {
    fn new(inner: LocalBoxStream<'static, T>) -> Self {
        Self { inner }
    }
}

impl<T> Stream for ViewStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> IntoFuture for ViewStream<T> {
    type Output = Vec<T>;
    type IntoFuture = stream::Collect<LocalBoxStream<'static, T>, Vec<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner.collect()
    }
}

impl<T> fmt::Debug for ViewStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewStream").finish_non_exhaustive()
    }
}
