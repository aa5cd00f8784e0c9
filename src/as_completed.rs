use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::{JoinAll, join_all};

use crate::cancellation::Cancelled;
use crate::future::SmartFuture;

/// Streams keyed handles in the order they resolve.
///
/// When several handles are already done, the one that resolved first is
/// yielded first, so the sequence reflects actual completion order rather
/// than the order the stream happened to look at them.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use redlilium_tasks::{LocalPool, SmartFuture, as_completed};
///
/// let pool = LocalPool::new();
/// let slow = SmartFuture::new();
/// let fast = SmartFuture::new();
/// fast.set(2).unwrap();
/// slow.set(1).unwrap();
///
/// let stream = as_completed([("slow", slow), ("fast", fast)]);
/// let order: Vec<_> = pool.block_on(stream.collect::<Vec<_>>()).unwrap();
/// assert_eq!(order, vec![("fast", Ok(2)), ("slow", Ok(1))]);
/// ```
pub fn as_completed<K, T, I>(handles: I) -> AsCompleted<K, T>
where
    I: IntoIterator<Item = (K, SmartFuture<T>)>,
{
    AsCompleted {
        pending: handles.into_iter().collect(),
    }
}

/// Waits for every handle and returns their outcomes in input order.
pub fn gather<T, I>(handles: I) -> JoinAll<SmartFuture<T>>
where
    T: Clone,
    I: IntoIterator<Item = SmartFuture<T>>,
{
    join_all(handles)
}

/// Stream returned by [`as_completed`].
pub struct AsCompleted<K, T> {
    pending: Vec<(K, SmartFuture<T>)>,
}

impl<K, T> AsCompleted<K, T> {
    /// Adds another handle to wait for.
    pub fn push(&mut self, key: K, handle: SmartFuture<T>) {
        self.pending.push((key, handle));
    }

    /// Number of handles not yielded yet.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K, T> Unpin for AsCompleted<K, T> {}

impl<K, T: Clone> Stream for AsCompleted<K, T> {
    type Item = (K, Result<T, Cancelled>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.pending.is_empty() {
            return Poll::Ready(None);
        }

        let mut first: Option<(usize, u64)> = None;
        for (index, (_, handle)) in this.pending.iter_mut().enumerate() {
            // Registers a wakeup on the handles that are still pending.
            if Pin::new(&mut *handle).poll(cx).is_pending() {
                continue;
            }
            let order = handle.completion_order().unwrap_or(u64::MAX);
            if first.is_none_or(|(_, best)| order < best) {
                first = Some((index, order));
            }
        }

        let Some((index, _)) = first else {
            return Poll::Pending;
        };
        let (key, handle) = this.pending.remove(index);
        match handle.try_get() {
            Some(outcome) => Poll::Ready(Some((key, outcome))),
            None => Poll::Ready(Some((key, Err(Cancelled)))),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.pending.len(), Some(self.pending.len()))
    }
}

impl<K: fmt::Debug, T> fmt::Debug for AsCompleted<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsCompleted")
            .field("pending", &self.pending)
            .finish()
    }
}
