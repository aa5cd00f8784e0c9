use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yields control back to the executor, allowing other tasks to run.
///
/// This is the explicit suspension point of cooperative code: the current
/// task is re-queued behind every task that is already runnable at the same
/// priority. Computations use it to stagger their progress, workers use it to
/// stay fair inside long loops.
///
/// # Example
///
/// ```ignore
/// pool.spawn(Priority::Low, async move {
///     for chunk in data.chunks(256) {
///         process(chunk);
///         yield_now().await;
///     }
/// });
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Yields `count` times in a row.
///
/// Handy to give computations a deterministic "latency" measured in
/// scheduler rounds instead of wall-clock time.
pub async fn yield_times(count: usize) {
    for _ in 0..count {
        yield_now().await;
    }
}

/// Future returned by [`yield_now`].
///
/// The first poll wakes the task and returns `Pending`; the second poll
/// returns `Ready`.
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn yields_once_then_ready() {
        let mut cx = Context::from_waker(Waker::noop());

        let mut fut = yield_now();
        let mut pinned = Pin::new(&mut fut);

        assert_eq!(pinned.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(pinned.as_mut().poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn every_yield_suspends() {
        let mut cx = Context::from_waker(Waker::noop());

        let mut fut1 = yield_now();
        assert_eq!(Pin::new(&mut fut1).poll(&mut cx), Poll::Pending);

        let mut fut2 = yield_now();
        assert_eq!(Pin::new(&mut fut2).poll(&mut cx), Poll::Pending);
    }
}
