use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A result handle that will never be resolved.
///
/// Awaiting a [`SmartFuture`](crate::SmartFuture) yields `Err(Cancelled)` when
/// the task producing it was aborted, or when the queue holding its job was
/// dropped before a worker got to it. Computation error types that want to
/// flatten this into their own `Result` implement `From<Cancelled>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Abort flag shared between a [`JoinHandle`](crate::JoinHandle) and the
/// pool's copy of the task.
///
/// The [`LocalPool`](crate::LocalPool) checks it before every poll and drops
/// the task's future once it is set. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_clear() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn clones_observe_cancel() {
        let handle_side = CancellationToken::new();
        let pool_side = handle_side.clone();

        handle_side.cancel();
        handle_side.cancel();

        assert!(pool_side.is_cancelled());
    }

    #[test]
    fn cancelled_converts_into_task_error() {
        let err: crate::TaskError = Cancelled.into();
        assert_eq!(err, crate::TaskError::Cancelled);
        assert_eq!(Cancelled.to_string(), "task cancelled");
    }
}
