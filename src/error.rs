use thiserror::Error;

use crate::cancellation::Cancelled;

/// Errors raised by the task primitives themselves.
///
/// Failures of user computations never show up here: they travel as the
/// `Err` half of the computation's own `Result` and are only observed by
/// whoever awaits that computation's handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// `TaskMapping::map` was called while another `map` on the same
    /// mapping was still being consumed.
    #[error("a map is already in progress on task mapping {name:?}")]
    MappingInProgress { name: Option<String> },
    /// `gather` or `stream` found no entries and no deferred keys.
    #[error("task mapping {name:?} has nothing to gather")]
    MappingIsEmpty { name: Option<String> },
    /// `get_multi` must ask for at least two items.
    #[error("`get_multi` needs a count greater than 1, got {0}")]
    InvalidCount(usize),
    /// A non-blocking get found nothing to return.
    #[error("queue is empty")]
    QueueEmpty,
    /// A non-blocking put hit the queue's size limit.
    #[error("queue is full")]
    QueueFull,
    /// `task_done` was called more times than items were put.
    #[error("`task_done` called more times than items were put")]
    TooManyTaskDone,
    /// `LocalPool::block_on` ran out of runnable tasks while its future was
    /// still pending.
    #[error("executor stalled with {pending} pending task(s) and nothing left to run")]
    Stalled { pending: usize },
    /// The computation was aborted or its producer went away.
    #[error("task cancelled")]
    Cancelled,
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            TaskError::InvalidCount(1).to_string(),
            "`get_multi` needs a count greater than 1, got 1"
        );
        let err = TaskError::MappingInProgress {
            name: Some("prices".into()),
        };
        assert!(err.to_string().contains("prices"));
        let empty = TaskError::MappingIsEmpty { name: None };
        assert_eq!(empty.to_string(), "task mapping None has nothing to gather");
    }

    #[test]
    fn from_cancelled() {
        assert_eq!(TaskError::from(Cancelled), TaskError::Cancelled);
    }
}
