//! # RedLilium Tasks
//!
//! Cooperative async task primitives on a single-threaded executor.
//!
//! ## Executor
//!
//! - [`LocalPool`]: Priority-ordered cooperative executor
//! - [`JoinHandle`]: Abortable handle to a spawned task
//! - [`Priority`]: Task priority levels (Critical, High, Low)
//! - [`yield_now`] / [`yield_times`]: Cooperative yielding for async tasks
//!
//! ## Primitives
//!
//! - [`SmartFuture`]: Shared result handle that knows how many tasks await it
//! - [`PrioritySemaphore`]: Counting semaphore serving waiters by priority
//! - [`Queue`]: Async queue over FIFO, priority or demand-ordered buffers
//! - [`ProcessingQueue`]: Worker queue running one async function per item
//! - [`TaskMapping`]: Keyed registry computing each key at most once
//! - [`as_completed`] / [`gather`]: Combinators over result handles
//!
//! Everything here is `!Send` and meant to run inside one [`LocalPool`].

mod as_completed;
mod cancellation;
mod error;
mod executor;
mod future;
pub mod mapping;
mod priority;
pub mod queue;
mod semaphore;
mod wait_list;
mod yield_now;

pub use as_completed::{AsCompleted, as_completed, gather};
pub use cancellation::{CancellationToken, Cancelled};
pub use error::TaskError;
pub use executor::{JoinHandle, LocalPool};
pub use future::{Demand, SmartFuture};
pub use mapping::{Computation, MapStream, TaskMapping};
pub use priority::{Priority, SemaphorePriority};
pub use queue::{
    FifoQueue, Job, PriorityProcessingQueue, PriorityQueue, ProcessingQueue, Queue, QueueConfig,
    SmartProcessingQueue, VariablePriorityQueue, default_workers,
};
pub use semaphore::{Acquire, PrioritySemaphore, SemaphorePermit};
pub use yield_now::{YieldNow, yield_now, yield_times};
