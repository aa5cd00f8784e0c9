use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::rc::Rc;

use futures::future::{Either, LocalBoxFuture, select};

use super::{Buffer, ByDemand, Fifo, Join, Prioritized, Queue};
use crate::cancellation::Cancelled;
use crate::executor::{JoinHandle, LocalPool};
use crate::future::{Demand, SmartFuture};
use crate::priority::Priority;

type JobFn<A, V, E> = Rc<dyn Fn(A) -> LocalBoxFuture<'static, Result<V, E>>>;

/// Returns the default number of workers.
///
/// Uses the available parallelism of the machine, falling back to 1.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Settings of a [`ProcessingQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker loops started on first submission.
    pub workers: usize,
    /// Whether submissions get a result handle. Without one, failures are
    /// only logged.
    pub return_data: bool,
    /// Shown in logs and `Debug` output.
    pub name: Option<String>,
}

impl QueueConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Fire-and-forget mode: submissions return no handle.
    pub fn detached(mut self) -> Self {
        self.return_data = false;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            return_data: true,
            name: None,
        }
    }
}

/// One submitted call: its arguments and the handle its outcome goes to.
pub struct Job<A, V, E> {
    pub args: A,
    pub result: Option<SmartFuture<Result<V, E>>>,
}

impl<A, V, E> Demand for Job<A, V, E> {
    /// Jobs without a handle have no one waiting on them.
    fn demand(&self) -> usize {
        self.result.as_ref().map_or(0, SmartFuture::num_waiters)
    }
}

impl<A: fmt::Debug, V, E> fmt::Debug for Job<A, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("args", &self.args)
            .field("result", &self.result)
            .finish()
    }
}

/// Cancels the handle of a job whose worker is dropped mid-call.
struct InFlight<T>(Option<SmartFuture<T>>);

impl<T> InFlight<T> {
    fn take(&mut self) -> Option<SmartFuture<T>> {
        self.0.take()
    }
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        if let Some(result) = self.0.take() {
            result.cancel();
        }
    }
}

/// Worker pool bound to one async function.
///
/// Each submission enqueues a [`Job`]; a fixed number of worker loops take
/// jobs one at a time, run the function and resolve the job's handle with
/// its `Result`. A failing call never stops its worker.
///
/// Workers are spawned on the [`LocalPool`] at the first submission and live
/// as long as the queue. Dropping the queue cancels everything still queued
/// or running.
///
/// The buffer decides the service order: [`Fifo`] (the default),
/// [`Prioritized`] ([`PriorityProcessingQueue`]) or [`ByDemand`]
/// ([`SmartProcessingQueue`]), which runs the job with the most awaiters
/// first.
///
/// # Example
///
/// ```
/// use redlilium_tasks::{LocalPool, ProcessingQueue, QueueConfig};
///
/// let pool = LocalPool::new();
/// let config = QueueConfig::default().with_workers(2);
/// let queue: ProcessingQueue<u32, u32, String> =
///     ProcessingQueue::new(&pool, config, |x: u32| async move {
///         if x == 0 { Err("zero".to_string()) } else { Ok(100 / x) }
///     });
///
/// let ok = queue.submit(4).unwrap();
/// let failed = queue.submit(0).unwrap();
/// pool.run_until_stalled();
///
/// assert_eq!(ok.try_get(), Some(Ok(Ok(25))));
/// assert_eq!(failed.try_get(), Some(Ok(Err("zero".to_string()))));
/// ```
pub struct ProcessingQueue<A, V, E, B = Fifo<Job<A, V, E>>>
where
    B: Buffer<Item = Job<A, V, E>>,
{
    pool: LocalPool,
    func: JobFn<A, V, E>,
    queue: Rc<Queue<B>>,
    workers: RefCell<Vec<JoinHandle<()>>>,
    config: QueueConfig,
}

/// Processing queue served lowest priority value first.
pub type PriorityProcessingQueue<P, A, V, E> =
    ProcessingQueue<A, V, E, Prioritized<P, Job<A, V, E>>>;

/// Processing queue that runs the most awaited job first.
pub type SmartProcessingQueue<A, V, E> = ProcessingQueue<A, V, E, ByDemand<Job<A, V, E>>>;

impl<A, V, E, B> ProcessingQueue<A, V, E, B>
where
    A: 'static,
    V: 'static,
    E: fmt::Debug + 'static,
    B: Buffer<Item = Job<A, V, E>> + Default + 'static,
{
    /// Creates a queue that runs `func` on `pool`.
    pub fn new<F, Fut>(pool: &LocalPool, config: QueueConfig, func: F) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = Result<V, E>> + 'static,
    {
        let func: JobFn<A, V, E> =
            Rc::new(move |args: A| -> LocalBoxFuture<'static, Result<V, E>> {
                Box::pin(func(args))
            });
        Self {
            pool: pool.clone(),
            func,
            queue: Rc::new(Queue::new()),
            workers: RefCell::new(Vec::new()),
            config,
        }
    }

    /// Submits a call under `key` and returns its handle, or `None` when
    /// the queue is detached.
    pub fn submit_with(&self, key: B::Key, args: A) -> Option<SmartFuture<Result<V, E>>> {
        self.enqueue(key, args, self.config.return_data)
    }

    /// Submits a call under `key` and waits for its outcome.
    ///
    /// Works on detached queues too. A call cancelled by dropping the queue
    /// resolves to `Err(E::from(Cancelled))`.
    pub async fn run_with(&self, key: B::Key, args: A) -> Result<V, E>
    where
        V: Clone,
        E: Clone + From<Cancelled>,
    {
        match self.enqueue(key, args, true) {
            Some(result) => result.await.unwrap_or_else(|cancelled| Err(cancelled.into())),
            None => Err(Cancelled.into()),
        }
    }

    fn enqueue(
        &self,
        key: B::Key,
        args: A,
        with_result: bool,
    ) -> Option<SmartFuture<Result<V, E>>> {
        self.start_workers();
        let result = with_result.then(SmartFuture::new);
        let job = Job {
            args,
            result: result.clone(),
        };
        if let Err(err) = self.queue.put_nowait_with(key, job) {
            log::error!("{}: unbounded job queue refused a job: {err}", self.label());
            panic!("processing queue could not store a job");
        }
        result
    }

    fn start_workers(&self) {
        let mut workers = self.workers.borrow_mut();
        if !workers.is_empty() {
            return;
        }
        let count = self.config.workers.max(1);
        let label: Rc<str> = Rc::from(self.label());
        log::debug!("starting {count} worker(s) for {label}");
        for index in 0..count {
            let handle = self.pool.spawn_named(
                Priority::High,
                format!("{label} worker {index}"),
                worker(
                    Rc::clone(&self.queue),
                    Rc::clone(&self.func),
                    Rc::clone(&label),
                ),
            );
            workers.push(handle);
        }
    }

    /// Waits until every submitted call has finished.
    pub fn join(&self) -> Join<'_, B> {
        self.queue.join()
    }

    /// Number of calls waiting for a worker.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Calls submitted and not yet finished, queued or running.
    pub fn unfinished(&self) -> usize {
        self.queue.unfinished()
    }

    pub fn num_workers(&self) -> usize {
        self.config.workers.max(1)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn label(&self) -> String {
        match &self.config.name {
            Some(name) => format!("ProcessingQueue({name})"),
            None => "ProcessingQueue".to_string(),
        }
    }
}

impl<A, V, E, B> ProcessingQueue<A, V, E, B>
where
    A: 'static,
    V: 'static,
    E: fmt::Debug + 'static,
    B: Buffer<Item = Job<A, V, E>, Key = ()> + Default + 'static,
{
    /// Submits a call and returns its handle, or `None` when the queue is
    /// detached.
    pub fn submit(&self, args: A) -> Option<SmartFuture<Result<V, E>>> {
        self.submit_with((), args)
    }

    /// Submits a call and waits for its outcome.
    pub async fn run(&self, args: A) -> Result<V, E>
    where
        V: Clone,
        E: Clone + From<Cancelled>,
    {
        self.run_with((), args).await
    }
}

async fn worker<A, V, E, B>(queue: Rc<Queue<B>>, func: JobFn<A, V, E>, label: Rc<str>)
where
    E: fmt::Debug,
    B: Buffer<Item = Job<A, V, E>>,
{
    loop {
        let Job { args, result } = queue.get().await;
        if result.as_ref().is_some_and(SmartFuture::is_cancelled) {
            log::debug!("{label}: skipping a job whose handle was cancelled");
            if let Err(err) = queue.task_done() {
                log::error!("{label}: {err}");
            }
            continue;
        }

        let mut in_flight = InFlight(result);
        let call = func(args);
        let outcome = match in_flight.0.as_ref().map(SmartFuture::abandoned) {
            Some(abandoned) => match select(call, abandoned).await {
                Either::Left((outcome, _)) => Some(outcome),
                Either::Right(((), _)) => None,
            },
            None => Some(call.await),
        };

        match (in_flight.take(), outcome) {
            (_, None) => log::debug!("{label}: job stopped, its handle was cancelled"),
            (Some(result), Some(outcome)) => {
                if result.is_cancelled() {
                    log::debug!("{label}: result dropped, handle was cancelled");
                } else if result.set(outcome).is_err() {
                    log::error!("{label}: a job handle was resolved by someone else");
                    panic!("processing queue job handle resolved twice");
                }
            }
            (None, Some(Err(err))) => log::error!("{label}: detached job failed: {err:?}"),
            (None, Some(Ok(_))) => {}
        }

        if let Err(err) = queue.task_done() {
            log::error!("{label}: {err}");
        }
    }
}

impl<A, V, E, B> Drop for ProcessingQueue<A, V, E, B>
where
    B: Buffer<Item = Job<A, V, E>>,
{
    fn drop(&mut self) {
        let unfinished = self.queue.unfinished();
        if unfinished > 0 {
            log::warn!(
                "processing queue {:?} dropped with {unfinished} unfinished job(s)",
                self.config.name
            );
        }
        while let Ok(job) = self.queue.get_nowait() {
            if let Some(result) = job.result {
                result.cancel();
            }
            let _ = self.queue.task_done();
        }
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}

impl<A, V, E, B> fmt::Debug for ProcessingQueue<A, V, E, B>
where
    B: Buffer<Item = Job<A, V, E>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("name", &self.config.name)
            .field("workers", &self.config.workers)
            .field("pending", &self.queue.unfinished())
            .finish()
    }
}
