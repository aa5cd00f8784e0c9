use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::StreamExt;
use redlilium_tasks::{
    Cancelled, FifoQueue, LocalPool, Priority, PriorityProcessingQueue, PrioritySemaphore,
    ProcessingQueue, Queue, QueueConfig, SmartFuture, TaskError, TaskMapping, as_completed,
    gather, yield_now, yield_times,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
enum Failure {
    Negative(i32),
    Cancelled,
}

impl From<Cancelled> for Failure {
    fn from(_: Cancelled) -> Self {
        Failure::Cancelled
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

#[test]
fn bounded_pipeline_delivers_everything_in_order() {
    init_logging();
    let pool = LocalPool::new();
    let queue: Rc<FifoQueue<u32>> = Rc::new(Queue::bounded(2));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let producer = {
        let queue = Rc::clone(&queue);
        pool.spawn(Priority::High, async move {
            for item in 0..6 {
                queue.put(item).await;
            }
        })
    };
    let _consumer = {
        let queue = Rc::clone(&queue);
        let seen = Rc::clone(&seen);
        pool.spawn(Priority::Low, async move {
            loop {
                let item = queue.get().await;
                seen.borrow_mut().push(item);
                yield_now().await;
                queue.task_done().unwrap();
            }
        })
    };

    pool.block_on(async {
        producer.result().await.unwrap();
        queue.join().await;
    })
    .unwrap();

    assert_eq!(*seen.borrow(), (0..6).collect::<Vec<_>>());
    assert!(queue.is_empty());
    assert_eq!(queue.unfinished(), 0);
    assert_eq!(queue.task_done(), Err(TaskError::TooManyTaskDone));
}

#[test]
fn batch_consumer_takes_what_is_there() {
    init_logging();
    let pool = LocalPool::new();
    let queue: FifoQueue<char> = Queue::new();
    for item in ['a', 'b', 'c'] {
        queue.put_nowait(item).unwrap();
    }

    let batch = pool
        .block_on(queue.get_multi(8, true).unwrap())
        .unwrap();
    assert_eq!(batch, vec!['a', 'b', 'c']);
    assert_eq!(queue.get_all_nowait(), Err(TaskError::QueueEmpty));
}

// ---------------------------------------------------------------------------
// Worker pools over cached computations
// ---------------------------------------------------------------------------

#[test]
fn workers_share_a_task_mapping_cache() {
    init_logging();
    let pool = LocalPool::new();
    let calls = Rc::new(Cell::new(0));

    let squares: TaskMapping<i32, i32, Failure> = {
        let calls = Rc::clone(&calls);
        TaskMapping::new(&pool, move |x: i32| {
            let calls = Rc::clone(&calls);
            async move {
                calls.set(calls.get() + 1);
                yield_now().await;
                if x < 0 { Err(Failure::Negative(x)) } else { Ok(x * x) }
            }
        })
    };

    let queue: ProcessingQueue<i32, i32, Failure> = {
        let squares = squares.clone();
        ProcessingQueue::new(
            &pool,
            QueueConfig::default().with_workers(2).named("squares"),
            move |x: i32| {
                let handle = squares.get(x % 3);
                async move { handle.await.unwrap_or_else(|cancelled| Err(cancelled.into())) }
            },
        )
    };

    let handles: Vec<_> = (-2..6).filter_map(|x| queue.submit(x)).collect();
    let outcomes = pool.block_on(gather(handles)).unwrap();
    let expected: Vec<_> = (-2..6)
        .map(|x: i32| {
            let key = x % 3;
            Ok(if key < 0 { Err(Failure::Negative(key)) } else { Ok(key * key) })
        })
        .collect();
    assert_eq!(outcomes, expected);

    // Keys -2, -1, 0, 1 and 2 are each computed once.
    assert_eq!(calls.get(), 5);
    assert_eq!(squares.len(), 5);
    pool.block_on(queue.join()).unwrap();
}

#[test]
fn priority_workers_follow_submission_priority() {
    init_logging();
    let pool = LocalPool::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let queue: PriorityProcessingQueue<u8, &'static str, (), Failure> = {
        let order = Rc::clone(&order);
        ProcessingQueue::new(
            &pool,
            QueueConfig::default().with_workers(1).detached(),
            move |name: &'static str| {
                order.borrow_mut().push(name);
                async { Ok(()) }
            },
        )
    };

    assert!(queue.submit_with(9, "cleanup").is_none());
    assert!(queue.submit_with(0, "urgent").is_none());
    assert!(queue.submit_with(5, "normal").is_none());
    pool.block_on(queue.join()).unwrap();
    assert_eq!(*order.borrow(), vec!["urgent", "normal", "cleanup"]);
}

// ---------------------------------------------------------------------------
// Semaphore with executor priorities
// ---------------------------------------------------------------------------

#[test]
fn semaphore_serves_critical_waiters_first() {
    init_logging();
    let pool = LocalPool::new();
    let semaphore: Rc<PrioritySemaphore<Priority>> =
        Rc::new(PrioritySemaphore::new(1).named("io"));
    let order = Rc::new(RefCell::new(Vec::new()));

    let gate = semaphore.try_acquire().unwrap();
    let handles: Vec<_> = [
        ("low", Priority::Low),
        ("critical", Priority::Critical),
        ("high", Priority::High),
    ]
    .into_iter()
    .map(|(name, priority)| {
        let semaphore = Rc::clone(&semaphore);
        let order = Rc::clone(&order);
        pool.spawn(Priority::High, async move {
            let _permit = semaphore.acquire_with(priority).await;
            order.borrow_mut().push(name);
            yield_now().await;
        })
    })
    .collect();

    pool.run_until_stalled();
    assert_eq!(semaphore.waiters(), 3);
    assert!(semaphore.locked());

    drop(gate);
    pool.run_until_stalled();
    assert_eq!(*order.borrow(), vec!["critical", "high", "low"]);
    assert!(handles.iter().all(|handle| handle.is_finished()));
    assert_eq!(semaphore.available(), 1);
}

// ---------------------------------------------------------------------------
// Task mappings
// ---------------------------------------------------------------------------

#[test]
fn mapping_streams_by_completion_and_reports_failures_per_key() {
    init_logging();
    let pool = LocalPool::new();
    let mapping: TaskMapping<i32, String, Failure> = TaskMapping::new(&pool, |x: i32| async move {
        yield_times(x.unsigned_abs() as usize).await;
        if x < 0 {
            Err(Failure::Negative(x))
        } else {
            Ok(x.to_string())
        }
    })
    .named("labels");

    let results = pool
        .block_on(mapping.map_iter([3, -1, 2, 0], true).unwrap().collect::<Vec<_>>())
        .unwrap();
    assert_eq!(
        results,
        vec![
            (0, Ok("0".to_string())),
            (-1, Err(Failure::Negative(-1))),
            (2, Ok("2".to_string())),
            (3, Ok("3".to_string())),
        ]
    );
    assert!(mapping.is_empty());
}

#[test]
fn gathering_a_mapping_surfaces_the_first_error() {
    init_logging();
    let pool = LocalPool::new();
    let mapping: TaskMapping<i32, i32, Failure> =
        TaskMapping::new(&pool, |x: i32| async move {
            if x < 0 { Err(Failure::Negative(x)) } else { Ok(x) }
        })
        .with_keys([1, -4, 2, -5]);

    let gathered = pool.block_on(mapping.gather().unwrap()).unwrap();
    assert_eq!(gathered, Err(Failure::Negative(-4)));

    // Successful keys are still there and still awaitable on their own.
    let one = pool.block_on(mapping.get(1)).unwrap();
    assert_eq!(one, Ok(Ok(1)));
}

#[test]
fn limited_mapping_never_exceeds_its_concurrency() {
    init_logging();
    let pool = LocalPool::new();
    let running = Rc::new(Cell::new(0usize));
    let peak = Rc::new(Cell::new(0usize));
    let mapping: TaskMapping<u32, u32, Failure> = {
        let running = Rc::clone(&running);
        let peak = Rc::clone(&peak);
        TaskMapping::new(&pool, move |x: u32| {
            let running = Rc::clone(&running);
            let peak = Rc::clone(&peak);
            async move {
                running.set(running.get() + 1);
                peak.set(peak.get().max(running.get()));
                yield_times(2).await;
                running.set(running.get() - 1);
                Ok(x)
            }
        })
        .with_concurrency(2)
    };

    let all = pool
        .block_on(mapping.map_iter(0..7, false).unwrap().values().collect::<Vec<_>>())
        .unwrap();
    assert_eq!(all.len(), 7);
    assert!(all.iter().all(Result::is_ok));
    assert_eq!(peak.get(), 2);
}

// ---------------------------------------------------------------------------
// Combinators and cancellation
// ---------------------------------------------------------------------------

#[test]
fn aborted_tasks_show_up_as_cancelled() {
    init_logging();
    let pool = LocalPool::new();
    let slow = pool.spawn(Priority::Low, async {
        yield_times(10).await;
        1u8
    });
    let fast = pool.spawn(Priority::Low, async { 2u8 });
    slow.abort();

    let stream = as_completed([("slow", slow.result()), ("fast", fast.result())]);
    let mut outcomes = pool.block_on(stream.collect::<Vec<_>>()).unwrap();
    outcomes.sort_by_key(|(name, _)| *name);
    assert_eq!(outcomes, vec![("fast", Ok(2)), ("slow", Err(Cancelled))]);
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn block_on_reports_a_stall() {
    init_logging();
    let pool = LocalPool::new();
    let never: SmartFuture<u8> = SmartFuture::new();
    let _waiter = pool.spawn(Priority::Low, never.clone());
    assert_eq!(
        pool.block_on(never.clone()),
        Err(TaskError::Stalled { pending: 1 })
    );
}
