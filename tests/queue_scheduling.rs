/*!
 * Task Queue Scheduling Tests
 *
 * Admission, FIFO, and barrier behavior across a schedule of sleeping
 * operations under a deterministic clock.
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use task_sync::{AsyncObject, Flags, TaskQueue, WaitError};
use tokio::time::Instant;

/// Submit an operation that records its start offset and sleeps.
fn submit(
    queue: &Arc<TaskQueue>,
    flags: Flags,
    origin: Instant,
    starts: &Arc<Mutex<Vec<(&'static str, Duration)>>>,
    name: &'static str,
    sleep: Duration,
) -> tokio::task::JoinHandle<()> {
    let queue = queue.clone();
    let starts = starts.clone();
    tokio::spawn(async move {
        queue
            .exec(flags, None, async move {
                starts.lock().push((name, origin.elapsed()));
                tokio::time::sleep(sleep).await;
            })
            .await;
    })
}

#[tokio::test(start_paused = true)]
async fn test_barrier_waits_for_quiescence_and_holds_the_queue() {
    let queue = Arc::new(TaskQueue::with_defaults());
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let mut tasks = Vec::new();
    for name in ["a", "b", "c"] {
        tasks.push(submit(
            &queue,
            Flags::NONE,
            origin,
            &starts,
            name,
            Duration::from_secs(1),
        ));
        tokio::task::yield_now().await;
    }
    tasks.push(submit(
        &queue,
        Flags::BARRIER,
        origin,
        &starts,
        "barrier",
        Duration::from_secs(2),
    ));
    tokio::task::yield_now().await;
    tasks.push(submit(
        &queue,
        Flags::NONE,
        origin,
        &starts,
        "tail",
        Duration::from_secs(1),
    ));
    tokio::task::yield_now().await;

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(origin.elapsed(), Duration::from_secs(4));

    let starts = starts.lock();
    assert_eq!(starts[0..3].iter().filter(|(_, at)| at.is_zero()).count(), 3);
    assert_eq!(starts[3], ("barrier", Duration::from_secs(1)));
    assert_eq!(starts[4], ("tail", Duration::from_secs(3)));
}

#[tokio::test(start_paused = true)]
async fn test_fifo_resume_order_around_a_barrier() {
    let queue = Arc::new(TaskQueue::with_defaults());
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let first = submit(
        &queue,
        Flags::NONE,
        origin,
        &starts,
        "a",
        Duration::from_secs(1),
    );
    tokio::task::yield_now().await;
    let second = submit(
        &queue,
        Flags::BARRIER,
        origin,
        &starts,
        "b",
        Duration::from_secs(1),
    );
    tokio::task::yield_now().await;
    let third = submit(
        &queue,
        Flags::NONE,
        origin,
        &starts,
        "c",
        Duration::from_secs(1),
    );
    tokio::task::yield_now().await;

    first.await.unwrap();
    second.await.unwrap();
    third.await.unwrap();

    let starts = starts.lock();
    let order: Vec<&str> = starts.iter().map(|(name, _)| *name).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    // The barrier paused the drain until `a` finished, and `c` until
    // the barrier finished.
    assert_eq!(starts[1].1, Duration::from_secs(1));
    assert_eq!(starts[2].1, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_block_admits_immediately_but_holds_followers() {
    let queue = Arc::new(TaskQueue::with_defaults());
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    // A long-running ordinary operation does not delay a `block`
    // admission, unlike a `barrier` one.
    let long = submit(
        &queue,
        Flags::NONE,
        origin,
        &starts,
        "long",
        Duration::from_secs(3),
    );
    tokio::task::yield_now().await;
    let blocker = submit(
        &queue,
        Flags::BLOCK,
        origin,
        &starts,
        "block",
        Duration::from_secs(1),
    );
    tokio::task::yield_now().await;
    let follower = submit(
        &queue,
        Flags::NONE,
        origin,
        &starts,
        "tail",
        Duration::from_secs(1),
    );
    tokio::task::yield_now().await;

    long.await.unwrap();
    blocker.await.unwrap();
    follower.await.unwrap();

    let starts = starts.lock();
    assert_eq!(starts[0], ("long", Duration::ZERO));
    assert_eq!(starts[1], ("block", Duration::ZERO));
    assert_eq!(starts[2], ("tail", Duration::from_secs(1)));
}

#[tokio::test]
async fn test_cancelled_queued_entries_are_reclaimed() {
    let queue = Arc::new(TaskQueue::with_defaults());

    // Hold the queue, then park three submissions and cancel two.
    let queue_clone = queue.clone();
    let blocker = tokio::spawn(async move {
        queue_clone
            .exec(Flags::BLOCK, None, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .await;
    });
    tokio::task::yield_now().await;

    let tokens: Vec<_> = (0..3).map(|_| task_sync::CancellationToken::new()).collect();
    let mut parked = Vec::new();
    for token in &tokens {
        let queue = queue.clone();
        let token = token.clone();
        parked.push(tokio::spawn(async move {
            queue
                .exec_cancellable(Flags::NONE, None, &token, async { 1u32 })
                .await
        }));
        tokio::task::yield_now().await;
    }
    assert_eq!(queue.queued(), 3);

    tokens[0].cancel();
    tokens[2].cancel();
    let outcomes = futures::future::join_all(parked).await;
    assert_eq!(outcomes[0].as_ref().unwrap(), &Err(WaitError::Cancelled));
    assert_eq!(outcomes[2].as_ref().unwrap(), &Err(WaitError::Cancelled));
    assert_eq!(outcomes[1].as_ref().unwrap(), &Ok(1));

    blocker.await.unwrap();
    assert_eq!(queue.queued(), 0);
    assert_eq!(queue.running(), 0);
}

#[tokio::test]
async fn test_queue_wait_drains_ahead_of_caller() {
    let queue = Arc::new(TaskQueue::with_defaults());
    let queue_clone = queue.clone();
    let work = tokio::spawn(async move {
        queue_clone
            .exec(Flags::NONE, None, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7u32
            })
            .await
    });
    tokio::task::yield_now().await;

    queue.wait().await;
    assert_eq!(queue.running(), 0);
    assert_eq!(work.await.unwrap(), 7);
}
