//! The two scheduling primitives: submission-ordered serial execution and
//! stop-wins timer cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatelink::util::{CommandQueue, Timer};

mod common;

#[tokio::test]
async fn command_queue_runs_items_in_submission_order() {
    common::init_logging();
    let queue = CommandQueue::new("test");
    let order = Arc::new(Mutex::new(Vec::new()));

    for n in 0..100 {
        let order = order.clone();
        queue.push(async move {
            order.lock().unwrap().push(n);
        });
    }
    queue.shutdown().await;

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn command_queue_drains_queued_items_on_shutdown() {
    common::init_logging();
    let queue = CommandQueue::new("test");
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let counter = counter.clone();
        queue.push(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    queue.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn one_shot_timer_fires_once() {
    common::init_logging();
    let timer = Timer::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    timer.start_once(Duration::from_millis(30), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    common::assert_eventually(
        {
            let fired = fired.clone();
            move || fired.load(Ordering::SeqCst) == 1
        },
        "one-shot fire",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stopped_timer_never_fires() {
    common::init_logging();
    let timer = Timer::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    timer.start_once(Duration::from_millis(50), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    timer.stop().await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn periodic_timer_ticks_until_stopped() {
    common::init_logging();
    let timer = Timer::new();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = ticks.clone();
    timer.start_periodic(Duration::from_millis(20), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    common::assert_eventually(
        {
            let ticks = ticks.clone();
            move || ticks.load(Ordering::SeqCst) >= 3
        },
        "periodic ticks",
    )
    .await;

    timer.stop().await;
    let after_stop = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
}

#[tokio::test]
async fn restarting_a_timer_replaces_the_previous_schedule() {
    common::init_logging();
    let timer = Timer::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    timer.start_once(Duration::from_millis(40), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = second.clone();
    timer.start_once(Duration::from_millis(40), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0, "replaced schedule must not fire");
    assert_eq!(second.load(Ordering::SeqCst), 1);
}
