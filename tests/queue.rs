// tests/queue.rs

//! Background job queue drain semantics.

use portico::JobQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn join_all_returns_only_after_every_task_finished() {
    let queue = JobQueue::new();
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..3u64 {
        let finished = Arc::clone(&finished);
        queue.post(
            move || {
                std::thread::sleep(Duration::from_millis(15 * (i + 1)));
                finished.fetch_add(1, Ordering::SeqCst);
            },
            format!("Uploading package {} to NuGet Feed", i),
        );
    }

    queue.join_all();
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    assert!(queue.is_empty());
}

#[test]
fn queue_accepts_work_again_after_drain() {
    let queue = JobQueue::new();
    let counter = Arc::new(AtomicUsize::new(0));

    for round in 0..2 {
        for _ in 0..=round {
            let counter = Arc::clone(&counter);
            queue.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }, "task");
        }
        queue.join_all();
        assert!(queue.is_empty());
    }

    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn tasks_from_many_threads_all_drain() {
    let queue = JobQueue::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let posters: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                for _ in 0..8 {
                    let counter = Arc::clone(&counter);
                    queue.post(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }, "burst task");
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    queue.join_all();
    assert_eq!(counter.load(Ordering::SeqCst), 32);
    assert!(queue.is_empty());
}
