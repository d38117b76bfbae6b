mod common;

use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cu_core::workers::{AdmissionQueue, PreparedJob, WorkerError, WorkerPool};

fn prepared(n: u64) -> PreparedJob {
    PreparedJob {
        process_id: PROCESS_ID.to_string(),
        memory: Vec::new(),
        message: msg(n),
        module: Arc::new(test_module()),
        binary: Arc::new(vec![0u8; 4]),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_defers_prep_until_a_slot_is_free() {
    let runtime = StubRuntime::with_delay(Duration::from_millis(120));
    let pool = Arc::new(WorkerPool::start("test", 1, Arc::new(runtime), 4));
    let queue = Arc::new(AdmissionQueue::new(pool, None));

    let preps = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for n in 1..=3u64 {
        let queue = queue.clone();
        let preps = preps.clone();
        handles.push(tokio::spawn(async move {
            queue
                .admit(move || {
                    preps.fetch_add(1, Ordering::SeqCst);
                    prepared(n)
                })
                .await
        }));
    }

    // One worker, three admissions: while the first job runs, the later
    // prep thunks have not executed yet.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(preps.load(Ordering::SeqCst), 1);
    let stats = queue.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.pending_tasks, 2);

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(preps.load(Ordering::SeqCst), 3);
    assert_eq!(queue.stats().active, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_queue_rejects_excess_admissions() {
    let runtime = StubRuntime::with_delay(Duration::from_millis(200));
    let pool = Arc::new(WorkerPool::start("dry-run-test", 1, Arc::new(runtime), 4));
    let queue = Arc::new(AdmissionQueue::new(pool, Some(1)));

    // First admission takes the worker, second waits in the queue.
    let q1 = queue.clone();
    let first = tokio::spawn(async move { q1.admit(|| prepared(1)).await });
    let q2 = queue.clone();
    let second = tokio::spawn(async move { q2.admit(|| prepared(2)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Third caller exceeds the admission ceiling and is rejected at once.
    let rejected = queue.admit(|| prepared(3)).await;
    assert!(matches!(rejected, Err(WorkerError::Overloaded)));

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outcomes_are_deterministic_per_input() {
    let runtime = StubRuntime::new();
    let pool = Arc::new(WorkerPool::start("det-test", 2, Arc::new(runtime), 4));
    let queue = AdmissionQueue::new(pool, None);

    let a = queue.admit(|| prepared(7)).await.unwrap();
    let b = queue.admit(|| prepared(7)).await.unwrap();
    assert_eq!(a.memory, b.memory);
    assert_eq!(a.gas_used, b.gas_used);
}
