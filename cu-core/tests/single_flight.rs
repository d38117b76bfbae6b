mod common;

use common::*;

use std::time::Duration;

use cu_core::domain::Ordinate;
use cu_core::pipeline::EvalTarget;

fn ordinate(n: u64) -> EvalTarget {
    EvalTarget::Ordinate(Ordinate::from(n))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_share_one_pipeline_run() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2), msg(3)]);
    let runtime = StubRuntime::with_delay(Duration::from_millis(50));
    let applies = runtime.counter();
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let api = api.clone();
        handles.push(tokio::spawn(async move {
            api.read_state(PROCESS_ID, ordinate(3)).await
        }));
    }

    // While the run is in flight the pending table never exceeds one
    // entry for the process.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(api.pending_read_states().len() <= 1);

    for handle in handles {
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.ordinate, Ordinate::from(3u64));
    }

    // Exactly one pipeline run: three messages evaluated once each.
    assert_eq!(applies.load(std::sync::atomic::Ordering::Relaxed), 3);
    assert!(api.pending_read_states().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caller_with_smaller_target_gets_truncated_view() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2), msg(3)]);
    let runtime = StubRuntime::with_delay(Duration::from_millis(40));
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core);

    let api_big = api.clone();
    let big = tokio::spawn(async move { api_big.read_state(PROCESS_ID, ordinate(3)).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Attaches to the in-flight run and reads its own bound back out of
    // the store.
    let small = api.read_state(PROCESS_ID, ordinate(2)).await.unwrap();
    assert_eq!(small.ordinate, Ordinate::from(2u64));

    let big = big.await.unwrap().unwrap();
    assert_eq!(big.ordinate, Ordinate::from(3u64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_caller_does_not_cancel_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2), msg(3)]);
    let runtime = StubRuntime::with_delay(Duration::from_millis(30));
    let applies = runtime.counter();
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core);

    let api_task = api.clone();
    let task = tokio::spawn(async move { api_task.read_state(PROCESS_ID, ordinate(3)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    let _ = task.await;

    // The abandoned waiter was just a waiter; a later read still finds
    // everything evaluated (by the surviving run or by its own).
    let reply = api.read_state(PROCESS_ID, ordinate(3)).await.unwrap();
    assert_eq!(reply.ordinate, Ordinate::from(3u64));
    assert_eq!(applies.load(std::sync::atomic::Ordering::Relaxed), 3);
}
