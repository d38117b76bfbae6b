mod common;

use common::*;

use cu_core::domain::{BlockRef, Ordinate, Process, ScheduledMessage, Tag};
use cu_core::pipeline::EvalTarget;
use cu_core::store::SortDir;

fn ordinate(n: u64) -> EvalTarget {
    EvalTarget::Ordinate(Ordinate::from(n))
}

#[tokio::test]
async fn read_result_resolves_message_position_and_returns_its_row() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2), msg(3)]);
    let core = build_core(
        test_config(dir.path()),
        su,
        StubGateway::new(),
        StubRuntime::new(),
    )
    .await;
    let api = api(core);

    let reply = api.read_result(PROCESS_ID, "msg-2").await.unwrap();
    assert_eq!(reply.ordinate, Ordinate::from(2u64));
    assert_eq!(reply.message_id.as_deref(), Some("msg-2"));
    assert!(reply.output.is_some());
}

#[tokio::test]
async fn read_results_is_a_pure_range_query() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2), msg(3), msg(4)]);
    let runtime = StubRuntime::new();
    let applies = runtime.counter();
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core);

    api.read_state(PROCESS_ID, ordinate(4)).await.unwrap();
    let evaluated = applies.load(std::sync::atomic::Ordering::Relaxed);

    // from is exclusive, to inclusive.
    let rows = api
        .read_results(
            PROCESS_ID,
            Some(Ordinate::from(1u64)),
            Some(Ordinate::from(3u64)),
            None,
            SortDir::Asc,
        )
        .await
        .unwrap();
    assert_eq!(
        rows.iter().map(|r| r.ordinate.clone()).collect::<Vec<_>>(),
        vec![Ordinate::from(2u64), Ordinate::from(3u64)]
    );

    let rows = api
        .read_results(PROCESS_ID, None, None, Some(2), SortDir::Desc)
        .await
        .unwrap();
    assert_eq!(
        rows.iter().map(|r| r.ordinate.clone()).collect::<Vec<_>>(),
        vec![Ordinate::from(4u64), Ordinate::from(3u64)]
    );

    // Pure queries never trigger evaluation.
    assert_eq!(applies.load(std::sync::atomic::Ordering::Relaxed), evaluated);
}

fn cron_process() -> Process {
    let mut process = test_process();
    // Grid anchored at the creation block; one tick every 10 minutes.
    process.block = BlockRef {
        height: 1,
        timestamp: 0,
    };
    process.tags = vec![
        Tag::new("Cron-Interval", "10-minutes"),
        Tag::new("Cron-Tag-Action", "Tick"),
    ];
    process
}

#[tokio::test]
async fn cron_messages_interleave_and_persist_with_cron_set() {
    let dir = tempfile::tempdir().unwrap();
    // One real message past two cron ticks (600000 and 1200000), then the
    // clock runs past the next grid point: one trailing tick at 1800000.
    let mut m1 = msg(1);
    m1.timestamp = 1_250_000;
    m1.block.timestamp = 1_250_000;
    let su = StubScheduler::new(cron_process(), vec![m1]);
    su.set_now(100, 1_900_000);
    let runtime = StubRuntime::new();
    let applies = runtime.counter();
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core);

    let reply = api.read_state(PROCESS_ID, EvalTarget::Latest).await.unwrap();

    // Two leading ticks, the real message, one trailing tick.
    assert_eq!(applies.load(std::sync::atomic::Ordering::Relaxed), 4);
    assert_eq!(reply.ordinate, Ordinate::new("1:cron:1"));

    let cron_rows = api
        .read_cron_results(PROCESS_ID, None, None, None)
        .await
        .unwrap();
    assert_eq!(cron_rows.len(), 3);
    assert!(cron_rows.iter().all(|row| row.cron.is_some()));
    assert_eq!(cron_rows[0].ordinate, Ordinate::new("0:cron:1"));
    assert_eq!(cron_rows[0].timestamp, 600_000);
    assert_eq!(cron_rows[1].ordinate, Ordinate::new("0:cron:2"));
    assert_eq!(cron_rows[1].timestamp, 1_200_000);
    assert_eq!(cron_rows[2].ordinate, Ordinate::new("1:cron:1"));
    assert_eq!(cron_rows[2].timestamp, 1_800_000);

    // Plain results include everything; cron results only the ticks.
    let all_rows = api
        .read_results(PROCESS_ID, None, None, None, SortDir::Asc)
        .await
        .unwrap();
    assert_eq!(all_rows.len(), 4);
}

#[tokio::test]
async fn cron_replay_from_mid_gap_is_deterministic() {
    let mut m1 = msg(1);
    m1.timestamp = 1_250_000;
    m1.block.timestamp = 1_250_000;

    // Unit A evaluates everything in one pass.
    let dir_a = tempfile::tempdir().unwrap();
    let su_a = StubScheduler::new(cron_process(), vec![m1.clone()]);
    su_a.set_now(100, 1_500_000);
    let core_a = build_core(
        test_config(dir_a.path()),
        su_a,
        StubGateway::new(),
        StubRuntime::new(),
    )
    .await;
    let api_a = api(core_a.clone());
    api_a.read_state(PROCESS_ID, EvalTarget::Latest).await.unwrap();

    // Unit B stops on the first cron tick, then resumes to the same end.
    let dir_b = tempfile::tempdir().unwrap();
    let su_b = StubScheduler::new(cron_process(), vec![m1]);
    su_b.set_now(100, 600_000);
    let core_b = build_core(
        test_config(dir_b.path()),
        su_b.clone(),
        StubGateway::new(),
        StubRuntime::new(),
    )
    .await;
    let api_b = api(core_b.clone());
    api_b.read_state(PROCESS_ID, EvalTarget::Latest).await.unwrap();
    su_b.set_now(100, 1_500_000);
    api_b.read_state(PROCESS_ID, EvalTarget::Latest).await.unwrap();

    assert_eq!(
        terminal_memory_hash(&core_a, PROCESS_ID).await.unwrap(),
        terminal_memory_hash(&core_b, PROCESS_ID).await.unwrap()
    );
}

#[tokio::test]
async fn dry_run_evaluates_without_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1), msg(2)]);
    su.set_now(100, 2_500);
    let runtime = StubRuntime::new();
    let applies = runtime.counter();
    let core = build_core(test_config(dir.path()), su, StubGateway::new(), runtime).await;
    let api = api(core.clone());

    let mut overlay = ScheduledMessage {
        ordinate: Ordinate::new("0"),
        message_id: Some("dry-1".to_string()),
        is_assignment: false,
        cron: None,
        tags: Vec::new(),
        data: Some("what-if".to_string()),
        block: BlockRef::default(),
        timestamp: 2_400,
        epoch: 0,
        nonce: 0,
        owner: "user-1".to_string(),
    };
    overlay.tags.push(Tag::new("Action", "Balance"));

    let reply = api.dry_run(PROCESS_ID, None, overlay).await.unwrap();

    // The overlay ran (two scheduled + one dry), produced output, and the
    // anchor state is the latest evaluated message.
    assert_eq!(applies.load(std::sync::atomic::Ordering::Relaxed), 3);
    assert!(reply.output.is_some());
    assert_eq!(reply.ordinate, Ordinate::from(2u64));

    // Nothing was persisted and the cached memory is untouched.
    let rows = api
        .read_results(PROCESS_ID, None, None, None, SortDir::Asc)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let cached = core.cache.get(PROCESS_ID).unwrap();
    assert_eq!(cached.cursor.ordinate, Ordinate::from(2u64));
}

#[tokio::test]
async fn healthcheck_stats_and_metrics_expose_unit_state() {
    let dir = tempfile::tempdir().unwrap();
    let su = StubScheduler::new(test_process(), vec![msg(1)]);
    let core = build_core(
        test_config(dir.path()),
        su,
        StubGateway::new(),
        StubRuntime::new(),
    )
    .await;
    let api = api(core);

    assert_eq!(api.healthcheck().address, WALLET_ADDRESS);

    api.read_state(PROCESS_ID, ordinate(1)).await.unwrap();
    let stats = api.stats();
    assert_eq!(stats.primary.active, 0);
    assert!(stats.primary.idle >= 1);
    assert_eq!(stats.cache.entries, 1);
    assert!(stats.cache.resident_bytes > 0);

    // Exposition text renders whether or not a recorder is installed.
    let text = api.metrics();
    assert!(text.starts_with('#') || text.contains("cu_"));

    assert!(api.pending_read_states().is_empty());
}
