mod common;

use common::*;

use chrono::Utc;
use cu_core::domain::{BlockRef, EvalOutput, Evaluation, Ordinate};
use cu_core::store::{
    CheckpointLocation, CheckpointRecord, EvaluationQuery, SortDir, UnitStore,
};

fn evaluation(n: u64) -> Evaluation {
    Evaluation {
        process_id: PROCESS_ID.to_string(),
        ordinate: Ordinate::from(n),
        cron: None,
        timestamp: n as i64 * 1000,
        block_height: n,
        epoch: 0,
        nonce: n,
        message_id: Some(format!("msg-{n}")),
        deep_hash: None,
        output: EvalOutput {
            data: Some(serde_json::json!({ "n": n })),
            ..Default::default()
        },
        gas_used: 10,
        evaluated_at: Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
async fn processes_and_modules_round_trip() {
    let store = UnitStore::open_in_memory().await.unwrap();

    assert!(store.find_process(PROCESS_ID).await.unwrap_err().is_not_found());
    store.save_process(&test_process()).await.unwrap();
    // Idempotent reinsert of the identical row.
    store.save_process(&test_process()).await.unwrap();
    assert_eq!(store.find_process(PROCESS_ID).await.unwrap(), test_process());

    store.save_module(&test_module()).await.unwrap();
    assert_eq!(store.find_module(MODULE_ID).await.unwrap(), test_module());
}

#[tokio::test]
async fn evaluations_query_by_range_from_exclusive_to_inclusive() {
    let store = UnitStore::open_in_memory().await.unwrap();
    for n in 1..=5 {
        store.save_evaluation(&evaluation(n)).await.unwrap();
    }

    let rows = store
        .find_evaluations(&EvaluationQuery {
            process_id: PROCESS_ID.to_string(),
            from: Some(Ordinate::from(2u64)),
            to: Some(Ordinate::from(4u64)),
            only_cron: false,
            limit: None,
            sort: SortDir::Asc,
        })
        .await
        .unwrap();
    assert_eq!(
        rows.iter().map(|r| r.ordinate.clone()).collect::<Vec<_>>(),
        vec![Ordinate::from(3u64), Ordinate::from(4u64)]
    );

    let rows = store
        .find_evaluations(&EvaluationQuery {
            process_id: PROCESS_ID.to_string(),
            from: None,
            to: None,
            only_cron: false,
            limit: Some(2),
            sort: SortDir::Desc,
        })
        .await
        .unwrap();
    assert_eq!(
        rows.iter().map(|r| r.ordinate.clone()).collect::<Vec<_>>(),
        vec![Ordinate::from(5u64), Ordinate::from(4u64)]
    );
}

#[tokio::test]
async fn ordinates_order_numerically_not_lexically() {
    let store = UnitStore::open_in_memory().await.unwrap();
    for n in [2u64, 10, 9] {
        store.save_evaluation(&evaluation(n)).await.unwrap();
    }

    let latest = store
        .find_latest_evaluation(PROCESS_ID, None)
        .await
        .unwrap();
    assert_eq!(latest.ordinate, Ordinate::from(10u64));

    let latest = store
        .find_latest_evaluation(PROCESS_ID, Some(&Ordinate::from(9u64)))
        .await
        .unwrap();
    assert_eq!(latest.ordinate, Ordinate::from(9u64));
}

#[tokio::test]
async fn save_evaluation_is_idempotent_on_its_key() {
    let store = UnitStore::open_in_memory().await.unwrap();
    store.save_evaluation(&evaluation(1)).await.unwrap();
    store.save_evaluation(&evaluation(1)).await.unwrap();

    let rows = store
        .find_evaluations(&EvaluationQuery {
            process_id: PROCESS_ID.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn find_message_before_uses_deep_hash_when_present() {
    let store = UnitStore::open_in_memory().await.unwrap();
    let mut pushed = evaluation(2);
    pushed.deep_hash = Some("hash-a".to_string());
    store.save_evaluation(&pushed).await.unwrap();
    store.save_evaluation(&evaluation(3)).await.unwrap();

    // Deep-hash identity takes precedence over message id.
    let prior = store
        .find_message_before(PROCESS_ID, None, Some("hash-a"), &Ordinate::from(7u64))
        .await
        .unwrap();
    assert_eq!(prior.ordinate, Ordinate::from(2u64));

    let prior = store
        .find_message_before(PROCESS_ID, Some("msg-3"), None, &Ordinate::from(7u64))
        .await
        .unwrap();
    assert_eq!(prior.ordinate, Ordinate::from(3u64));

    // Only rows strictly before the probe count.
    assert!(store
        .find_message_before(PROCESS_ID, None, Some("hash-a"), &Ordinate::from(2u64))
        .await
        .unwrap_err()
        .is_not_found());

    assert!(store
        .find_message_before(PROCESS_ID, Some("msg-9"), None, &Ordinate::from(7u64))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn blocks_cache_is_monotone_and_range_queried() {
    let store = UnitStore::open_in_memory().await.unwrap();
    let blocks: Vec<BlockRef> = (10..15)
        .map(|height| BlockRef {
            height,
            timestamp: height as i64 * 100,
        })
        .collect();
    store.save_blocks(&blocks).await.unwrap();
    // Reinsert tolerated.
    store.save_blocks(&blocks[..2]).await.unwrap();

    let found = store.find_blocks(11, 14).await.unwrap();
    assert_eq!(
        found.iter().map(|b| b.height).collect::<Vec<_>>(),
        vec![11, 12, 13]
    );
}

#[tokio::test]
async fn checkpoint_records_prefer_local_files_at_equal_ordinate() {
    let store = UnitStore::open_in_memory().await.unwrap();
    store
        .write_checkpoint_record(&CheckpointRecord {
            process_id: PROCESS_ID.to_string(),
            ordinate: Ordinate::from(5u64),
            timestamp: 5000,
            location: CheckpointLocation::Remote("tx-5".to_string()),
        })
        .await
        .unwrap();
    store
        .write_checkpoint_record(&CheckpointRecord {
            process_id: PROCESS_ID.to_string(),
            ordinate: Ordinate::from(5u64),
            timestamp: 5000,
            location: CheckpointLocation::File("state-5.mem".to_string()),
        })
        .await
        .unwrap();
    store
        .write_checkpoint_record(&CheckpointRecord {
            process_id: PROCESS_ID.to_string(),
            ordinate: Ordinate::from(3u64),
            timestamp: 3000,
            location: CheckpointLocation::File("state-3.mem".to_string()),
        })
        .await
        .unwrap();

    let record = store
        .find_checkpoint_record_before(PROCESS_ID, &Ordinate::from(9u64))
        .await
        .unwrap();
    assert_eq!(record.ordinate, Ordinate::from(5u64));
    assert_eq!(
        record.location,
        CheckpointLocation::File("state-5.mem".to_string())
    );

    let record = store
        .find_checkpoint_record_before(PROCESS_ID, &Ordinate::from(4u64))
        .await
        .unwrap();
    assert_eq!(record.ordinate, Ordinate::from(3u64));

    assert!(store
        .find_checkpoint_record_before(PROCESS_ID, &Ordinate::from(2u64))
        .await
        .unwrap_err()
        .is_not_found());
}
