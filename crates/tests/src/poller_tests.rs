//! End-to-end poller scenarios driven through scripted clients.

use crate::mock_infrastructure::{
    blk, blk_num, err, init_tracing, item, skipped, stale, RecordingHandler, ScriptedClient,
    ScriptedFetcher,
};
use siphon_core::{
    BlockPoller, ClientPool, PollerConfig, PollerError, StickyRollingStrategy,
};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

async fn pool_with(
    clients: &[&Arc<ScriptedClient>],
) -> Arc<ClientPool<Arc<ScriptedClient>>> {
    let pool = Arc::new(ClientPool::new(
        Duration::from_secs(2),
        Box::new(StickyRollingStrategy::new()),
    ));
    for client in clients {
        pool.add(Arc::clone(client)).await;
    }
    pool
}

#[tokio::test]
async fn test_happy_path_single_client_with_skip() {
    init_tracing();
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            // initial first-streamable fetch, then the height-99 poll
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
            item(blk("101a", "100a", 100)),
            item(blk("102a", "101a", 101)),
            skipped(blk("103a", "101a", 101)),
            // never requested: the skip advances straight to the stop block
            item(blk("104a", "102a", 102)),
        ],
    );

    let handler = RecordingHandler::new();
    let config = PollerConfig {
        first_streamable_block: 99,
        stop_block: Some(104),
        block_fetch_batch_size: 1,
        ..Default::default()
    };

    // the pool takes its per-attempt timeout from the same config
    let pool = Arc::new(ClientPool::from_config(
        &config,
        Box::new(StickyRollingStrategy::new()),
    ));
    pool.add(Arc::clone(&c1)).await;

    let mut poller = BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool)
        .with_config(&config);

    poller
        .run(config.first_streamable_block, config.stop_block, config.block_fetch_batch_size)
        .await
        .unwrap();

    assert_eq!(handler.handled_ids(), vec!["99a", "100a", "101a", "102a"]);
    assert_eq!(c1.block_produce_count.load(Ordering::SeqCst), 5);
    assert_eq!(c1.skipped_count.load(Ordering::SeqCst), 1);
    assert_eq!(c1.err_produce_count.load(Ordering::SeqCst), 0);
    assert!(!c1.exhausted(), "the block at stop_block must never be fetched");

    // LIB advanced along the fired chain
    assert_eq!(poller.fork_db().lib_num(), 101);
}

#[tokio::test]
async fn test_failover_across_two_clients() {
    init_tracing();
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            err(blk("100a", "99a", 98), "test error"),
            err(blk("101a", "100a", 100), "test error"),
            item(blk("101a", "100a", 100)),
            item(blk("102a", "101a", 101)),
            skipped(blk("103a", "101a", 101)),
            item(blk("104a", "102a", 102)),
        ],
    );
    let c2 = ScriptedClient::new(
        "c2",
        vec![
            item(blk("100a", "99a", 98)),
            err(blk("101a", "100a", 100), "test error"),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller = BlockPoller::new(
        ScriptedFetcher::default(),
        handler.clone(),
        pool_with(&[&c1, &c2]).await,
    );

    poller.run(99, Some(104), 1).await.unwrap();

    assert_eq!(handler.handled_ids(), vec!["99a", "100a", "101a", "102a"]);

    // sticky rotation: c1 serves the init fetch and height 99, fails twice,
    // and comes back for 101 and 102; c2 serves 100 and fails once on 101
    assert_eq!(c1.block_produce_count.load(Ordering::SeqCst), 4);
    assert_eq!(c1.skipped_count.load(Ordering::SeqCst), 1);
    assert_eq!(c1.err_produce_count.load(Ordering::SeqCst), 2);

    assert_eq!(c2.block_produce_count.load(Ordering::SeqCst), 1);
    assert_eq!(c2.skipped_count.load(Ordering::SeqCst), 0);
    assert_eq!(c2.err_produce_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deep_reorg_with_hash_pivot() {
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk_num("A", "LIB", 1, 0, 0)),
            item(blk_num("A", "LIB", 1, 0, 0)),
            item(blk_num("B", "A", 2, 1, 0)),
            // height 3 exposes a block whose parent C was never polled
            item(blk_num("D", "C", 3, 2, 0)),
            // served for the pivot fetch of (2, "C")
            item(blk_num("C", "A", 2, 1, 0)),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    poller.run(1, Some(4), 1).await.unwrap();

    // C and D fire after the pivot reconnects the segment; A and B are not
    // re-emitted
    assert_eq!(handler.handled_ids(), vec!["A", "B", "C", "D"]);
    assert!(poller.fork_db().link("D").unwrap().fired);
    assert_eq!(c1.block_produce_count.load(Ordering::SeqCst), 5);
    assert!(c1.exhausted());
}

#[tokio::test]
async fn test_simple_reorg_abandons_competing_branch() {
    // the node briefly serves a competing branch (B at the LIB height, its
    // child E): the poller pivots for B, recognises the branch can never
    // reconnect, and resumes on the canonical chain without emitting it
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk_num("A", "LIB", 1, 0, 1)),
            item(blk_num("A", "LIB", 1, 0, 1)),
            // height 2 exposes the competing branch's child
            item(blk_num("E", "B", 2, 1, 1)),
            // served for the pivot fetch of (1, "B"); its ancestry falls
            // below the LIB without touching it
            item(blk_num("B", "LIB", 1, 0, 1)),
            // height 2 again after the branch is abandoned
            item(blk_num("E", "B", 2, 1, 1)),
            // the canonical chain continues
            item(blk_num("F", "C", 3, 2, 1)),
            // served for the pivot fetch of (2, "C")
            item(blk_num("C", "A", 2, 1, 1)),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    poller.run(1, Some(4), 1).await.unwrap();

    // only the canonical chain is emitted
    assert_eq!(handler.handled_ids(), vec!["A", "C", "F"]);

    // the dead branch stays in the fork db, never fired
    assert!(!poller.fork_db().link("B").unwrap().fired);
    assert!(!poller.fork_db().link("E").unwrap().fired);

    assert_eq!(c1.block_produce_count.load(Ordering::SeqCst), 7);
    assert_eq!(c1.err_produce_count.load(Ordering::SeqCst), 0);
    assert!(c1.exhausted());
}

#[tokio::test]
async fn test_stale_block_below_lib_is_fatal() {
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk_num("A", "zz", 5, 4, 5)),
            item(blk_num("A", "zz", 5, 4, 5)),
            // a buggy node answers the height-6 request with a block below
            // the LIB; no reorg may cross the LIB, so the poller dies
            stale(blk_num("old", "older", 4, 3, 0)),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    let result = poller.run(5, Some(10), 1).await;
    assert!(matches!(result, Err(PollerError::BelowLib { num: 4, lib_num: 5 })));
    assert_eq!(handler.handled_ids(), vec!["A"]);
}

#[tokio::test]
async fn test_restart_resumes_from_cursor() {
    let state_dir = tempfile::tempdir().unwrap();

    // first run fires 99a..101a and persists the cursor
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
            item(blk("101a", "100a", 100)),
        ],
    );
    let handler1 = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler1.clone(), pool_with(&[&c1]).await)
            .with_state_storage(state_dir.path());
    poller.run(99, Some(102), 1).await.unwrap();
    assert_eq!(handler1.handled_ids(), vec!["99a", "100a", "101a"]);

    // second run resumes at the last fired block: 99a..101a are not
    // re-emitted, only 102a is handled
    let c2 = ScriptedClient::new(
        "c2",
        vec![
            item(blk("101a", "100a", 100)),
            item(blk("102a", "101a", 101)),
        ],
    );
    let handler2 = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler2.clone(), pool_with(&[&c2]).await)
            .with_state_storage(state_dir.path());
    poller.run(99, Some(103), 1).await.unwrap();

    assert_eq!(handler2.handled_ids(), vec!["102a"]);
    assert!(c2.exhausted());
}

#[tokio::test]
async fn test_ignore_cursor_restarts_from_first_streamable() {
    let state_dir = tempfile::tempdir().unwrap();

    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
        ],
    );
    let handler1 = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler1.clone(), pool_with(&[&c1]).await)
            .with_state_storage(state_dir.path());
    poller.run(99, Some(101), 1).await.unwrap();
    assert_eq!(handler1.handled_ids(), vec!["99a", "100a"]);

    // ignoring the cursor restarts from the first streamable block and
    // re-emits it; saving continues regardless
    let c2 = ScriptedClient::new(
        "c2",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
            item(blk("101a", "100a", 100)),
        ],
    );
    let handler2 = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler2.clone(), pool_with(&[&c2]).await)
            .with_state_storage(state_dir.path())
            .ignoring_cursor();
    poller.run(99, Some(102), 1).await.unwrap();

    assert_eq!(handler2.handled_ids(), vec!["99a", "100a", "101a"]);

    let state = siphon_core::poller::state_file::load(state_dir.path()).await.unwrap();
    assert_eq!(state.last_fired_block.num, 101);
}

#[tokio::test]
async fn test_nothing_available_issues_single_fallback_fetch() {
    let c1 = ScriptedClient::new(
        "c1",
        vec![item(blk("99a", "98a", 97)), item(blk("99a", "98a", 97))],
    );

    let handler = RecordingHandler::new();
    let fetcher = ScriptedFetcher { available: false };
    let mut poller = BlockPoller::new(fetcher, handler.clone(), pool_with(&[&c1]).await);

    // a batch of 5 with nothing available must fall back to exactly one
    // blocking fetch of the requested height
    poller.run(99, Some(100), 5).await.unwrap();

    assert_eq!(handler.handled_ids(), vec!["99a"]);
    assert_eq!(c1.block_produce_count.load(Ordering::SeqCst), 2);
    assert!(c1.exhausted());
}

#[tokio::test]
async fn test_handler_error_is_fatal() {
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
        ],
    );

    let handler = RecordingHandler::failing_on("100a");
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    let result = poller.run(99, Some(104), 1).await;
    assert!(matches!(result, Err(PollerError::Handler { num: 100, .. })));
    assert_eq!(handler.handled_ids(), vec!["99a"]);
}

#[tokio::test]
async fn test_retry_exhaustion_is_fatal() {
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            err(blk("99a", "98a", 97), "node down"),
            err(blk("99a", "98a", 97), "node down"),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await)
            .with_block_fetch_retry_count(2);

    let result = poller.run(99, Some(104), 1).await;
    assert!(matches!(result, Err(PollerError::FetchBlock { num: 99, .. })));
    assert!(handler.handled_ids().is_empty());
    assert_eq!(c1.err_produce_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_skipped_first_streamable_is_fatal() {
    let c1 = ScriptedClient::new("c1", vec![skipped(blk("99a", "98a", 97))]);

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    let result = poller.run(99, Some(104), 1).await;
    assert!(matches!(result, Err(PollerError::UnexpectedSkip { num: 99 })));
}

#[tokio::test]
async fn test_external_shutdown_stops_cleanly() {
    // the script ends after height 100; without the shutdown signal the
    // poller would keep retrying height 101 forever
    let c1 = ScriptedClient::new(
        "c1",
        vec![
            item(blk("99a", "98a", 97)),
            item(blk("99a", "98a", 97)),
            item(blk("100a", "99a", 98)),
        ],
    );

    let handler = RecordingHandler::new();
    let mut poller =
        BlockPoller::new(ScriptedFetcher::default(), handler.clone(), pool_with(&[&c1]).await);

    let shutdown = poller.shutdown_handle();
    let emitted = handler.clone();
    tokio::spawn(async move {
        // signal once the last scripted block went through the handler
        while !emitted.handled_ids().iter().any(|id| id == "100a") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.shutdown(None);
    });

    let result = tokio::time::timeout(Duration::from_secs(10), poller.run(99, None, 1)).await;
    assert!(result.expect("poller must stop on shutdown").is_ok());
    assert_eq!(handler.handled_ids(), vec!["99a", "100a"]);
}
