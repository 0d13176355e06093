//! End-to-end router tests against the in-memory chain.
//!
//! Live-phase tests run on a paused tokio clock, so sleeping past a poll
//! interval fires exactly the ticks that fall inside it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainrouter_core::{
    handler_fn, Batch, BatchSink, BlockRangeSync, End, EventFilter, EventRouter, Handler,
    LiveWatermark, MemoryChain, RouterBuilder, RouterConfig, RouterError, RouterState,
    StartParams, SyncEngine, SyncRange, TransactionRecord,
};
use tokio::sync::Notify;

// ─── Helpers ──────────────────────────────────────────────────────────────────

const POLL: Duration = Duration::from_secs(15);

type Seen = Arc<Mutex<Vec<Vec<u64>>>>;

fn seeded_chain(blocks: u32, txs_per_block: u32) -> Arc<MemoryChain> {
    let chain = Arc::new(MemoryChain::new());
    for _ in 0..blocks {
        chain.push_block(txs_per_block);
    }
    chain
}

fn router_on(chain: &Arc<MemoryChain>, config: RouterConfig) -> EventRouter {
    let sync = BlockRangeSync::new(Arc::clone(chain), 10).unwrap();
    EventRouter::new(config, chain.factory(), Arc::new(sync))
}

/// Records the block numbers of every batch it sees, then passes it on.
fn recorder(seen: Seen) -> Arc<dyn Handler<Batch>> {
    handler_fn(move |batch: Arc<Batch>, next, _end| {
        seen.lock()
            .unwrap()
            .push(batch.iter().map(|r| r.block_number).collect());
        async move { Ok(next.call()) }
    })
}

/// Remembers every range it was asked to sync before delegating.
struct RangeLog {
    inner: BlockRangeSync<Arc<MemoryChain>>,
    ranges: Mutex<Vec<SyncRange>>,
}

#[async_trait]
impl SyncEngine for RangeLog {
    async fn run(&self, range: SyncRange, sink: &mut dyn BatchSink) -> Result<(), RouterError> {
        self.ranges.lock().unwrap().push(range.clone());
        self.inner.run(range, sink).await
    }
}

async fn past_next_tick() {
    tokio::time::sleep(POLL + Duration::from_secs(1)).await;
}

// ─── Catch-up ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn catch_up_delivers_batches_in_order_then_goes_live() {
    let chain = seeded_chain(25, 2);
    let router = router_on(&chain, RouterConfig::default());
    let seen: Seen = Default::default();
    router.register(recorder(seen.clone()));

    router.start(StartParams::from_block(1)).await.unwrap();

    {
        let seen = seen.lock().unwrap();
        let sizes: Vec<_> = seen.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 10]);
        let flat: Vec<u64> = seen.iter().flatten().copied().collect();
        assert!(flat.windows(2).all(|w| w[0] <= w[1]), "chain order");
    }
    assert_eq!(router.state(), RouterState::Live);
    assert_eq!(router.watermark(), 26);

    chain.push_block(3);
    past_next_tick().await;

    assert_eq!(seen.lock().unwrap().last().unwrap(), &vec![26, 26, 26]);
    assert_eq!(router.watermark(), 26);
    router.stop().await;
}

#[tokio::test]
async fn head_query_failure_rejects_without_syncing() {
    let chain = seeded_chain(5, 1);
    chain.set_head_error(Some("connection refused"));
    let router = router_on(&chain, RouterConfig::default());

    let err = router.start(StartParams::from_block(1)).await.unwrap_err();

    assert!(err.is_chain_unavailable(), "{err}");
    assert_eq!(chain.record_calls(), 0);
    assert_eq!(router.state(), RouterState::Failed);
}

#[tokio::test]
async fn zero_head_rejects() {
    let chain = Arc::new(MemoryChain::new());
    let router = router_on(&chain, RouterConfig::default());

    let err = router.start(StartParams::from_block(0)).await.unwrap_err();
    assert!(err.is_chain_unavailable());
}

#[tokio::test(start_paused = true)]
async fn catch_up_handler_error_rejects_and_stops_delivery() {
    let chain = seeded_chain(30, 1);
    let router = router_on(&chain, RouterConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    router.register(handler_fn(move |_b: Arc<Batch>, next, end: End<Batch>| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 1 {
                Ok(end.fail("cannot store batch"))
            } else {
                Ok(next.call())
            }
        }
    }));

    let err = router.start(StartParams::from_block(1)).await.unwrap_err();

    assert_eq!(err, RouterError::handler(0, "cannot store batch"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(chain.record_calls(), 2, "third window must never be fetched");
    assert_eq!(router.state(), RouterState::Failed);

    let head_calls = chain.head_calls();
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(chain.head_calls(), head_calls, "no live phase after failure");
}

#[tokio::test]
async fn transform_scenario_through_router() {
    let chain = Arc::new(MemoryChain::new());
    chain.push_block(2);
    let router = router_on(&chain, RouterConfig::default());
    let lengths = Arc::new(Mutex::new(Vec::new()));

    let l1 = lengths.clone();
    router.register(handler_fn(move |b: Arc<Batch>, next, _end| {
        l1.lock().unwrap().push(b.len());
        async move { Ok(next.call()) }
    }));
    router.register(handler_fn(|b: Arc<Batch>, _next, end: End<Batch>| async move {
        Ok(end.ok(b[..1].to_vec()))
    }));
    let l3 = lengths.clone();
    router.register(handler_fn(move |b: Arc<Batch>, next, _end| {
        l3.lock().unwrap().push(b.len());
        async move { Ok(next.call()) }
    }));

    router.start(StartParams::from_block(1)).await.unwrap();
    router.stop().await;

    assert_eq!(*lengths.lock().unwrap(), vec![2, 1]);
}

#[tokio::test]
async fn register_none_is_a_noop() {
    let chain = seeded_chain(1, 0);
    let router = router_on(&chain, RouterConfig::default());
    router.register(None);
    assert_eq!(router.handler_count(), 0);
    router.register(recorder(Default::default()));
    assert_eq!(router.handler_count(), 1);
}

#[tokio::test]
async fn filter_and_options_reach_the_sync_engine() {
    let chain = Arc::new(MemoryChain::new());
    chain.push_block(2);
    let mut transfer = TransactionRecord::at_block(0, "0xfeed");
    transfer.address = "0xToken".into();
    transfer.event = Some("Transfer".into());
    chain.push_records(vec![transfer]);

    let router = router_on(&chain, RouterConfig::default());
    let seen: Seen = Default::default();
    router.register(recorder(seen.clone()));

    let params = StartParams::from_block(1)
        .filter(EventFilter::address("0xtoken").topic("Transfer"))
        .options(serde_json::json!({ "decode": true }));
    router.start(params).await.unwrap();
    router.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec![vec![2]]);
}

#[tokio::test(start_paused = true)]
async fn end_block_is_forwarded_and_router_still_goes_live() {
    let chain = seeded_chain(20, 1);
    let sync = Arc::new(RangeLog {
        inner: BlockRangeSync::new(Arc::clone(&chain), 10).unwrap(),
        ranges: Mutex::new(Vec::new()),
    });
    let router = EventRouter::new(RouterConfig::default(), chain.factory(), sync.clone());
    let seen: Seen = Default::default();
    router.register(recorder(seen.clone()));

    router.start(StartParams::from_block(1).to_block(10)).await.unwrap();

    assert_eq!(seen.lock().unwrap().concat(), (1..=20).collect::<Vec<_>>());
    assert_eq!(router.state(), RouterState::Live);
    assert_eq!(router.watermark(), 21);
    {
        let ranges = sync.ranges.lock().unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].from_block, ranges[0].to_block), (1, 20));
        assert_eq!(ranges[0].requested_to, Some(10));
    }

    chain.push_block(1);
    past_next_tick().await;

    assert_eq!(seen.lock().unwrap().last().unwrap(), &vec![21]);
    let ranges = sync.ranges.lock().unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!((ranges[1].from_block, ranges[1].to_block), (21, 21));
    drop(ranges);
    router.stop().await;
}

// ─── Live phase ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_record_watermark_redelivers_polled_block() {
    let chain = seeded_chain(5, 1);
    let router = router_on(&chain, RouterConfig::default());
    let seen: Seen = Default::default();
    router.register(recorder(seen.clone()));
    router.start(StartParams::from_block(1)).await.unwrap();

    chain.push_block(2);
    past_next_tick().await;
    chain.push_block(1);
    tokio::time::sleep(POLL).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[seen.len() - 2], vec![6, 6]);
    assert_eq!(seen[seen.len() - 1], vec![6, 6, 7]);
    assert_eq!(router.watermark(), 6);
}

#[tokio::test(start_paused = true)]
async fn past_block_watermark_never_redelivers() {
    let chain = seeded_chain(5, 1);
    let config = RouterBuilder::new()
        .live_watermark(LiveWatermark::PastBlock)
        .build_config();
    let router = router_on(&chain, config);
    let seen: Seen = Default::default();
    router.register(recorder(seen.clone()));
    router.start(StartParams::from_block(1)).await.unwrap();

    chain.push_block(2);
    past_next_tick().await;
    chain.push_block(1);
    tokio::time::sleep(POLL).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[seen.len() - 2], vec![6, 6]);
    assert_eq!(seen[seen.len() - 1], vec![7]);
    assert_eq!(router.watermark(), 8);
}

#[tokio::test(start_paused = true)]
async fn live_failures_do_not_stop_polling() {
    let chain = seeded_chain(5, 1);
    let router = router_on(&chain, RouterConfig::default());
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = attempts.clone();
    router.register(handler_fn(move |b: Arc<Batch>, next, end: End<Batch>| {
        let first = b[0].block_number;
        log.lock().unwrap().push(first);
        async move {
            if first > 5 {
                Ok(end.fail("poison block"))
            } else {
                Ok(next.call())
            }
        }
    }));
    router.start(StartParams::from_block(1)).await.unwrap();

    chain.push_block(1);
    past_next_tick().await;
    chain.push_block(1);
    tokio::time::sleep(POLL).await;

    assert_eq!(router.state(), RouterState::Live);
    let attempts = attempts.lock().unwrap();
    assert_eq!(&attempts[attempts.len() - 2..], &[6, 6]);
}

#[tokio::test(start_paused = true)]
async fn watermark_never_decreases() {
    let chain = seeded_chain(3, 1);
    let router = router_on(&chain, RouterConfig::default());
    router.register(recorder(Default::default()));
    router.start(StartParams::from_block(1)).await.unwrap();

    let mut samples = vec![router.watermark()];
    for txs in [0, 2, 1, 0, 3] {
        chain.push_block(txs);
        tokio::time::sleep(POLL).await;
        samples.push(router.watermark());
    }
    router.stop().await;

    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_before_start_and_twice_is_fine() {
    let chain = seeded_chain(1, 0);
    let router = router_on(&chain, RouterConfig::default());
    router.stop().await;
    router.stop().await;
    assert_eq!(router.state(), RouterState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_live_polling() {
    let chain = seeded_chain(5, 1);
    let router = router_on(&chain, RouterConfig::default());
    router.start(StartParams::from_block(1)).await.unwrap();
    assert_eq!(router.state(), RouterState::Live);

    router.stop().await;
    router.stop().await;
    assert_eq!(router.state(), RouterState::Stopped);

    let head_calls = chain.head_calls();
    chain.push_block(1);
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(chain.head_calls(), head_calls);
}

#[tokio::test(start_paused = true)]
async fn stop_during_catch_up_lets_it_finish_without_going_live() {
    let chain = seeded_chain(5, 1);
    let router = Arc::new(router_on(&chain, RouterConfig::default()));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));

    let (e, r, f) = (entered.clone(), release.clone(), finished.clone());
    router.register(handler_fn(move |_b: Arc<Batch>, next, _end| {
        let (e, r, f) = (e.clone(), r.clone(), f.clone());
        async move {
            e.notify_one();
            r.notified().await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok(next.call())
        }
    }));

    let starting = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.start(StartParams::from_block(1)).await })
    };

    entered.notified().await;
    assert_eq!(router.state(), RouterState::Syncing);
    router.stop().await;
    release.notify_one();

    starting.await.unwrap().unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1, "in-flight batch completed");
    assert_eq!(router.state(), RouterState::Stopped);

    let head_calls = chain.head_calls();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(chain.head_calls(), head_calls);
}

#[tokio::test]
async fn catch_up_failure_after_stop_stays_stopped() {
    let chain = seeded_chain(5, 1);
    let router = Arc::new(router_on(&chain, RouterConfig::default()));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let (e, r) = (entered.clone(), release.clone());
    router.register(handler_fn(move |_b: Arc<Batch>, _next, end: End<Batch>| {
        let (e, r) = (e.clone(), r.clone());
        async move {
            e.notify_one();
            r.notified().await;
            Ok(end.fail("disk full"))
        }
    }));

    let starting = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.start(StartParams::from_block(1)).await })
    };

    entered.notified().await;
    router.stop().await;
    release.notify_one();

    let err = starting.await.unwrap().unwrap_err();
    assert_eq!(err, RouterError::handler(0, "disk full"));
    assert_eq!(router.state(), RouterState::Stopped);
}
