//! Trigger coalescing and registry refresh through the scheduler

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tranche_keeper::config::ScheduleConfig;
use tranche_keeper::{EpochCloser, KeeperError, PoolRegistry, RetryConfig, Scheduler, StatusBoard};
use tranche_types::{OrderSide, Tranche};

struct Harness {
    chain: Arc<FakeChain>,
    source: Arc<FakeRegistrySource>,
    registry: Arc<PoolRegistry>,
    status: StatusBoard,
    scheduler: Arc<Scheduler>,
}

fn harness(chain: FakeChain, pools: Vec<tranche_types::Pool>) -> Harness {
    let chain = Arc::new(chain);
    let source = Arc::new(FakeRegistrySource::new(pools));
    let retry = RetryConfig {
        max_retries: 1,
        base_delay_ms: 1,
        max_delay_ms: 1,
        backoff_multiplier: 1.0,
    };
    let registry = Arc::new(PoolRegistry::new(source.clone(), retry));
    let status = StatusBoard::new();
    let closer = Arc::new(EpochCloser::new(chain.clone(), status.clone(), false, 4));
    let scheduler = Arc::new(
        Scheduler::new(
            registry.clone(),
            closer,
            chain.clone(),
            status.clone(),
            &ScheduleConfig::default(),
        )
        .unwrap(),
    );

    Harness {
        chain,
        source,
        registry,
        status,
        scheduler,
    }
}

fn closing_pool(chain: &FakeChain, name: &str) -> tranche_types::Pool {
    let pool = pool(name, params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(
        &pool,
        close_pending_timing(),
        vec![order(Tranche::Senior, OrderSide::Supply, 100)],
    ));
    pool
}

#[tokio::test]
async fn test_overlapping_sweep_trigger_is_coalesced() {
    let chain = FakeChain::with_submit_delay(Duration::from_millis(200));
    let pool = closing_pool(&chain, "Harbor Receivables");
    let h = harness(chain, vec![pool.clone()]);
    h.scheduler.trigger_refresh().await.unwrap().unwrap();

    let (first, second) = tokio::join!(h.scheduler.trigger_sweep(), h.scheduler.trigger_sweep());

    assert_eq!([first.is_some(), second.is_some()].iter().filter(|ran| **ran).count(), 1);
    assert_eq!(h.chain.submissions_for(&pool.address).len(), 1);
    assert_eq!(h.scheduler.sweeps(), 1);
}

#[tokio::test]
async fn test_sweep_runs_again_after_previous_finished() {
    let chain = FakeChain::new();
    let pool = closing_pool(&chain, "Harbor Receivables");
    let h = harness(chain, vec![pool.clone()]);
    h.scheduler.trigger_refresh().await.unwrap().unwrap();

    assert!(h.scheduler.trigger_sweep().await.is_some());
    assert!(h.scheduler.trigger_sweep().await.is_some());

    // The fake chain never advances, so each sweep re-submits the close
    assert_eq!(h.chain.submissions().len(), 2);
}

#[tokio::test]
async fn test_refresh_drops_status_of_removed_pools() {
    let chain = FakeChain::new();
    let kept = closing_pool(&chain, "Kept Pool");
    let removed = closing_pool(&chain, "Removed Pool");
    let h = harness(chain, vec![kept.clone(), removed.clone()]);

    assert_eq!(h.scheduler.trigger_refresh().await.unwrap().unwrap(), 2);
    h.scheduler.trigger_sweep().await.unwrap();
    assert!(h.status.get(&removed.address).await.is_some());

    h.source.set_pools(vec![kept.clone()]);
    assert_eq!(h.scheduler.trigger_refresh().await.unwrap().unwrap(), 1);

    assert!(h.status.get(&kept.address).await.is_some());
    assert!(h.status.get(&removed.address).await.is_none());
}

#[tokio::test]
async fn test_unavailable_registry_keeps_sweeping_known_pools() {
    let chain = FakeChain::new();
    let pool = closing_pool(&chain, "Harbor Receivables");
    let h = harness(chain, vec![pool.clone()]);
    h.scheduler.trigger_refresh().await.unwrap().unwrap();

    h.source.go_offline();
    let err = h.scheduler.trigger_refresh().await.unwrap().unwrap_err();
    assert!(matches!(err, KeeperError::RegistryUnavailable { attempts: 2, .. }));
    assert_eq!(h.registry.snapshot().await.len(), 1);

    let report = h.scheduler.trigger_sweep().await.unwrap();
    assert_eq!(report.closed, 1);
}

#[tokio::test]
async fn test_empty_registry_sweeps_nothing() {
    let h = harness(FakeChain::new(), Vec::new());
    h.scheduler.trigger_refresh().await.unwrap().unwrap();

    let report = h.scheduler.trigger_sweep().await.unwrap();
    assert_eq!(report.pools, 0);
    assert!(h.chain.submissions().is_empty());
}

#[tokio::test]
async fn test_sweep_runs_on_a_spawned_task() {
    let chain = FakeChain::new();
    let pool = closing_pool(&chain, "Harbor Receivables");
    let h = harness(chain, vec![pool.clone()]);

    // Same shape as the cron loop: the trigger futures must be Send + 'static
    let scheduler = h.scheduler.clone();
    let task = tokio::spawn(async move {
        scheduler.trigger_refresh().await;
        scheduler.trigger_sweep().await
    });

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.closed, 1);
    assert_eq!(h.chain.submissions_for(&pool.address).len(), 1);
}
