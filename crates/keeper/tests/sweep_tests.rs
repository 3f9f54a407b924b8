//! Closing sweep behaviour against an in-memory chain

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tranche_keeper::{EpochCloser, PoolAction, PoolMap, StatusBoard, TransactionIntent, TransactionOutcome};
use tranche_types::{EpochPhase, OrderSide, Pool, Tranche};

fn closer(chain: &Arc<FakeChain>, dry_run: bool) -> (EpochCloser, StatusBoard) {
    let status = StatusBoard::new();
    let closer = EpochCloser::new(chain.clone(), status.clone(), dry_run, 4);
    (closer, status)
}

fn pool_map(pools: &[&Pool]) -> PoolMap {
    pools.iter().map(|p| (p.address, (*p).clone())).collect()
}

fn scenario_orders() -> Vec<tranche_types::Order> {
    vec![
        order(Tranche::Junior, OrderSide::Redeem, 50),
        order(Tranche::Senior, OrderSide::Supply, 100),
    ]
}

#[tokio::test]
async fn test_close_pending_pool_is_closed_with_full_plan() {
    let chain = Arc::new(FakeChain::new());
    let pool = pool("Harbor Receivables", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&pool, close_pending_timing(), scenario_orders()));
    let (closer, status) = closer(&chain, false);

    let report = closer.sweep(&pool_map(&[&pool])).await;

    assert_eq!(report.closed, 1);
    let submissions = chain.submissions();
    assert_eq!(submissions.len(), 1);
    match &submissions[0] {
        TransactionIntent::CloseEpoch { epoch_id, plan, .. } => {
            assert_eq!(*epoch_id, 17);
            assert_eq!(plan.senior.supply, 100);
            assert_eq!(plan.junior.redeem, 50);
            assert_eq!(plan.new_reserve, 1_050);
        }
        other => panic!("expected a close, got {:?}", other),
    }

    let entry = status.get(&pool.address).await.unwrap();
    assert_eq!(entry.phase.as_deref(), Some("can-be-closed"));
    assert_eq!(entry.epoch_id, Some(17));
    assert!(entry.feasibility.unwrap().starts_with("feasible"));
    assert!(entry.last_action.starts_with("close confirmed"));
}

#[tokio::test]
async fn test_challenge_ended_pool_is_executed() {
    let chain = Arc::new(FakeChain::new());
    let pool = pool("Meridian Trade", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&pool, challenge_ended_timing(), scenario_orders()));
    let (closer, _) = closer(&chain, false);

    let report = closer.process_pool(&pool).await;

    assert_eq!(report.phase, Some(EpochPhase::ChallengeEnded));
    assert!(matches!(report.action, PoolAction::Executed(TransactionOutcome::Confirmed { .. })));
    assert_eq!(
        chain.submissions(),
        vec![TransactionIntent::ExecuteEpoch {
            pool: pool.address,
            epoch_id: 17
        }]
    );
}

#[tokio::test]
async fn test_waiting_phases_submit_nothing() {
    let chain = Arc::new(FakeChain::new());
    let open = pool("Open Pool", params(500, 2000, 1_200));
    let challenged = pool("Challenged Pool", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&open, open_timing(), scenario_orders()));
    let mut timing = challenge_ended_timing();
    timing.min_challenge_period_end = NOW + 600;
    chain.set_snapshot(snapshot(&challenged, timing, scenario_orders()));
    let (closer, status) = closer(&chain, false);

    let report = closer.sweep(&pool_map(&[&open, &challenged])).await;

    assert_eq!(report.waited, 2);
    assert!(chain.submissions().is_empty());
    assert_eq!(
        report.report(&challenged.address).unwrap().phase,
        Some(EpochPhase::ChallengePeriod)
    );
    let entry = status.get(&open.address).await.unwrap();
    assert_eq!(entry.last_action, "waited");
    // Closed 100s ago with a one-day minimum epoch
    assert_eq!(entry.feasibility.as_deref(), Some("closable in 86300s"));
    assert_eq!(status.get(&challenged.address).await.unwrap().feasibility, None);
}

#[tokio::test]
async fn test_infeasible_pool_does_not_block_others() {
    let chain = Arc::new(FakeChain::new());
    let stuck = pool("Stuck Pool", params(500, 2000, 1_200));
    let healthy = pool("Healthy Pool", params(500, 2000, 1_200));

    // 2% junior with nothing to repair it
    let mut bad = snapshot(&stuck, close_pending_timing(), Vec::new());
    bad.senior_asset = 4_900;
    chain.set_snapshot(bad);
    chain.set_snapshot(snapshot(&healthy, close_pending_timing(), scenario_orders()));
    let (closer, status) = closer(&chain, false);

    let report = closer.sweep(&pool_map(&[&stuck, &healthy])).await;

    assert_eq!(report.infeasible, 1);
    assert_eq!(report.closed, 1);
    assert!(chain.submissions_for(&stuck.address).is_empty());
    assert_eq!(chain.submissions_for(&healthy.address).len(), 1);

    let entry = status.get(&stuck.address).await.unwrap();
    assert!(entry.feasibility.unwrap().starts_with("infeasible"));
}

#[tokio::test]
async fn test_read_failure_is_contained_to_its_pool() {
    let chain = Arc::new(FakeChain::new());
    let missing = pool("Missing Pool", params(500, 2000, 1_200));
    let healthy = pool("Healthy Pool", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&healthy, close_pending_timing(), scenario_orders()));
    let (closer, status) = closer(&chain, false);

    let report = closer.sweep(&pool_map(&[&missing, &healthy])).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.closed, 1);
    let failed = report.report(&missing.address).unwrap();
    assert!(matches!(failed.action, PoolAction::Failed(_)));
    assert_eq!(failed.phase, None);
    assert_eq!(status.get(&missing.address).await.unwrap().phase, None);
}

#[tokio::test]
async fn test_dry_run_never_submits() {
    let chain = Arc::new(FakeChain::new());
    let closing = pool("Closing Pool", params(500, 2000, 1_200));
    let executing = pool("Executing Pool", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&closing, close_pending_timing(), scenario_orders()));
    chain.set_snapshot(snapshot(&executing, challenge_ended_timing(), Vec::new()));
    let (closer, _) = closer(&chain, true);

    let report = closer.sweep(&pool_map(&[&closing, &executing])).await;

    assert_eq!(report.dry_run, 2);
    assert!(chain.submissions().is_empty());
    assert!(matches!(
        report.report(&closing.address).unwrap().action,
        PoolAction::DryRun(TransactionIntent::CloseEpoch { .. })
    ));
}

#[tokio::test]
async fn test_reverted_and_timed_out_submissions_are_unconfirmed() {
    let chain = Arc::new(FakeChain::new());
    let pool = pool("Harbor Receivables", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&pool, close_pending_timing(), scenario_orders()));
    let (closer, _) = closer(&chain, false);

    chain.set_outcome(FakeOutcome::Revert("custom program error: 0x1771".to_string()));
    let reverted = closer.sweep(&pool_map(&[&pool])).await;
    assert_eq!(reverted.unconfirmed, 1);
    assert_eq!(reverted.closed, 0);

    // Nothing is remembered locally, the next sweep simply tries again
    chain.set_outcome(FakeOutcome::TimeOut);
    let timed_out = closer.sweep(&pool_map(&[&pool])).await;
    assert!(matches!(
        timed_out.reports[0].action,
        PoolAction::Closed(TransactionOutcome::TimedOut { .. })
    ));
    assert_eq!(chain.submissions().len(), 2);
}

#[tokio::test]
async fn test_overlapping_calls_for_one_pool_submit_once() {
    let chain = Arc::new(FakeChain::with_submit_delay(Duration::from_millis(100)));
    let pool = pool("Harbor Receivables", params(500, 2000, 1_200));
    chain.set_snapshot(snapshot(&pool, close_pending_timing(), scenario_orders()));
    let (closer, _) = closer(&chain, false);

    let (first, second) = tokio::join!(closer.process_pool(&pool), closer.process_pool(&pool));

    let skipped = [&first, &second]
        .iter()
        .filter(|r| r.action == PoolAction::AlreadyInFlight)
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(chain.submissions().len(), 1);

    // The claim is released once the submission returns
    let again = closer.process_pool(&pool).await;
    assert!(matches!(again.action, PoolAction::Closed(_)));
}
