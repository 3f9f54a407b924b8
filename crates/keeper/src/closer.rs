//! Per-pool epoch orchestration.
//!
//! Each sweep reads every pool, derives its phase and submits at most one
//! transaction per pool. A failure in one pool is reported for that pool and
//! never stops the others.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use tranche_math::{format_amount, format_ratio};
use tranche_types::{
    EpochPhase, EpochSnapshot, Infeasibility, PhaseAction, Pool, PoolId, SettlementPlan, SolveOutcome,
};

use crate::chain::{ChainClient, TransactionIntent, TransactionOutcome};
use crate::registry::PoolMap;
use crate::solver::solve;
use crate::state_machine::{classify, seconds_until_closable};
use crate::status::{EpochStatus, StatusBoard};

/// What the closer did with a pool during one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAction {
    Waited,
    Closed(TransactionOutcome),
    Executed(TransactionOutcome),
    Infeasible(Infeasibility),
    DryRun(TransactionIntent),
    AlreadyInFlight,
    Failed(String),
}

impl fmt::Display for PoolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolAction::Waited => f.write_str("waited"),
            PoolAction::Closed(outcome) => write!(f, "close {}", outcome),
            PoolAction::Executed(outcome) => write!(f, "execute {}", outcome),
            PoolAction::Infeasible(reason) => write!(f, "{}", reason),
            PoolAction::DryRun(intent) => write!(f, "dry-run {} epoch {}", intent.kind(), intent.epoch_id()),
            PoolAction::AlreadyInFlight => f.write_str("already in flight"),
            PoolAction::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of processing one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    pub pool: PoolId,
    pub name: String,
    pub epoch_id: Option<u64>,
    pub phase: Option<EpochPhase>,
    pub action: PoolAction,
    pub feasibility: Option<String>,
}

impl PoolReport {
    fn new(pool: &Pool, action: PoolAction) -> Self {
        Self {
            pool: pool.address,
            name: pool.name().to_string(),
            epoch_id: None,
            phase: None,
            action,
            feasibility: None,
        }
    }

    fn observed(pool: &Pool, snapshot: &EpochSnapshot, phase: EpochPhase, action: PoolAction) -> Self {
        Self {
            epoch_id: Some(snapshot.epoch_id),
            phase: Some(phase),
            ..Self::new(pool, action)
        }
    }

    fn with_feasibility(mut self, feasibility: String) -> Self {
        self.feasibility = Some(feasibility);
        self
    }

    fn to_status(&self) -> EpochStatus {
        EpochStatus {
            pool: self.pool,
            name: self.name.clone(),
            epoch_id: self.epoch_id,
            phase: self.phase.map(|p| p.label().to_string()),
            feasibility: self.feasibility.clone(),
            last_action: self.action.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pools: usize,
    pub waited: usize,
    pub closed: usize,
    pub executed: usize,
    /// Submissions that reverted or timed out
    pub unconfirmed: usize,
    pub infeasible: usize,
    pub dry_run: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub reports: Vec<PoolReport>,
}

impl SweepReport {
    fn from_reports(mut reports: Vec<PoolReport>) -> Self {
        reports.sort_by_key(|r| r.pool);

        let mut sweep = SweepReport {
            pools: reports.len(),
            ..Default::default()
        };

        for report in &reports {
            match &report.action {
                PoolAction::Waited => sweep.waited += 1,
                PoolAction::Closed(outcome) if outcome.is_confirmed() => sweep.closed += 1,
                PoolAction::Executed(outcome) if outcome.is_confirmed() => sweep.executed += 1,
                PoolAction::Closed(_) | PoolAction::Executed(_) => sweep.unconfirmed += 1,
                PoolAction::Infeasible(_) => sweep.infeasible += 1,
                PoolAction::DryRun(_) => sweep.dry_run += 1,
                PoolAction::AlreadyInFlight => sweep.in_flight += 1,
                PoolAction::Failed(_) => sweep.failed += 1,
            }
        }

        sweep.reports = reports;
        sweep
    }

    pub fn report(&self, pool: &PoolId) -> Option<&PoolReport> {
        self.reports.iter().find(|r| r.pool == *pool)
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pools: {} closed, {} executed, {} waiting, {} infeasible, {} unconfirmed, {} failed",
            self.pools, self.closed, self.executed, self.waited, self.infeasible, self.unconfirmed, self.failed
        )?;
        if self.dry_run > 0 {
            write!(f, ", {} dry-run", self.dry_run)?;
        }
        if self.in_flight > 0 {
            write!(f, ", {} in flight", self.in_flight)?;
        }
        Ok(())
    }
}

type InFlightSet = Arc<Mutex<HashSet<PoolId>>>;

/// Releases a pool's in-flight claim when dropped
struct InFlightGuard {
    set: InFlightSet,
    pool: PoolId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.pool);
    }
}

/// Drives every pool one step through its epoch lifecycle
pub struct EpochCloser {
    chain: Arc<dyn ChainClient>,
    status: StatusBoard,
    in_flight: InFlightSet,
    dry_run: bool,
    max_concurrent: usize,
}

impl EpochCloser {
    pub fn new(chain: Arc<dyn ChainClient>, status: StatusBoard, dry_run: bool, max_concurrent: usize) -> Self {
        Self {
            chain,
            status,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            dry_run,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Process every pool of `pools`, at most `max_concurrent` at a time
    pub async fn sweep(&self, pools: &PoolMap) -> SweepReport {
        // Futures are built up front: a borrowing closure inside the stream
        // fails higher-ranked `Send` inference once a sweep runs under `tokio::spawn`
        let pending: Vec<_> = pools.values().map(|pool| self.process_pool(pool)).collect();
        let reports: Vec<PoolReport> = stream::iter(pending)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        SweepReport::from_reports(reports)
    }

    /// Read, classify and act on a single pool.
    ///
    /// The pool stays claimed from the read until the submission returns, so
    /// an overlapping call for the same pool reports `AlreadyInFlight`.
    pub async fn process_pool(&self, pool: &Pool) -> PoolReport {
        let Some(_guard) = self.claim(pool.address) else {
            debug!(pool = %pool.address, name = pool.name(), "Pool already in flight, skipping");
            return PoolReport::new(pool, PoolAction::AlreadyInFlight);
        };

        let report = self.advance(pool).await;
        self.status.record(report.to_status()).await;
        report
    }

    fn claim(&self, pool: PoolId) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(pool) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            pool,
        })
    }

    async fn advance(&self, pool: &Pool) -> PoolReport {
        let snapshot = match self.chain.read_epoch_state(pool).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(pool = %pool.address, name = pool.name(), error = %e, "Failed to read epoch state");
                return PoolReport::new(pool, PoolAction::Failed(e.to_string()));
            }
        };

        if snapshot.params != pool.params {
            warn!(
                pool = %pool.address,
                name = pool.name(),
                "On-chain tranche parameters differ from the registry, solving with on-chain values"
            );
        }

        let phase = classify(&snapshot);
        debug!(
            pool = %pool.address,
            name = pool.name(),
            epoch = snapshot.epoch_id,
            slot = snapshot.slot,
            phase = %phase,
            "Classified epoch"
        );

        match phase.action() {
            PhaseAction::Wait if phase == EpochPhase::Open => {
                let remaining = seconds_until_closable(&snapshot);
                PoolReport::observed(pool, &snapshot, phase, PoolAction::Waited)
                    .with_feasibility(format!("closable in {}s", remaining))
            }
            PhaseAction::Wait => PoolReport::observed(pool, &snapshot, phase, PoolAction::Waited),
            PhaseAction::Close => self.close(pool, &snapshot, phase).await,
            PhaseAction::Execute => {
                let intent = TransactionIntent::ExecuteEpoch {
                    pool: pool.address,
                    epoch_id: snapshot.epoch_id,
                };
                let action = self.dispatch(pool, intent).await;
                PoolReport::observed(pool, &snapshot, phase, action)
                    .with_feasibility("challenge period ended, ready to execute".to_string())
            }
        }
    }

    async fn close(&self, pool: &Pool, snapshot: &EpochSnapshot, phase: EpochPhase) -> PoolReport {
        let outcome = match solve(snapshot, &snapshot.params) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(pool = %pool.address, name = pool.name(), error = %e, "Solver failed");
                return PoolReport::observed(pool, snapshot, phase, PoolAction::Failed(e.to_string()));
            }
        };

        match outcome {
            SolveOutcome::Infeasible(reason) => {
                warn!(
                    pool = %pool.address,
                    name = pool.name(),
                    epoch = snapshot.epoch_id,
                    reason = %reason,
                    "No feasible settlement, skipping close this sweep"
                );
                let text = reason.to_string();
                PoolReport::observed(pool, snapshot, phase, PoolAction::Infeasible(reason)).with_feasibility(text)
            }
            SolveOutcome::Feasible(plan) => {
                let summary = describe_plan(&plan, pool.decimals);
                info!(
                    pool = %pool.address,
                    name = pool.name(),
                    epoch = snapshot.epoch_id,
                    full = plan.is_full(),
                    "Solved epoch: {}",
                    summary
                );
                let intent = TransactionIntent::CloseEpoch {
                    pool: pool.address,
                    epoch_id: snapshot.epoch_id,
                    plan,
                };
                let action = self.dispatch(pool, intent).await;
                PoolReport::observed(pool, snapshot, phase, action).with_feasibility(summary)
            }
        }
    }

    async fn dispatch(&self, pool: &Pool, intent: TransactionIntent) -> PoolAction {
        if self.dry_run {
            info!(
                pool = %pool.address,
                name = pool.name(),
                epoch = intent.epoch_id(),
                "DRY RUN: Would submit {} transaction",
                intent.kind()
            );
            return PoolAction::DryRun(intent);
        }

        let is_close = matches!(intent, TransactionIntent::CloseEpoch { .. });
        let kind = intent.kind();
        let epoch = intent.epoch_id();

        match self.chain.submit(intent).await {
            Ok(outcome) => {
                match &outcome {
                    TransactionOutcome::Confirmed { .. } => {
                        info!(pool = %pool.address, name = pool.name(), epoch, "Epoch {}: {}", kind, outcome)
                    }
                    TransactionOutcome::Reverted { .. } => {
                        warn!(pool = %pool.address, name = pool.name(), epoch, "Epoch {}: {}", kind, outcome)
                    }
                    TransactionOutcome::TimedOut { .. } => warn!(
                        pool = %pool.address,
                        name = pool.name(),
                        epoch,
                        "Epoch {}: {}, state will be re-read next sweep",
                        kind,
                        outcome
                    ),
                }
                if is_close {
                    PoolAction::Closed(outcome)
                } else {
                    PoolAction::Executed(outcome)
                }
            }
            Err(e) => {
                error!(pool = %pool.address, name = pool.name(), epoch, error = %e, "Failed to submit {} transaction", kind);
                PoolAction::Failed(e.to_string())
            }
        }
    }
}

/// Operator-facing summary of a solved settlement
pub fn describe_plan(plan: &SettlementPlan, decimals: u8) -> String {
    let ratio = plan
        .new_junior_ratio
        .map(format_ratio)
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        "feasible: senior +{} -{}, junior +{} -{}, reserve {}, junior ratio {}",
        format_amount(plan.senior.supply, decimals),
        format_amount(plan.senior.redeem, decimals),
        format_amount(plan.junior.supply, decimals),
        format_amount(plan.junior.redeem, decimals),
        format_amount(plan.new_reserve, decimals),
        ratio
    )
}
