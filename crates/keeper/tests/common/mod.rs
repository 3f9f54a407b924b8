//! Shared fixtures for keeper integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use solana_sdk::signature::Signature;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tranche_keeper::{
    ChainClient, HealthReport, KeeperError, KeeperResult, RegistryDocument, RegistrySource, TransactionIntent,
    TransactionOutcome,
};
use tranche_math::ratio_from_bps;
use tranche_types::{
    Amount, EpochSnapshot, EpochTiming, Order, OrderBook, OrderSide, Pool, PoolId, PoolMetadata, Pubkey,
    Tranche, TrancheParams,
};

pub const NOW: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;

// ============================================================================
// Builders
// ============================================================================

pub fn params(min_bps: u64, max_bps: u64, max_reserve: Amount) -> TrancheParams {
    TrancheParams {
        min_junior_ratio: ratio_from_bps(min_bps).unwrap(),
        max_junior_ratio: ratio_from_bps(max_bps).unwrap(),
        max_reserve,
    }
}

pub fn pool(name: &str, params: TrancheParams) -> Pool {
    Pool {
        address: Pubkey::new_unique(),
        metadata: PoolMetadata {
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            asset_class: Some("invoices".to_string()),
        },
        decimals: 0,
        params,
        disabled: false,
    }
}

pub fn order(tranche: Tranche, side: OrderSide, amount: Amount) -> Order {
    Order {
        investor: Pubkey::new_unique(),
        tranche,
        side,
        amount,
    }
}

pub fn open_timing() -> EpochTiming {
    EpochTiming {
        last_epoch_closed: NOW - 100,
        minimum_epoch_time: DAY,
        challenge_time: 1_800,
        ..Default::default()
    }
}

pub fn close_pending_timing() -> EpochTiming {
    EpochTiming {
        last_epoch_closed: NOW - 2 * DAY,
        ..open_timing()
    }
}

pub fn challenge_ended_timing() -> EpochTiming {
    EpochTiming {
        submission_period: true,
        min_challenge_period_end: NOW - 10,
        ..close_pending_timing()
    }
}

/// Reserve 1000, debt 4000, senior 4400 (12% junior)
pub fn snapshot(pool: &Pool, timing: EpochTiming, orders: Vec<Order>) -> EpochSnapshot {
    EpochSnapshot {
        pool: pool.address,
        slot: 250_000_000,
        observed_at: NOW,
        epoch_id: 17,
        timing,
        reserve: 1_000,
        outstanding_debt: 4_000,
        senior_asset: 4_400,
        params: pool.params,
        orders: OrderBook::new(orders),
    }
}

// ============================================================================
// Fake chain
// ============================================================================

#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Confirm,
    Revert(String),
    TimeOut,
}

/// In-memory chain: serves fixed snapshots and records submissions
pub struct FakeChain {
    snapshots: Mutex<HashMap<PoolId, EpochSnapshot>>,
    submissions: Mutex<Vec<TransactionIntent>>,
    outcome: Mutex<FakeOutcome>,
    submit_delay: Duration,
    signer: Pubkey,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::with_submit_delay(Duration::ZERO)
    }

    pub fn with_submit_delay(submit_delay: Duration) -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            outcome: Mutex::new(FakeOutcome::Confirm),
            submit_delay,
            signer: Pubkey::new_unique(),
        }
    }

    pub fn set_snapshot(&self, snapshot: EpochSnapshot) {
        self.snapshots.lock().unwrap().insert(snapshot.pool, snapshot);
    }

    pub fn set_outcome(&self, outcome: FakeOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn submissions(&self) -> Vec<TransactionIntent> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submissions_for(&self, pool: &PoolId) -> Vec<TransactionIntent> {
        self.submissions().into_iter().filter(|i| i.pool() == *pool).collect()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn read_epoch_state(&self, pool: &Pool) -> KeeperResult<EpochSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&pool.address)
            .cloned()
            .ok_or_else(|| KeeperError::ReadError {
                pool: pool.address,
                reason: "account not found".to_string(),
            })
    }

    async fn submit(&self, intent: TransactionIntent) -> KeeperResult<TransactionOutcome> {
        self.submissions.lock().unwrap().push(intent);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let signature = Signature::new_unique();
        let outcome = self.outcome.lock().unwrap().clone();
        Ok(match outcome {
            FakeOutcome::Confirm => TransactionOutcome::Confirmed { signature, slot: 250_000_001 },
            FakeOutcome::Revert(reason) => TransactionOutcome::Reverted {
                signature: Some(signature),
                reason,
            },
            FakeOutcome::TimeOut => TransactionOutcome::TimedOut { signature },
        })
    }

    fn signer(&self) -> Pubkey {
        self.signer
    }

    async fn health_check(&self) -> KeeperResult<HealthReport> {
        Ok(HealthReport {
            balance_lamports: 1_000_000_000,
            min_balance_lamports: 10_000_000,
        })
    }
}

// ============================================================================
// Fake registry
// ============================================================================

/// Registry source whose document can be swapped between refreshes
pub struct FakeRegistrySource {
    pools: Mutex<Option<Vec<Pool>>>,
}

impl FakeRegistrySource {
    pub fn new(pools: Vec<Pool>) -> Self {
        Self {
            pools: Mutex::new(Some(pools)),
        }
    }

    pub fn set_pools(&self, pools: Vec<Pool>) {
        *self.pools.lock().unwrap() = Some(pools);
    }

    /// Make every following fetch fail
    pub fn go_offline(&self) {
        *self.pools.lock().unwrap() = None;
    }
}

#[async_trait]
impl RegistrySource for FakeRegistrySource {
    async fn fetch(&self) -> KeeperResult<RegistryDocument> {
        match self.pools.lock().unwrap().clone() {
            Some(pools) => Ok(RegistryDocument {
                version: Some("test".to_string()),
                pools,
            }),
            None => Err(KeeperError::NetworkError("gateway offline".to_string())),
        }
    }

    fn describe(&self) -> String {
        "fake://registry".to_string()
    }
}
