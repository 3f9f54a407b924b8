//! Ledger gateway used by the epoch closer

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::fmt;
use tranche_types::{EpochSnapshot, Pool, PoolId, SettlementPlan};

use crate::error::KeeperResult;

/// A transaction the keeper wants on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionIntent {
    /// Close the current epoch with a solved settlement
    CloseEpoch {
        pool: PoolId,
        epoch_id: u64,
        plan: SettlementPlan,
    },
    /// Execute a closed epoch whose challenge period has ended
    ExecuteEpoch { pool: PoolId, epoch_id: u64 },
}

impl TransactionIntent {
    pub fn pool(&self) -> PoolId {
        match self {
            TransactionIntent::CloseEpoch { pool, .. } | TransactionIntent::ExecuteEpoch { pool, .. } => *pool,
        }
    }

    pub fn epoch_id(&self) -> u64 {
        match self {
            TransactionIntent::CloseEpoch { epoch_id, .. } | TransactionIntent::ExecuteEpoch { epoch_id, .. } => {
                *epoch_id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransactionIntent::CloseEpoch { .. } => "close",
            TransactionIntent::ExecuteEpoch { .. } => "execute",
        }
    }
}

/// What happened to a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Confirmed { signature: Signature, slot: u64 },
    /// Rejected in preflight (no signature landed) or failed on chain
    Reverted {
        signature: Option<Signature>,
        reason: String,
    },
    /// Not confirmed within the wait bound; it may still land
    TimedOut { signature: Signature },
}

impl TransactionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionOutcome::Confirmed { .. })
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Confirmed { signature, slot } => write!(f, "confirmed {} at slot {}", signature, slot),
            TransactionOutcome::Reverted { signature: Some(signature), reason } => {
                write!(f, "reverted {}: {}", signature, reason)
            }
            TransactionOutcome::Reverted { signature: None, reason } => write!(f, "rejected: {}", reason),
            TransactionOutcome::TimedOut { signature } => write!(f, "timed out waiting for {}", signature),
        }
    }
}

/// Node and signer health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub balance_lamports: u64,
    pub min_balance_lamports: u64,
}

impl HealthReport {
    pub fn low_balance(&self) -> bool {
        self.balance_lamports < self.min_balance_lamports
    }
}

/// Read/write access to the ledger.
///
/// Reads never block a sweep for longer than the configured read timeout.
/// `submit` signs once, sends once and polls until a receipt arrives or the
/// confirmation wait elapses. Retries are the caller's decision.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Capture a fresh epoch snapshot of `pool`
    async fn read_epoch_state(&self, pool: &Pool) -> KeeperResult<EpochSnapshot>;

    async fn submit(&self, intent: TransactionIntent) -> KeeperResult<TransactionOutcome>;

    /// Public key of the submitting signer
    fn signer(&self) -> Pubkey;

    async fn health_check(&self) -> KeeperResult<HealthReport>;
}
