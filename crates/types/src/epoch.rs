/// Epoch snapshots and lifecycle phases

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::serde_helpers::pubkey_serde;
use crate::{Amount, OrderBook, PoolId, Ratio, TrancheParams, RATIO_SCALE};

// ============================================================================
// Epoch Timing
// ============================================================================

/// Raw epoch timing fields as stored in the pool account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTiming {
    /// Chain timestamp at which the previous epoch was closed
    pub last_epoch_closed: i64,

    /// Seconds an epoch must stay open before it can be closed
    pub minimum_epoch_time: i64,

    /// Length of the challenge window in seconds
    pub challenge_time: i64,

    /// Set once an epoch is closed and a solution may be submitted
    pub submission_period: bool,

    /// End of the challenge window, zero while no solution is pending
    pub min_challenge_period_end: i64,

    pub last_epoch_executed: u64,

    /// Set while an execution is being applied on chain
    pub execution_pending: bool,
}

impl EpochTiming {
    /// Earliest chain time at which the current epoch may be closed
    pub fn closable_at(&self) -> i64 {
        self.last_epoch_closed.saturating_add(self.minimum_epoch_time)
    }
}

// ============================================================================
// Epoch Snapshot
// ============================================================================

/// Point-in-time read of a pool's epoch state.
///
/// Snapshots are never updated in place. A later read produces a new
/// snapshot, and callers share them behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    #[serde(with = "pubkey_serde")]
    pub pool: PoolId,

    /// Slot the accounts were read at
    pub slot: u64,

    /// Chain clock unix timestamp at `slot`
    pub observed_at: i64,

    pub epoch_id: u64,
    pub timing: EpochTiming,

    /// Liquid currency held by the pool
    pub reserve: Amount,

    /// Outstanding loan value (NAV)
    pub outstanding_debt: Amount,

    /// Value owed to the senior tranche
    pub senior_asset: Amount,

    /// Tranche parameters as stored on chain
    pub params: TrancheParams,

    pub orders: OrderBook,
}

impl EpochSnapshot {
    /// Reserve plus outstanding debt
    pub fn total_value(&self) -> u128 {
        self.reserve as u128 + self.outstanding_debt as u128
    }

    /// Senior value, capped by the pool value
    pub fn senior_value(&self) -> u128 {
        (self.senior_asset as u128).min(self.total_value())
    }

    /// Residual value belonging to the junior tranche
    pub fn junior_value(&self) -> u128 {
        self.total_value() - self.senior_value()
    }

    /// Current junior ratio, `None` for an empty pool
    pub fn junior_ratio(&self) -> Option<Ratio> {
        let total = self.total_value();
        if total == 0 {
            return None;
        }
        // junior <= total < 2^65, so the product stays well inside u128
        let ratio = self.junior_value() * RATIO_SCALE as u128 / total;
        Some(ratio as Ratio)
    }
}

// ============================================================================
// Epoch Phase
// ============================================================================

/// Lifecycle phase derived from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EpochPhase {
    /// Orders are being accepted
    Open,
    /// Minimum epoch time elapsed, the epoch may be closed
    ClosePending,
    /// Epoch closed, no solution accepted yet
    SubmissionPeriod,
    /// A solution is accepted and may still be challenged
    ChallengePeriod,
    /// Challenge window elapsed, the epoch may be executed
    ChallengeEnded,
    /// Execution is being applied
    Executing,
}

/// What the keeper does about a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    Wait,
    Close,
    Execute,
}

impl EpochPhase {
    pub const ALL: [EpochPhase; 6] = [
        EpochPhase::Open,
        EpochPhase::ClosePending,
        EpochPhase::SubmissionPeriod,
        EpochPhase::ChallengePeriod,
        EpochPhase::ChallengeEnded,
        EpochPhase::Executing,
    ];

    pub fn action(&self) -> PhaseAction {
        match self {
            EpochPhase::ClosePending => PhaseAction::Close,
            EpochPhase::ChallengeEnded => PhaseAction::Execute,
            EpochPhase::Open
            | EpochPhase::SubmissionPeriod
            | EpochPhase::ChallengePeriod
            | EpochPhase::Executing => PhaseAction::Wait,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action() != PhaseAction::Wait
    }

    /// Phase the chain moves to after this one
    pub fn legal_next(&self) -> EpochPhase {
        match self {
            EpochPhase::Open => EpochPhase::ClosePending,
            EpochPhase::ClosePending => EpochPhase::SubmissionPeriod,
            EpochPhase::SubmissionPeriod => EpochPhase::ChallengePeriod,
            EpochPhase::ChallengePeriod => EpochPhase::ChallengeEnded,
            EpochPhase::ChallengeEnded => EpochPhase::Executing,
            EpochPhase::Executing => EpochPhase::Open,
        }
    }

    /// Stable label used on the status surface
    pub fn label(&self) -> &'static str {
        match self {
            EpochPhase::Open => "open",
            EpochPhase::ClosePending => "can-be-closed",
            EpochPhase::SubmissionPeriod => "in-submission-period",
            EpochPhase::ChallengePeriod => "in-challenge-period",
            EpochPhase::ChallengeEnded => "challenge-period-ended",
            EpochPhase::Executing => "executing",
        }
    }
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
