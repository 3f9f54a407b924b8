//! Epoch lifecycle classification.
//!
//! The keeper never stores an epoch phase. Every sweep re-derives it from a
//! fresh [`EpochSnapshot`] using the chain clock captured with the snapshot,
//! so a transaction that has not landed yet is simply observed as the
//! previous phase on the next read.

use tranche_types::{EpochPhase, EpochSnapshot};

/// Derive the lifecycle phase of a snapshot
pub fn classify(snapshot: &EpochSnapshot) -> EpochPhase {
    let timing = &snapshot.timing;
    let now = snapshot.observed_at;

    if timing.execution_pending {
        return EpochPhase::Executing;
    }

    if timing.submission_period {
        if timing.min_challenge_period_end == 0 {
            return EpochPhase::SubmissionPeriod;
        }
        if now < timing.min_challenge_period_end {
            return EpochPhase::ChallengePeriod;
        }
        return EpochPhase::ChallengeEnded;
    }

    if now >= timing.closable_at() {
        EpochPhase::ClosePending
    } else {
        EpochPhase::Open
    }
}

/// Seconds until the current epoch can be closed, zero once it can
pub fn seconds_until_closable(snapshot: &EpochSnapshot) -> i64 {
    snapshot
        .timing
        .closable_at()
        .saturating_sub(snapshot.observed_at)
        .max(0)
}
