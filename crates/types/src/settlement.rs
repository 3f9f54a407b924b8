/// Settlement plans produced by the order solver

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use std::fmt;

use crate::serde_helpers::pubkey_serde;
use crate::{Amount, OrderSide, Ratio, Tranche};

/// Fulfilled amounts of one tranche
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheFill {
    pub supply: Amount,
    pub redeem: Amount,
}

/// How much of a single order is fulfilled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    #[serde(with = "pubkey_serde")]
    pub investor: Pubkey,
    pub tranche: Tranche,
    pub side: OrderSide,
    pub requested: Amount,
    pub fulfilled: Amount,
}

/// A settlement that satisfies every pool constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    /// Epoch this plan was solved for
    pub epoch_id: u64,
    pub senior: TrancheFill,
    pub junior: TrancheFill,
    pub fills: Vec<OrderFill>,

    /// Reserve after the plan is applied
    pub new_reserve: Amount,

    /// Junior ratio after the plan is applied, `None` for an empty pool
    pub new_junior_ratio: Option<Ratio>,
}

impl SettlementPlan {
    pub fn fill(&self, tranche: Tranche) -> TrancheFill {
        match tranche {
            Tranche::Senior => self.senior,
            Tranche::Junior => self.junior,
        }
    }

    /// True when at least one order receives a non-zero fill
    pub fn moves_funds(&self) -> bool {
        self.fills.iter().any(|f| f.fulfilled > 0)
    }

    /// True when every order is filled in full
    pub fn is_full(&self) -> bool {
        self.fills.iter().all(|f| f.fulfilled == f.requested)
    }
}

/// A pool constraint a settlement can break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constraint {
    /// Redemptions exceed the reserve
    ReserveNegative,
    ReserveAboveMax,
    JuniorRatioBelowMin,
    JuniorRatioAboveMax,
    /// Senior redemptions exceed the senior value
    SeniorOverdrawn,
    /// Junior redemptions exceed the junior value
    JuniorOverdrawn,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Constraint::ReserveNegative => "redemptions exceed reserve",
            Constraint::ReserveAboveMax => "reserve above max reserve",
            Constraint::JuniorRatioBelowMin => "junior ratio below minimum",
            Constraint::JuniorRatioAboveMax => "junior ratio above maximum",
            Constraint::SeniorOverdrawn => "senior redemptions exceed senior value",
            Constraint::JuniorOverdrawn => "junior redemptions exceed junior value",
        };
        f.write_str(text)
    }
}

/// Why no settlement satisfies the pool constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infeasibility {
    /// Constraints broken at the best point the solver reached
    pub violations: Vec<Constraint>,
}

impl fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.violations.iter().map(|c| c.to_string()).collect();
        write!(f, "infeasible: {}", reasons.join(", "))
    }
}

/// Result of solving an epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SolveOutcome {
    Feasible(SettlementPlan),
    Infeasible(Infeasibility),
}

impl SolveOutcome {
    pub fn is_feasible(&self) -> bool {
        matches!(self, SolveOutcome::Feasible(_))
    }

    pub fn plan(&self) -> Option<&SettlementPlan> {
        match self {
            SolveOutcome::Feasible(plan) => Some(plan),
            SolveOutcome::Infeasible(_) => None,
        }
    }
}
