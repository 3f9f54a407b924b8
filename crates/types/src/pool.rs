/// Pool identity, display metadata and tranche risk parameters

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use crate::serde_helpers::pubkey_serde;
use crate::{Amount, ProtocolError, ProtocolResult, Ratio, MAX_CURRENCY_DECIMALS, RATIO_SCALE};

/// Pools are identified by their on-chain account address
pub type PoolId = Pubkey;

// ============================================================================
// Tranche Parameters
// ============================================================================

/// Admin-settable risk bounds a settlement must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheParams {
    /// Lowest junior share of pool value after settlement (WAD)
    pub min_junior_ratio: Ratio,

    /// Highest junior share of pool value after settlement (WAD)
    pub max_junior_ratio: Ratio,

    /// Largest reserve the pool may hold after settlement
    pub max_reserve: Amount,
}

impl TrancheParams {
    /// Reject ratio bounds that are inverted or above 100%
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.max_junior_ratio > RATIO_SCALE {
            return Err(ProtocolError::invalid_parameter(
                "max_junior_ratio",
                &self.max_junior_ratio.to_string(),
                &format!("at most {} (100%)", RATIO_SCALE),
            ));
        }

        if self.min_junior_ratio > self.max_junior_ratio {
            return Err(ProtocolError::invalid_parameter(
                "min_junior_ratio",
                &self.min_junior_ratio.to_string(),
                &format!("at most max_junior_ratio ({})", self.max_junior_ratio),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Display metadata published in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub asset_class: Option<String>,
}

/// A lending pool as described by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool account address
    #[serde(with = "pubkey_serde")]
    pub address: Pubkey,

    pub metadata: PoolMetadata,

    /// Decimals of the pool currency, used for display only
    pub decimals: u8,

    /// Parameters the registry declares; the chain copy is authoritative
    pub params: TrancheParams,

    /// Disabled pools are kept out of the active set
    #[serde(default)]
    pub disabled: bool,
}

impl Pool {
    /// Name used in log lines
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Validate a registry entry
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.metadata.name.trim().is_empty() {
            return Err(ProtocolError::invalid_parameter(
                "metadata.name",
                "empty",
                "non-empty string",
            ));
        }

        if self.decimals > MAX_CURRENCY_DECIMALS {
            return Err(ProtocolError::invalid_parameter(
                "decimals",
                &self.decimals.to_string(),
                &format!("at most {}", MAX_CURRENCY_DECIMALS),
            ));
        }

        if self.address == Pubkey::default() {
            return Err(ProtocolError::invalid_parameter(
                "address",
                &self.address.to_string(),
                "a non-default pool address",
            ));
        }

        self.params.validate()
    }
}
