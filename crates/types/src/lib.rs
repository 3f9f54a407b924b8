/// Shared types for the tranche lending keeper
///
/// This crate provides the pool, epoch, order and settlement types used by
/// the keeper, the protocol constants, and the on-chain account layouts the
/// keeper decodes and the instruction data it encodes.

pub mod accounts;
pub mod constants;
pub mod epoch;
pub mod errors;
pub mod orders;
pub mod pool;
pub mod serde_helpers;
pub mod settlement;

// Re-export all public types
pub use accounts::*;
pub use constants::*;
pub use epoch::*;
pub use errors::*;
pub use orders::*;
pub use pool::*;
pub use settlement::*;

pub use solana_program::pubkey::Pubkey;

/// Token amount in base units of the pool currency
pub type Amount = u64;

/// WAD fixed-point ratio, `RATIO_SCALE` is 100%
pub type Ratio = u64;

/// Result type alias using the shared error type
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
