/// Protocol constants shared by the keeper crates

// ============================================================================
// Fixed-Point Constants
// ============================================================================

/// Decimal places of a ratio
pub const RATIO_DECIMALS: u32 = 18;

/// Ratio scale factor: 10^18 is 100%
pub const RATIO_SCALE: u64 = 1_000_000_000_000_000_000;

/// Basis points denominator (10,000 = 100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Largest currency decimals a registry entry may declare
pub const MAX_CURRENCY_DECIMALS: u8 = 18;

// ============================================================================
// Account Layout Constants
// ============================================================================

/// Length of the account and instruction discriminator prefix
pub const DISCRIMINATOR_LEN: usize = 8;

/// Account name hashed into the pool account discriminator
pub const POOL_ACCOUNT_NAME: &str = "LendingPool";

/// Account name hashed into the order account discriminator
pub const ORDER_ACCOUNT_NAME: &str = "InvestorOrder";

/// Byte offset of the pool address inside an order account
pub const ORDER_POOL_OFFSET: usize = DISCRIMINATOR_LEN;

// ============================================================================
// Instruction Constants
// ============================================================================

/// Instruction that closes the current epoch with a settlement
pub const CLOSE_EPOCH_IX: &str = "close_epoch";

/// Instruction that executes a closed epoch after its challenge period
pub const EXECUTE_EPOCH_IX: &str = "execute_epoch";
