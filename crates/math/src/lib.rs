/// Mathematical utilities for tranche accounting
///
/// This crate provides checked integer operations and WAD fixed-point
/// helpers used by the settlement solver and the keeper's status output.

pub mod safe;
pub mod fixed_point;

// Re-export commonly used functions
pub use safe::*;
pub use fixed_point::*;
