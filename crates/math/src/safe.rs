/// Safe arithmetic operations with overflow protection
///
/// All operations return errors instead of panicking or wrapping.

use tranche_types::{ProtocolError, ProtocolResult};

// ============================================================================
// Safe Unsigned Arithmetic
// ============================================================================

/// Safe addition for u128 values
pub fn safe_add_u128(a: u128, b: u128) -> ProtocolResult<u128> {
    a.checked_add(b)
        .ok_or_else(|| ProtocolError::math_overflow("u128 addition", &[&a.to_string(), &b.to_string()]))
}

/// Safe subtraction for u128 values
pub fn safe_sub_u128(a: u128, b: u128) -> ProtocolResult<u128> {
    a.checked_sub(b)
        .ok_or_else(|| ProtocolError::math_underflow("u128 subtraction", &[&a.to_string(), &b.to_string()]))
}

/// Safe multiplication for u128 values
pub fn safe_mul_u128(a: u128, b: u128) -> ProtocolResult<u128> {
    a.checked_mul(b)
        .ok_or_else(|| ProtocolError::math_overflow("u128 multiplication", &[&a.to_string(), &b.to_string()]))
}

/// Safe division for u128 values
pub fn safe_div_u128(a: u128, b: u128) -> ProtocolResult<u128> {
    if b == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("u128 division: {} / {}", a, b),
        });
    }
    Ok(a / b)
}

/// Narrow a u128 into a u64 amount
pub fn to_u64(value: u128, context: &str) -> ProtocolResult<u64> {
    u64::try_from(value).map_err(|_| ProtocolError::math_overflow(context, &[&value.to_string()]))
}

// ============================================================================
// Safe Signed Arithmetic
// ============================================================================

/// Safe addition for i128 values
pub fn safe_add_i128(a: i128, b: i128) -> ProtocolResult<i128> {
    a.checked_add(b)
        .ok_or_else(|| ProtocolError::math_overflow("i128 addition", &[&a.to_string(), &b.to_string()]))
}

/// Safe subtraction for i128 values
pub fn safe_sub_i128(a: i128, b: i128) -> ProtocolResult<i128> {
    a.checked_sub(b)
        .ok_or_else(|| ProtocolError::math_overflow("i128 subtraction", &[&a.to_string(), &b.to_string()]))
}

/// Safe multiplication for i128 values
pub fn safe_mul_i128(a: i128, b: i128) -> ProtocolResult<i128> {
    a.checked_mul(b)
        .ok_or_else(|| ProtocolError::math_overflow("i128 multiplication", &[&a.to_string(), &b.to_string()]))
}

/// Division rounding toward negative infinity
pub fn div_floor_i128(a: i128, b: i128) -> ProtocolResult<i128> {
    if b == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("i128 floor division: {} / {}", a, b),
        });
    }
    let q = a
        .checked_div(b)
        .ok_or_else(|| ProtocolError::math_overflow("i128 floor division", &[&a.to_string(), &b.to_string()]))?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Division rounding toward positive infinity
pub fn div_ceil_i128(a: i128, b: i128) -> ProtocolResult<i128> {
    if b == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("i128 ceil division: {} / {}", a, b),
        });
    }
    let q = a
        .checked_div(b)
        .ok_or_else(|| ProtocolError::math_overflow("i128 ceil division", &[&a.to_string(), &b.to_string()]))?;
    if (a % b != 0) && ((a < 0) == (b < 0)) {
        Ok(q + 1)
    } else {
        Ok(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_u128() {
        assert_eq!(safe_add_u128(2, 3).unwrap(), 5);
        assert!(safe_add_u128(u128::MAX, 1).is_err());
        assert!(safe_sub_u128(1, 2).is_err());
        assert!(safe_mul_u128(u128::MAX, 2).is_err());
        assert!(matches!(safe_div_u128(1, 0), Err(ProtocolError::DivisionByZero { .. })));
        assert!(to_u64(u64::MAX as u128 + 1, "narrow").is_err());
    }

    #[test]
    fn test_floor_and_ceil_division() {
        assert_eq!(div_floor_i128(7, 2).unwrap(), 3);
        assert_eq!(div_floor_i128(-7, 2).unwrap(), -4);
        assert_eq!(div_floor_i128(7, -2).unwrap(), -4);
        assert_eq!(div_floor_i128(-8, 2).unwrap(), -4);

        assert_eq!(div_ceil_i128(7, 2).unwrap(), 4);
        assert_eq!(div_ceil_i128(-7, 2).unwrap(), -3);
        assert_eq!(div_ceil_i128(-7, -2).unwrap(), 4);
        assert_eq!(div_ceil_i128(8, 2).unwrap(), 4);

        assert!(div_floor_i128(1, 0).is_err());
        assert!(div_ceil_i128(i128::MIN, -1).is_err());
    }

    #[test]
    fn test_checked_i128() {
        assert_eq!(safe_sub_i128(3, 5).unwrap(), -2);
        assert!(safe_mul_i128(i128::MAX, 2).is_err());
        assert!(safe_add_i128(i128::MAX, 1).is_err());
    }
}
