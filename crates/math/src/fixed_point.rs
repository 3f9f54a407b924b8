/// WAD fixed-point helpers for ratios and display formatting

use tranche_types::{ProtocolError, ProtocolResult, Ratio, BPS_DENOMINATOR, RATIO_SCALE};
use crate::safe::*;

// ============================================================================
// Ratio Construction
// ============================================================================

/// Convert basis points into a WAD ratio
pub fn ratio_from_bps(bps: u64) -> ProtocolResult<Ratio> {
    if bps > BPS_DENOMINATOR {
        return Err(ProtocolError::invalid_parameter(
            "bps",
            &bps.to_string(),
            &format!("at most {}", BPS_DENOMINATOR),
        ));
    }
    Ok(bps * (RATIO_SCALE / BPS_DENOMINATOR))
}

/// `part / whole` as a WAD ratio, rounded down. `None` when `whole` is zero.
pub fn ratio_of(part: u128, whole: u128) -> ProtocolResult<Option<Ratio>> {
    if whole == 0 {
        return Ok(None);
    }
    let scaled = safe_mul_u128(part, RATIO_SCALE as u128)?;
    let ratio = safe_div_u128(scaled, whole)?;
    to_u64(ratio, "ratio_of").map(Some)
}

// ============================================================================
// Proportional Split
// ============================================================================

/// `floor(a * b / c)` together with the remainder of the division
pub fn mul_div_rem(a: u128, b: u128, c: u128) -> ProtocolResult<(u128, u128)> {
    let product = safe_mul_u128(a, b)?;
    if c == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("mul_div: {} * {} / {}", a, b, c),
        });
    }
    Ok((product / c, product % c))
}

// ============================================================================
// Ratio Brackets
// ============================================================================

/// `sum(floor((a * i + b) / m))` over `i` in `0..n`
pub fn floor_sum(mut n: u128, mut m: u128, mut a: u128, mut b: u128) -> ProtocolResult<u128> {
    if m == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("floor_sum: n={} a={} b={}", n, a, b),
        });
    }

    let mut acc = 0u128;
    loop {
        if a >= m {
            // n * (n - 1) / 2 without the intermediate overflow
            let pairs = if n % 2 == 0 {
                safe_mul_u128(n / 2, n.saturating_sub(1))?
            } else {
                safe_mul_u128(n, (n - 1) / 2)?
            };
            acc = safe_add_u128(acc, safe_mul_u128(pairs, a / m)?)?;
            a %= m;
        }
        if b >= m {
            acc = safe_add_u128(acc, safe_mul_u128(n, b / m)?)?;
            b %= m;
        }

        let y_max = safe_add_u128(safe_mul_u128(a, n)?, b)?;
        if y_max < m {
            break;
        }
        n = y_max / m;
        b = y_max % m;
        std::mem::swap(&mut m, &mut a);
    }

    Ok(acc)
}

/// Number of pairs `(t, k)` with `t` in `from..from + n` and
/// `lo * t <= den * k <= hi * t`
fn bracket_hits(lo: u128, hi: u128, den: u128, from: u128, n: u128) -> ProtocolResult<u128> {
    let below_hi = floor_sum(n, den, hi, safe_mul_u128(hi, from)?)?;
    // ceil(lo * t / den) as a floor
    let above_lo = floor_sum(n, den, lo, safe_add_u128(safe_mul_u128(lo, from)?, den - 1)?)?;
    safe_sub_u128(safe_add_u128(below_hi, n)?, above_lo)
}

/// Smallest `t` in `from..=to` for which `[lo * t / den, hi * t / den]`
/// contains an integer, or `None` when no such `t` exists.
///
/// Exact for any width of the bracket, including `lo == hi`.
pub fn first_bracketed(lo: u128, hi: u128, den: u128, from: u128, to: u128) -> ProtocolResult<Option<u128>> {
    if den == 0 {
        return Err(ProtocolError::DivisionByZero {
            context: format!("first_bracketed: [{}, {}] / 0", lo, hi),
        });
    }
    if lo > hi || from > to {
        return Ok(None);
    }

    let span = safe_add_u128(to - from, 1)?;
    if bracket_hits(lo, hi, den, from, span)? == 0 {
        return Ok(None);
    }

    // Hits over a prefix only grow with its length
    let (mut short, mut long) = (1u128, span);
    while short < long {
        let mid = short + (long - short) / 2;
        if bracket_hits(lo, hi, den, from, mid)? > 0 {
            long = mid;
        } else {
            short = mid + 1;
        }
    }

    Ok(Some(from + short - 1))
}

// ============================================================================
// Formatting
// ============================================================================

/// Format a WAD ratio as a percentage with two decimals, e.g. `12.50%`
pub fn format_ratio(ratio: Ratio) -> String {
    // hundredths of a percent
    let basis = (ratio as u128 * BPS_DENOMINATOR as u128) / RATIO_SCALE as u128;
    format!("{}.{:02}%", basis / 100, basis % 100)
}

/// Format a base-unit amount with the currency's decimals, trimming zeros
pub fn format_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let unit = 10u128.pow(decimals as u32);
    let whole = amount as u128 / unit;
    let frac = amount as u128 % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ratio_from_bps() {
        assert_eq!(ratio_from_bps(500).unwrap(), 50_000_000_000_000_000);
        assert_eq!(ratio_from_bps(10_000).unwrap(), RATIO_SCALE);
        assert!(ratio_from_bps(10_001).is_err());
    }

    #[test]
    fn test_ratio_of() {
        assert_eq!(ratio_of(1, 4).unwrap(), Some(RATIO_SCALE / 4));
        assert_eq!(ratio_of(1, 3).unwrap(), Some(333_333_333_333_333_333));
        assert_eq!(ratio_of(5, 0).unwrap(), None);
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(ratio_from_bps(1250).unwrap()), "12.50%");
        assert_eq!(format_ratio(RATIO_SCALE), "100.00%");
        assert_eq!(format_ratio(0), "0.00%");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_500_000, 6), "1.5");
        assert_eq!(format_amount(2_000_000, 6), "2");
        assert_eq!(format_amount(1, 6), "0.000001");
        assert_eq!(format_amount(42, 0), "42");
    }

    #[test]
    fn test_floor_sum() {
        // floor(0/3) + floor(2/3) + floor(4/3) + floor(6/3) + floor(8/3)
        assert_eq!(floor_sum(5, 3, 2, 0).unwrap(), 5);
        assert_eq!(floor_sum(0, 7, 3, 100).unwrap(), 0);
        assert_eq!(floor_sum(4, 1, 0, 9).unwrap(), 36);
        assert!(floor_sum(1, 0, 1, 1).is_err());
    }

    #[test]
    fn test_first_bracketed() {
        // 0.3t..0.35t first holds an integer at t = 3 (0.9..1.05)
        assert_eq!(first_bracketed(30, 35, 100, 1, 50).unwrap(), Some(3));
        // A point bracket needs t to clear the denominator
        assert_eq!(first_bracketed(25, 25, 100, 1, 10).unwrap(), Some(4));
        assert_eq!(first_bracketed(25, 25, 100, 5, 7).unwrap(), None);
        // t = 0 always brackets zero
        assert_eq!(first_bracketed(1, 1, RATIO_SCALE as u128, 0, 5).unwrap(), Some(0));
        assert_eq!(first_bracketed(10, 5, 100, 0, 5).unwrap(), None);
    }

    proptest! {
        #[test]
        fn prop_mul_div_rem_reconstructs(a in any::<u64>(), b in any::<u64>(), c in 1u64..) {
            let (q, r) = mul_div_rem(a as u128, b as u128, c as u128).unwrap();
            prop_assert!(r < c as u128);
            prop_assert_eq!(q * c as u128 + r, a as u128 * b as u128);
        }

        #[test]
        fn prop_first_bracketed_matches_scan(
            lo in 0u128..200,
            width in 0u128..50,
            from in 0u128..300,
            len in 0u128..120,
        ) {
            let hi = lo + width;
            let den = 200u128;
            let to = from + len;
            let scanned = (from..=to).find(|t| (lo * t + den - 1) / den <= hi * t / den);
            prop_assert_eq!(first_bracketed(lo, hi, den, from, to).unwrap(), scanned);
        }
    }
}
