//! Epoch settlement solver.
//!
//! The decision variables are the fulfilled amounts of the four order
//! buckets. Every pool constraint is affine in those amounts, so each one is
//! kept as an exact `i128` inequality and checked without division. Junior
//! ratio bounds are compared by cross-multiplying with `RATIO_SCALE`.
//!
//! The search only ever moves between feasible points:
//!
//! 1. Full fulfillment is returned when it is feasible.
//! 2. Otherwise the search starts at zero fulfillment. When zero itself breaks
//!    a constraint, an exact search over the reserve and junior movements
//!    finds a feasible starting point, or proves there is none.
//! 3. Coordinate ascent raises each bucket, in priority order, to the top of
//!    its exact feasible interval. Pair ascent then raises a bucket as far as
//!    a lower-priority bucket can still be adjusted to stay feasible.
//! 4. Bucket fills are split over their orders pro rata.
//!
//! The result is always feasible. It is not guaranteed to be the optimum of
//! the underlying linear program.

use tranche_math::{
    div_ceil_i128, div_floor_i128, first_bracketed, mul_div_rem, ratio_of, safe_add_i128, safe_mul_i128,
    safe_sub_i128, to_u64,
};
use tranche_types::{
    Amount, Constraint, EpochSnapshot, Infeasibility, OrderFill, OrderSide, ProtocolError, ProtocolResult,
    SettlementPlan, SolveOutcome, Tranche, TrancheFill, TrancheParams, RATIO_SCALE,
};

/// An order bucket, one decision variable of the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    SeniorRedeem,
    JuniorRedeem,
    JuniorSupply,
    SeniorSupply,
}

/// Buckets in fulfillment priority order
pub const PRIORITY: [Bucket; 4] = [
    Bucket::SeniorRedeem,
    Bucket::JuniorRedeem,
    Bucket::JuniorSupply,
    Bucket::SeniorSupply,
];

const MAX_PASSES: usize = 8;

impl Bucket {
    fn index(self) -> usize {
        self as usize
    }

    pub fn tranche(self) -> Tranche {
        match self {
            Bucket::SeniorRedeem | Bucket::SeniorSupply => Tranche::Senior,
            Bucket::JuniorRedeem | Bucket::JuniorSupply => Tranche::Junior,
        }
    }

    pub fn side(self) -> OrderSide {
        match self {
            Bucket::SeniorSupply | Bucket::JuniorSupply => OrderSide::Supply,
            Bucket::SeniorRedeem | Bucket::JuniorRedeem => OrderSide::Redeem,
        }
    }
}

/// Fulfilled amount per bucket, indexed by `Bucket::index`
type Point = [i128; 4];

// Effect of each bucket on reserve, junior value and senior value
const RESERVE_DELTA: Point = [-1, -1, 1, 1];
const JUNIOR_DELTA: Point = [0, -1, 1, 0];
const SENIOR_DELTA: Point = [-1, 0, 0, 1];

/// `constant + sum(coeffs[i] * x[i]) >= 0`
#[derive(Debug, Clone)]
struct Inequality {
    constraint: Constraint,
    constant: i128,
    coeffs: Point,
}

impl Inequality {
    fn new(constraint: Constraint, constant: i128, coeffs: Point) -> Self {
        Self {
            constraint,
            constant,
            coeffs,
        }
    }

    fn value(&self, x: &Point) -> ProtocolResult<i128> {
        let mut acc = self.constant;
        for (coeff, amount) in self.coeffs.iter().zip(x.iter()) {
            acc = safe_add_i128(acc, safe_mul_i128(*coeff, *amount)?)?;
        }
        Ok(acc)
    }
}

/// `(slope * c + offset) / den` as a bound on the junior movement, where `c`
/// is the reserve movement. Lower bounds round up, upper bounds round down.
#[derive(Debug, Clone, Copy)]
struct Line {
    slope: i128,
    offset: i128,
    den: i128,
}

impl Line {
    fn whole(slope: i128, offset: i128) -> Self {
        Self { slope, offset, den: 1 }
    }
}

/// Linear model of one pool's settlement
#[derive(Debug, Clone)]
struct PoolModel {
    inequalities: Vec<Inequality>,
    requested: Point,
    reserve: i128,
    junior: i128,
    senior: i128,
    total: i128,
    min_ratio: i128,
    max_ratio: i128,
    max_reserve: i128,
}

impl PoolModel {
    fn new(snapshot: &EpochSnapshot, params: &TrancheParams) -> ProtocolResult<Self> {
        let book = &snapshot.orders;
        let mut requested = [0i128; 4];
        for bucket in PRIORITY {
            requested[bucket.index()] = book.total(bucket.tranche(), bucket.side())? as i128;
        }

        let scale = RATIO_SCALE as i128;
        let min_ratio = params.min_junior_ratio as i128;
        let max_ratio = params.max_junior_ratio as i128;
        let reserve = snapshot.reserve as i128;
        let total = snapshot.total_value() as i128;
        let senior = snapshot.senior_value() as i128;
        let junior = snapshot.junior_value() as i128;
        let max_reserve = params.max_reserve as i128;

        let mut below_min = [0i128; 4];
        let mut above_max = [0i128; 4];
        for i in 0..4 {
            // junior' * scale - min * total'
            below_min[i] = safe_sub_i128(
                safe_mul_i128(JUNIOR_DELTA[i], scale)?,
                safe_mul_i128(min_ratio, RESERVE_DELTA[i])?,
            )?;
            // max * total' - junior' * scale
            above_max[i] = safe_sub_i128(
                safe_mul_i128(max_ratio, RESERVE_DELTA[i])?,
                safe_mul_i128(JUNIOR_DELTA[i], scale)?,
            )?;
        }

        let junior_scaled = safe_mul_i128(junior, scale)?;
        let inequalities = vec![
            Inequality::new(Constraint::ReserveNegative, reserve, RESERVE_DELTA),
            Inequality::new(
                Constraint::ReserveAboveMax,
                safe_sub_i128(max_reserve, reserve)?,
                RESERVE_DELTA.map(|c| -c),
            ),
            Inequality::new(
                Constraint::JuniorRatioBelowMin,
                safe_sub_i128(junior_scaled, safe_mul_i128(min_ratio, total)?)?,
                below_min,
            ),
            Inequality::new(
                Constraint::JuniorRatioAboveMax,
                safe_sub_i128(safe_mul_i128(max_ratio, total)?, junior_scaled)?,
                above_max,
            ),
            Inequality::new(Constraint::SeniorOverdrawn, senior, SENIOR_DELTA),
            Inequality::new(Constraint::JuniorOverdrawn, junior, JUNIOR_DELTA),
        ];

        Ok(Self {
            inequalities,
            requested,
            reserve,
            junior,
            senior,
            total,
            min_ratio,
            max_ratio,
            max_reserve,
        })
    }

    fn violations(&self, x: &Point) -> ProtocolResult<Vec<Constraint>> {
        let mut broken = Vec::new();
        for inequality in &self.inequalities {
            if inequality.value(x)? < 0 {
                broken.push(inequality.constraint);
            }
        }
        Ok(broken)
    }

    fn is_feasible(&self, x: &Point) -> ProtocolResult<bool> {
        for (i, amount) in x.iter().enumerate() {
            if *amount < 0 || *amount > self.requested[i] {
                return Ok(false);
            }
        }
        Ok(self.violations(x)?.is_empty())
    }

    /// Feasible integer range of bucket `b` with the other buckets held at `x`
    fn interval(&self, x: &Point, b: usize) -> ProtocolResult<Option<(i128, i128)>> {
        let mut lo = 0i128;
        let mut hi = self.requested[b];
        let mut base = *x;
        base[b] = 0;

        for inequality in &self.inequalities {
            let a = inequality.value(&base)?;
            let c = inequality.coeffs[b];
            if c == 0 {
                if a < 0 {
                    return Ok(None);
                }
            } else if c > 0 {
                lo = lo.max(div_ceil_i128(safe_sub_i128(0, a)?, c)?);
            } else {
                hi = hi.min(div_floor_i128(a, safe_sub_i128(0, c)?)?);
            }
        }

        if lo > hi {
            Ok(None)
        } else {
            Ok(Some((lo, hi)))
        }
    }

    /// Find a feasible point when zero fulfillment is not one
    fn repair(&self) -> ProtocolResult<Option<Point>> {
        let zero = [0i128; 4];

        for bucket in PRIORITY {
            let b = bucket.index();
            if let Some((_, top)) = self.interval(&zero, b)? {
                let mut point = zero;
                point[b] = top;
                return Ok(Some(point));
            }
        }

        self.lattice_point()
    }

    /// Exact feasibility search.
    ///
    /// Every constraint depends on the fills only through the junior movement
    /// `a = js - jr` and the reserve movement `c = js + ss - sr - jr`, so the
    /// search runs over `(c, a)`. For a fixed `c` each constraint bounds `a`
    /// from one side. Every (lower, upper) pair except the two ratio bounds
    /// reduces to an exact linear condition on `c`. The ratio pair asks for
    /// an integer junior value between `min * total'` and `max * total'`,
    /// which `first_bracketed` answers exactly.
    fn lattice_point(&self) -> ProtocolResult<Option<Point>> {
        let [sr, jr, js, ss] = self.requested;
        let scale = RATIO_SCALE as i128;
        let junior_scaled = safe_mul_i128(self.junior, scale)?;

        // Index 0 of each side is the ratio bound
        let lower = [
            Line {
                slope: self.min_ratio,
                offset: safe_sub_i128(safe_mul_i128(self.min_ratio, self.total)?, junior_scaled)?,
                den: scale,
            },
            Line::whole(0, -self.junior),
            Line::whole(0, -jr),
            Line::whole(1, -ss),
        ];
        let upper = [
            Line {
                slope: self.max_ratio,
                offset: safe_sub_i128(safe_mul_i128(self.max_ratio, self.total)?, junior_scaled)?,
                den: scale,
            },
            Line::whole(1, self.senior),
            Line::whole(0, js),
            Line::whole(1, sr),
        ];

        let mut c_lo = -self.reserve;
        let mut c_hi = safe_sub_i128(self.max_reserve, self.reserve)?;
        for (i, low) in lower.iter().enumerate() {
            for (j, high) in upper.iter().enumerate() {
                if i == 0 && j == 0 {
                    continue;
                }
                // low(c) <= high(c) is exact here: one side is a whole number
                let slope = safe_sub_i128(
                    safe_mul_i128(high.den, low.slope)?,
                    safe_mul_i128(low.den, high.slope)?,
                )?;
                let bound = safe_sub_i128(
                    safe_mul_i128(low.den, high.offset)?,
                    safe_mul_i128(high.den, low.offset)?,
                )?;
                if slope == 0 {
                    if bound < 0 {
                        return Ok(None);
                    }
                } else if slope > 0 {
                    c_hi = c_hi.min(div_floor_i128(bound, slope)?);
                } else {
                    c_lo = c_lo.max(div_ceil_i128(safe_sub_i128(0, bound)?, safe_sub_i128(0, slope)?)?);
                }
            }
        }
        if c_lo > c_hi {
            return Ok(None);
        }

        // total' = total + c is never negative since c >= -reserve
        let from = safe_add_i128(self.total, c_lo)? as u128;
        let to = safe_add_i128(self.total, c_hi)? as u128;
        let Some(total_after) =
            first_bracketed(self.min_ratio as u128, self.max_ratio as u128, scale as u128, from, to)?
        else {
            return Ok(None);
        };
        let c = safe_sub_i128(total_after as i128, self.total)?;

        let mut a = i128::MIN;
        for low in &lower {
            let numerator = safe_add_i128(safe_mul_i128(low.slope, c)?, low.offset)?;
            a = a.max(div_ceil_i128(numerator, low.den)?);
        }
        let b = safe_sub_i128(c, a)?;

        let point = [(-b).max(0), (-a).max(0), a.max(0), b.max(0)];
        if !self.is_feasible(&point)? {
            return Err(ProtocolError::generic("lattice search produced an infeasible point"));
        }
        Ok(Some(point))
    }

    fn coordinate_ascent(&self, x: &mut Point) -> ProtocolResult<()> {
        for bucket in PRIORITY {
            let b = bucket.index();
            if let Some((_, top)) = self.interval(x, b)? {
                if top > x[b] {
                    x[b] = top;
                }
            }
        }
        Ok(())
    }

    /// Raise a bucket past its own interval by letting a lower-priority
    /// bucket move along with it
    fn pair_ascent(&self, x: &mut Point) -> ProtocolResult<()> {
        for (i, first) in PRIORITY.iter().enumerate() {
            for second in &PRIORITY[i + 1..] {
                let (u, v) = (first.index(), second.index());
                if x[u] >= self.requested[u] {
                    continue;
                }

                // x itself is feasible, so `lo` starts on a good value
                let mut lo = x[u];
                let mut hi = self.requested[u];
                while lo < hi {
                    let mid = lo + (hi - lo + 1) / 2;
                    let mut trial = *x;
                    trial[u] = mid;
                    if self.interval(&trial, v)?.is_some() {
                        lo = mid;
                    } else {
                        hi = mid - 1;
                    }
                }

                if lo > x[u] {
                    let mut trial = *x;
                    trial[u] = lo;
                    if let Some((_, top)) = self.interval(&trial, v)? {
                        trial[v] = top;
                        *x = trial;
                    }
                }
            }
        }
        Ok(())
    }

    fn plan(&self, snapshot: &EpochSnapshot, x: Point) -> ProtocolResult<SettlementPlan> {
        let mut reserve_delta = 0i128;
        let mut junior_delta = 0i128;
        for i in 0..4 {
            reserve_delta = safe_add_i128(reserve_delta, safe_mul_i128(RESERVE_DELTA[i], x[i])?)?;
            junior_delta = safe_add_i128(junior_delta, safe_mul_i128(JUNIOR_DELTA[i], x[i])?)?;
        }
        let new_reserve = safe_add_i128(self.reserve, reserve_delta)?;
        let new_total = safe_add_i128(self.total, reserve_delta)?;
        let new_junior = safe_add_i128(self.junior, junior_delta)?;
        if new_reserve < 0 || new_total < 0 || new_junior < 0 {
            return Err(ProtocolError::math_underflow(
                "settlement plan",
                &[&new_reserve.to_string(), &new_total.to_string(), &new_junior.to_string()],
            ));
        }

        let amount = |b: Bucket| to_u64(x[b.index()] as u128, "bucket fill");
        let senior = TrancheFill {
            supply: amount(Bucket::SeniorSupply)?,
            redeem: amount(Bucket::SeniorRedeem)?,
        };
        let junior = TrancheFill {
            supply: amount(Bucket::JuniorSupply)?,
            redeem: amount(Bucket::JuniorRedeem)?,
        };

        Ok(SettlementPlan {
            epoch_id: snapshot.epoch_id,
            senior,
            junior,
            fills: distribute(snapshot, &x)?,
            new_reserve: to_u64(new_reserve as u128, "new reserve")?,
            new_junior_ratio: ratio_of(new_junior as u128, new_total as u128)?,
        })
    }
}

/// Split each bucket fill over its orders pro rata by requested amount.
///
/// Largest-remainder rounding, ties to the earlier order. Per-order fills sum
/// exactly to the bucket fill and never exceed the order.
fn distribute(snapshot: &EpochSnapshot, x: &Point) -> ProtocolResult<Vec<OrderFill>> {
    let orders = snapshot.orders.orders();
    let mut fulfilled: Vec<Amount> = vec![0; orders.len()];

    for bucket in PRIORITY {
        let fill = x[bucket.index()] as u128;
        let members: Vec<usize> = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.tranche == bucket.tranche() && o.side == bucket.side())
            .map(|(i, _)| i)
            .collect();
        let requested: u128 = members.iter().map(|&i| orders[i].amount as u128).sum();
        if fill == 0 || requested == 0 {
            continue;
        }

        let mut assigned = 0u128;
        let mut remainders = Vec::with_capacity(members.len());
        for &i in &members {
            let (share, rem) = mul_div_rem(orders[i].amount as u128, fill, requested)?;
            fulfilled[i] = to_u64(share, "order fill")?;
            assigned += share;
            remainders.push((rem, i));
        }

        // Stable sort keeps book order among equal remainders
        remainders.sort_by(|a, b| b.0.cmp(&a.0));
        let leftover = fill - assigned;
        for &(rem, i) in remainders.iter().take(leftover as usize) {
            if rem > 0 {
                fulfilled[i] += 1;
            }
        }
    }

    Ok(orders
        .iter()
        .zip(fulfilled)
        .map(|(order, fulfilled)| OrderFill {
            investor: order.investor,
            tranche: order.tranche,
            side: order.side,
            requested: order.amount,
            fulfilled,
        })
        .collect())
}

/// Solve an epoch's pending orders against the pool's tranche parameters.
///
/// `Infeasible` is a normal outcome: no settlement, not even zero
/// fulfillment, satisfies every constraint the solver can reach.
/// Arithmetic overflow is an error.
pub fn solve(snapshot: &EpochSnapshot, params: &TrancheParams) -> ProtocolResult<SolveOutcome> {
    params.validate()?;
    let model = PoolModel::new(snapshot, params)?;

    if model.is_feasible(&model.requested)? {
        return model.plan(snapshot, model.requested).map(SolveOutcome::Feasible);
    }

    let zero = [0i128; 4];
    let mut x = zero;
    if !model.is_feasible(&zero)? {
        match model.repair()? {
            Some(point) => x = point,
            None => {
                return Ok(SolveOutcome::Infeasible(Infeasibility {
                    violations: model.violations(&zero)?,
                }))
            }
        }
    }

    for _ in 0..MAX_PASSES {
        let before = x;
        model.coordinate_ascent(&mut x)?;
        model.pair_ascent(&mut x)?;
        if x == before {
            break;
        }
    }

    if !model.is_feasible(&x)? {
        return Err(ProtocolError::generic("solver left the feasible region"));
    }

    model.plan(snapshot, x).map(SolveOutcome::Feasible)
}
