/// Investor orders pending inside an epoch

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use std::fmt;

use crate::serde_helpers::pubkey_serde;
use crate::{Amount, ProtocolError, ProtocolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tranche {
    Senior,
    Junior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Supply,
    Redeem,
}

impl fmt::Display for Tranche {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tranche::Senior => write!(f, "senior"),
            Tranche::Junior => write!(f, "junior"),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Supply => write!(f, "supply"),
            OrderSide::Redeem => write!(f, "redeem"),
        }
    }
}

/// A pending supply or redeem intent for one tranche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(with = "pubkey_serde")]
    pub investor: Pubkey,
    pub tranche: Tranche,
    pub side: OrderSide,
    pub amount: Amount,
}

/// Orders captured with an epoch snapshot, in the order the chain returned them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    orders: Vec<Order>,
}

impl OrderBook {
    /// Build a book, dropping zero-amount intents
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            orders: orders.into_iter().filter(|o| o.amount > 0).collect(),
        }
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Orders of one tranche and side, keeping book order
    pub fn bucket(&self, tranche: Tranche, side: OrderSide) -> impl Iterator<Item = &Order> {
        self.orders
            .iter()
            .filter(move |o| o.tranche == tranche && o.side == side)
    }

    /// Total requested amount of one tranche and side
    pub fn total(&self, tranche: Tranche, side: OrderSide) -> ProtocolResult<Amount> {
        self.bucket(tranche, side).try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount).ok_or_else(|| {
                ProtocolError::math_overflow(
                    "order book total",
                    &[&format!("{} {}", tranche, side), &acc.to_string(), &o.amount.to_string()],
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(tranche: Tranche, side: OrderSide, amount: Amount) -> Order {
        Order {
            investor: Pubkey::new_unique(),
            tranche,
            side,
            amount,
        }
    }

    #[test]
    fn test_book_drops_empty_orders() {
        let book = OrderBook::new(vec![
            order(Tranche::Senior, OrderSide::Supply, 0),
            order(Tranche::Senior, OrderSide::Supply, 10),
        ]);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_bucket_totals() {
        let book = OrderBook::new(vec![
            order(Tranche::Senior, OrderSide::Supply, 10),
            order(Tranche::Junior, OrderSide::Redeem, 7),
            order(Tranche::Senior, OrderSide::Supply, 5),
        ]);
        assert_eq!(book.total(Tranche::Senior, OrderSide::Supply).unwrap(), 15);
        assert_eq!(book.total(Tranche::Junior, OrderSide::Redeem).unwrap(), 7);
        assert_eq!(book.total(Tranche::Junior, OrderSide::Supply).unwrap(), 0);
    }

    #[test]
    fn test_bucket_total_overflow() {
        let book = OrderBook::new(vec![
            order(Tranche::Junior, OrderSide::Supply, u64::MAX),
            order(Tranche::Junior, OrderSide::Supply, 1),
        ]);
        assert!(matches!(
            book.total(Tranche::Junior, OrderSide::Supply),
            Err(ProtocolError::MathOverflow { .. })
        ));
    }
}
