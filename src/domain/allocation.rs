//! FifoAllocation: how much of one sell was satisfied by one buy.

use crate::domain::{Decimal, OrderId, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The buy-side half of an allocation.
///
/// Matched-only fields (buy price, cost basis, realized PnL, buy time) live
/// inside the `Matched` variant so they cannot be read off an unmatched
/// remainder row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AllocationKind {
    Matched {
        buy_order_id: OrderId,
        buy_price: Decimal,
        buy_fees_per_unit: Decimal,
        cost_basis_usd: Decimal,
        pnl_usd: Decimal,
        buy_time: TimeMs,
    },
    /// Leftover sell quantity no eligible buy inventory could cover.
    Unmatched,
}

/// One row of a computed allocation version.
///
/// Identity is `(sell_order_id, buy_order_id, allocation_version)`; the
/// unmatched remainder carries a null buy side. Rows for a version are
/// deleted en masse and regenerated on recompute, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoAllocation {
    pub sell_order_id: OrderId,
    pub symbol: Symbol,
    /// Quantity of the sell satisfied by this row (> 0).
    pub allocated_size: Decimal,
    pub sell_price: Decimal,
    pub sell_fees_per_unit: Decimal,
    /// `sell_price * allocated_size`.
    pub proceeds_usd: Decimal,
    /// Proceeds net of the sell fees attributable to this slice.
    pub net_proceeds_usd: Decimal,
    pub sell_time: TimeMs,
    pub allocation_version: i64,
    /// Groups every row produced by one engine invocation.
    pub allocation_batch_id: Uuid,
    pub notes: Option<String>,
    pub kind: AllocationKind,
}

impl FifoAllocation {
    pub fn is_matched(&self) -> bool {
        matches!(self.kind, AllocationKind::Matched { .. })
    }

    pub fn buy_order_id(&self) -> Option<&OrderId> {
        match &self.kind {
            AllocationKind::Matched { buy_order_id, .. } => Some(buy_order_id),
            AllocationKind::Unmatched => None,
        }
    }

    pub fn buy_price(&self) -> Option<Decimal> {
        match &self.kind {
            AllocationKind::Matched { buy_price, .. } => Some(*buy_price),
            AllocationKind::Unmatched => None,
        }
    }

    pub fn buy_fees_per_unit(&self) -> Option<Decimal> {
        match &self.kind {
            AllocationKind::Matched {
                buy_fees_per_unit, ..
            } => Some(*buy_fees_per_unit),
            AllocationKind::Unmatched => None,
        }
    }

    pub fn cost_basis_usd(&self) -> Option<Decimal> {
        match &self.kind {
            AllocationKind::Matched { cost_basis_usd, .. } => Some(*cost_basis_usd),
            AllocationKind::Unmatched => None,
        }
    }

    pub fn pnl_usd(&self) -> Option<Decimal> {
        match &self.kind {
            AllocationKind::Matched { pnl_usd, .. } => Some(*pnl_usd),
            AllocationKind::Unmatched => None,
        }
    }

    pub fn buy_time(&self) -> Option<TimeMs> {
        match &self.kind {
            AllocationKind::Matched { buy_time, .. } => Some(*buy_time),
            AllocationKind::Unmatched => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn matched() -> FifoAllocation {
        FifoAllocation {
            sell_order_id: OrderId::new("sell-1"),
            symbol: Symbol::new("BTC-USD"),
            allocated_size: Decimal::from_str("1").unwrap(),
            sell_price: Decimal::from_str("120").unwrap(),
            sell_fees_per_unit: Decimal::from_str("0.1").unwrap(),
            proceeds_usd: Decimal::from_str("120").unwrap(),
            net_proceeds_usd: Decimal::from_str("119.9").unwrap(),
            sell_time: TimeMs::new(2000),
            allocation_version: 1,
            allocation_batch_id: Uuid::nil(),
            notes: None,
            kind: AllocationKind::Matched {
                buy_order_id: OrderId::new("buy-1"),
                buy_price: Decimal::from_str("100").unwrap(),
                buy_fees_per_unit: Decimal::from_str("0.05").unwrap(),
                cost_basis_usd: Decimal::from_str("100.05").unwrap(),
                pnl_usd: Decimal::from_str("19.85").unwrap(),
                buy_time: TimeMs::new(1000),
            },
        }
    }

    #[test]
    fn test_matched_accessors() {
        let a = matched();
        assert!(a.is_matched());
        assert_eq!(a.buy_order_id().unwrap().as_str(), "buy-1");
        assert_eq!(a.buy_time(), Some(TimeMs::new(1000)));
        assert_eq!(
            a.pnl_usd().unwrap().to_canonical_string(),
            "19.85"
        );
    }

    #[test]
    fn test_unmatched_has_no_buy_fields() {
        let mut a = matched();
        a.kind = AllocationKind::Unmatched;
        assert!(!a.is_matched());
        assert!(a.buy_order_id().is_none());
        assert!(a.buy_price().is_none());
        assert!(a.cost_basis_usd().is_none());
        assert!(a.pnl_usd().is_none());
        assert!(a.buy_time().is_none());
    }

    #[test]
    fn test_allocation_serialization_roundtrip() {
        let a = matched();
        let json = serde_json::to_string(&a).unwrap();
        let back: FifoAllocation = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
