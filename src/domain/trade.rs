//! TradeRecord: one executed trade in the immutable ledger.

use crate::domain::{Decimal, OrderId, Side, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// A settled trade fact from the exchange ledger.
///
/// Rows are append-only: the allocation engine reads them and never mutates
/// or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unique exchange order identifier.
    pub order_id: OrderId,
    /// Trading pair the order executed on.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Executed base-asset quantity (>= 0).
    pub size: Decimal,
    /// Execution price in USD (> 0).
    pub price: Decimal,
    /// Total fees charged for the order, in USD (>= 0).
    pub total_fees_usd: Decimal,
    /// Settlement time.
    pub order_time: TimeMs,
}

impl TradeRecord {
    /// Fees attributable to one unit of the traded asset.
    ///
    /// Zero when `size` is zero, so a degenerate ledger row cannot divide by
    /// zero downstream.
    pub fn fees_per_unit(&self) -> Decimal {
        if self.size.is_zero() {
            Decimal::zero()
        } else {
            self.total_fees_usd / self.size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn trade(size: &str, fees: &str) -> TradeRecord {
        TradeRecord {
            order_id: OrderId::new("ord-1"),
            symbol: Symbol::new("BTC-USD"),
            side: Side::Buy,
            size: Decimal::from_str(size).unwrap(),
            price: Decimal::from_str("100").unwrap(),
            total_fees_usd: Decimal::from_str(fees).unwrap(),
            order_time: TimeMs::new(1000),
        }
    }

    #[test]
    fn test_fees_per_unit() {
        let t = trade("2", "1");
        assert_eq!(t.fees_per_unit().to_canonical_string(), "0.5");
    }

    #[test]
    fn test_fees_per_unit_zero_size() {
        let t = trade("0", "1");
        assert_eq!(t.fees_per_unit(), Decimal::zero());
    }

    #[test]
    fn test_trade_serialization_roundtrip() {
        let t = trade("1.5", "0.25");
        let json = serde_json::to_string(&t).unwrap();
        let back: TradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
