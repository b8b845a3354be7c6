//! Per-symbol FIFO matching of sells against buy inventory.
//!
//! Pure ledger logic with no I/O: the matcher walks sells chronologically,
//! consuming the oldest eligible buy inventory first. A buy is eligible for a
//! sell only when it settled at or before the sell and still has more than
//! dust remaining. Whatever quantity no eligible buy can cover becomes one
//! unmatched allocation plus a manual-review entry.

use crate::domain::{
    AllocationKind, Decimal, FifoAllocation, ManualReviewItem, OrderId, ReviewStatus, Severity,
    Symbol, TimeMs, TradeRecord, ISSUE_UNMATCHED_SELL,
};
use crate::precision::Precision;
use uuid::Uuid;

/// Everything one symbol's matching pass produced.
#[derive(Debug, Clone)]
pub struct SymbolMatchOutcome {
    pub allocations: Vec<FifoAllocation>,
    pub review_items: Vec<ManualReviewItem>,
    pub buys_processed: i64,
    pub sells_processed: i64,
}

/// FIFO matcher over one symbol's buy inventory.
///
/// Callers must supply buys and sells sorted by `(order_time, order_id)`;
/// inventory consumed by an earlier sell is gone for later ones.
pub struct FifoMatcher<'a> {
    symbol: &'a Symbol,
    version: i64,
    batch_id: Uuid,
    queued_at: TimeMs,
    precision: &'a dyn Precision,
    dust: Decimal,
    buys: &'a [TradeRecord],
    remaining: Vec<Decimal>,

    // Outputs accumulated during processing.
    allocations: Vec<FifoAllocation>,
    review_items: Vec<ManualReviewItem>,
}

impl<'a> FifoMatcher<'a> {
    pub fn new(
        buys: &'a [TradeRecord],
        precision: &'a dyn Precision,
        symbol: &'a Symbol,
        version: i64,
        batch_id: Uuid,
        queued_at: TimeMs,
    ) -> Self {
        let dust = precision.dust_threshold(symbol);
        Self {
            symbol,
            version,
            batch_id,
            queued_at,
            precision,
            dust,
            buys,
            remaining: buys.iter().map(|b| b.size).collect(),
            allocations: Vec::new(),
            review_items: Vec::new(),
        }
    }

    /// Allocate one sell against the oldest eligible buy inventory.
    pub fn process_sell(&mut self, sell: &TradeRecord) {
        let mut remaining_sell = sell.size;

        for idx in 0..self.buys.len() {
            if remaining_sell <= self.dust {
                break;
            }
            if self.remaining[idx] <= self.dust {
                continue;
            }
            // A buy that settles after the sell cannot have funded it.
            if self.buys[idx].order_time > sell.order_time {
                continue;
            }

            let allocated = remaining_sell.min(self.remaining[idx]);
            let allocation = self.matched_allocation(idx, sell, allocated);
            self.allocations.push(allocation);
            self.remaining[idx] = self.remaining[idx] - allocated;
            remaining_sell = remaining_sell - allocated;
        }

        if remaining_sell > self.dust {
            let allocation = self.unmatched_allocation(sell, remaining_sell);
            self.allocations.push(allocation);
            let item = self.unmatched_review_item(sell, remaining_sell);
            self.review_items.push(item);
        }
    }

    fn matched_allocation(
        &self,
        buy_idx: usize,
        sell: &TradeRecord,
        allocated: Decimal,
    ) -> FifoAllocation {
        let buy = &self.buys[buy_idx];
        let buy_fees_per_unit = buy.fees_per_unit();
        let sell_fees_per_unit = sell.fees_per_unit();

        // Each USD figure is rounded once, after the full chain, so rounding
        // bias never compounds through intermediate steps.
        let cost_basis = (buy.price + buy_fees_per_unit) * allocated;
        let proceeds = sell.price * allocated;
        let net_proceeds = proceeds - sell_fees_per_unit * allocated;
        let pnl = net_proceeds - cost_basis;

        FifoAllocation {
            sell_order_id: sell.order_id.clone(),
            symbol: self.symbol.clone(),
            allocated_size: allocated,
            sell_price: sell.price,
            sell_fees_per_unit,
            proceeds_usd: self.precision.round_financial(proceeds, self.symbol),
            net_proceeds_usd: self.precision.round_financial(net_proceeds, self.symbol),
            sell_time: sell.order_time,
            allocation_version: self.version,
            allocation_batch_id: self.batch_id,
            notes: None,
            kind: AllocationKind::Matched {
                buy_order_id: buy.order_id.clone(),
                buy_price: buy.price,
                buy_fees_per_unit,
                cost_basis_usd: self.precision.round_financial(cost_basis, self.symbol),
                pnl_usd: self.precision.round_financial(pnl, self.symbol),
                buy_time: buy.order_time,
            },
        }
    }

    fn unmatched_allocation(&self, sell: &TradeRecord, unmatched: Decimal) -> FifoAllocation {
        let sell_fees_per_unit = sell.fees_per_unit();
        let proceeds = sell.price * unmatched;
        let net_proceeds = proceeds - sell_fees_per_unit * unmatched;

        FifoAllocation {
            sell_order_id: sell.order_id.clone(),
            symbol: self.symbol.clone(),
            allocated_size: unmatched,
            sell_price: sell.price,
            sell_fees_per_unit,
            proceeds_usd: self.precision.round_financial(proceeds, self.symbol),
            net_proceeds_usd: self.precision.round_financial(net_proceeds, self.symbol),
            sell_time: sell.order_time,
            allocation_version: self.version,
            allocation_batch_id: self.batch_id,
            notes: Some(format!(
                "{} {} unmatched by prior buy inventory",
                unmatched.to_canonical_string(),
                self.symbol
            )),
            kind: AllocationKind::Unmatched,
        }
    }

    fn unmatched_review_item(&self, sell: &TradeRecord, unmatched: Decimal) -> ManualReviewItem {
        ManualReviewItem {
            order_id: sell.order_id.clone(),
            issue_type: ISSUE_UNMATCHED_SELL.to_string(),
            severity: Severity::Medium,
            status: ReviewStatus::Pending,
            description: format!(
                "Sell {} left {} {} unmatched by prior buy inventory",
                sell.order_id,
                unmatched.to_canonical_string(),
                self.symbol
            ),
            created_at: self.queued_at,
            updated_at: self.queued_at,
        }
    }

    /// Unconsumed inventory for one buy, if the matcher knows it.
    pub fn remaining_inventory(&self, order_id: &OrderId) -> Option<Decimal> {
        self.buys
            .iter()
            .position(|b| &b.order_id == order_id)
            .map(|idx| self.remaining[idx])
    }

    /// Get the accumulated outputs.
    pub fn into_outputs(self) -> (Vec<FifoAllocation>, Vec<ManualReviewItem>) {
        (self.allocations, self.review_items)
    }
}

/// Run the full matching pass for one symbol.
///
/// Buys and sells must already be sorted by `(order_time, order_id)`; the
/// repository's trade queries return them that way.
pub fn match_symbol(
    buys: &[TradeRecord],
    sells: &[TradeRecord],
    precision: &dyn Precision,
    symbol: &Symbol,
    version: i64,
    batch_id: Uuid,
    queued_at: TimeMs,
) -> SymbolMatchOutcome {
    let mut matcher = FifoMatcher::new(buys, precision, symbol, version, batch_id, queued_at);
    for sell in sells {
        matcher.process_sell(sell);
    }
    let (allocations, review_items) = matcher.into_outputs();

    SymbolMatchOutcome {
        allocations,
        review_items,
        buys_processed: buys.len() as i64,
        sells_processed: sells.len() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use crate::precision::DefaultPrecision;
    use std::str::FromStr;

    fn trade(
        order_id: &str,
        side: Side,
        size: &str,
        price: &str,
        fees: &str,
        time_ms: i64,
    ) -> TradeRecord {
        TradeRecord {
            order_id: OrderId::new(order_id),
            symbol: Symbol::new("BTC-USD"),
            side,
            size: Decimal::from_str(size).unwrap(),
            price: Decimal::from_str(price).unwrap(),
            total_fees_usd: Decimal::from_str(fees).unwrap(),
            order_time: TimeMs::new(time_ms),
        }
    }

    fn run(buys: &[TradeRecord], sells: &[TradeRecord]) -> SymbolMatchOutcome {
        let symbol = Symbol::new("BTC-USD");
        match_symbol(
            buys,
            sells,
            &DefaultPrecision,
            &symbol,
            1,
            Uuid::nil(),
            TimeMs::new(0),
        )
    }

    #[test]
    fn test_two_buys_cover_one_sell_in_fifo_order() {
        let buys = vec![
            trade("buy-1", Side::Buy, "1.0", "100", "0", 1000),
            trade("buy-2", Side::Buy, "1.0", "110", "0", 2000),
        ];
        let sells = vec![trade("sell-1", Side::Sell, "1.5", "120", "0", 3000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 2);
        assert!(outcome.review_items.is_empty());

        let first = &outcome.allocations[0];
        assert_eq!(first.buy_order_id().unwrap().as_str(), "buy-1");
        assert_eq!(first.allocated_size.to_canonical_string(), "1");
        assert_eq!(first.cost_basis_usd().unwrap().to_canonical_string(), "100");
        assert_eq!(first.pnl_usd().unwrap().to_canonical_string(), "20");

        let second = &outcome.allocations[1];
        assert_eq!(second.buy_order_id().unwrap().as_str(), "buy-2");
        assert_eq!(second.allocated_size.to_canonical_string(), "0.5");
        assert_eq!(second.cost_basis_usd().unwrap().to_canonical_string(), "55");
        assert_eq!(second.pnl_usd().unwrap().to_canonical_string(), "5");
    }

    #[test]
    fn test_leftover_buy_inventory_survives() {
        let buys = vec![
            trade("buy-1", Side::Buy, "1.0", "100", "0", 1000),
            trade("buy-2", Side::Buy, "1.0", "110", "0", 2000),
        ];
        let sell = trade("sell-1", Side::Sell, "1.5", "120", "0", 3000);

        let symbol = Symbol::new("BTC-USD");
        let mut matcher = FifoMatcher::new(
            &buys,
            &DefaultPrecision,
            &symbol,
            1,
            Uuid::nil(),
            TimeMs::new(0),
        );
        matcher.process_sell(&sell);

        assert_eq!(
            matcher
                .remaining_inventory(&OrderId::new("buy-1"))
                .unwrap()
                .to_canonical_string(),
            "0"
        );
        assert_eq!(
            matcher
                .remaining_inventory(&OrderId::new("buy-2"))
                .unwrap()
                .to_canonical_string(),
            "0.5"
        );
    }

    #[test]
    fn test_unmatched_remainder_flags_review() {
        let buys = vec![trade("buy-1", Side::Buy, "1.0", "100", "0", 1000)];
        let sells = vec![trade("sell-1", Side::Sell, "2.0", "120", "0", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 2);

        let matched = &outcome.allocations[0];
        assert!(matched.is_matched());
        assert_eq!(matched.allocated_size.to_canonical_string(), "1");

        let unmatched = &outcome.allocations[1];
        assert!(!unmatched.is_matched());
        assert_eq!(unmatched.allocated_size.to_canonical_string(), "1");
        assert!(unmatched.cost_basis_usd().is_none());
        assert!(unmatched.buy_time().is_none());
        assert_eq!(
            unmatched.proceeds_usd.to_canonical_string(),
            "120"
        );
        assert!(unmatched.notes.as_deref().unwrap().contains("1 BTC-USD"));

        assert_eq!(outcome.review_items.len(), 1);
        let item = &outcome.review_items[0];
        assert_eq!(item.order_id.as_str(), "sell-1");
        assert_eq!(item.issue_type, ISSUE_UNMATCHED_SELL);
        assert_eq!(item.severity, Severity::Medium);
        assert_eq!(item.status, ReviewStatus::Pending);
    }

    #[test]
    fn test_buy_after_sell_is_never_selected() {
        // Inventory nominally exists, but only after the sell settled.
        let buys = vec![trade("buy-1", Side::Buy, "1.0", "100", "0", 2000)];
        let sells = vec![trade("sell-1", Side::Sell, "1.0", "120", "0", 1000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        assert!(!outcome.allocations[0].is_matched());
        assert_eq!(
            outcome.allocations[0].allocated_size.to_canonical_string(),
            "1"
        );
        assert_eq!(outcome.review_items.len(), 1);
    }

    #[test]
    fn test_no_sells_is_a_noop() {
        let buys = vec![trade("buy-1", Side::Buy, "1.0", "100", "0", 1000)];
        let outcome = run(&buys, &[]);
        assert!(outcome.allocations.is_empty());
        assert!(outcome.review_items.is_empty());
        assert_eq!(outcome.buys_processed, 1);
        assert_eq!(outcome.sells_processed, 0);
    }

    #[test]
    fn test_sub_dust_remainder_is_ignored() {
        let buys = vec![trade("buy-1", Side::Buy, "1.0", "100", "0", 1000)];
        // 5e-9 leftover, below the 1e-8 default dust threshold.
        let sells = vec![trade("sell-1", Side::Sell, "1.000000005", "120", "0", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        assert!(outcome.allocations[0].is_matched());
        assert!(outcome.review_items.is_empty());
    }

    #[test]
    fn test_fees_enter_cost_basis_and_net_proceeds() {
        // Buy: 2 units, $1 total fees -> $0.5/unit. Sell: 1 unit, $0.3 fees.
        let buys = vec![trade("buy-1", Side::Buy, "2.0", "100", "1", 1000)];
        let sells = vec![trade("sell-1", Side::Sell, "1.0", "120", "0.3", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        let a = &outcome.allocations[0];
        assert_eq!(a.cost_basis_usd().unwrap().to_canonical_string(), "100.5");
        assert_eq!(a.proceeds_usd.to_canonical_string(), "120");
        assert_eq!(a.net_proceeds_usd.to_canonical_string(), "119.7");
        assert_eq!(a.pnl_usd().unwrap().to_canonical_string(), "19.2");
    }

    #[test]
    fn test_zero_size_buy_is_skipped() {
        let buys = vec![
            trade("buy-0", Side::Buy, "0", "100", "1", 500),
            trade("buy-1", Side::Buy, "1.0", "100", "0", 1000),
        ];
        let sells = vec![trade("sell-1", Side::Sell, "1.0", "120", "0", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(
            outcome.allocations[0].buy_order_id().unwrap().as_str(),
            "buy-1"
        );
    }

    #[test]
    fn test_equal_times_consume_lower_order_id_first() {
        let buys = vec![
            trade("buy-a", Side::Buy, "1.0", "100", "0", 1000),
            trade("buy-b", Side::Buy, "1.0", "110", "0", 1000),
        ];
        let sells = vec![trade("sell-1", Side::Sell, "0.5", "120", "0", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(
            outcome.allocations[0].buy_order_id().unwrap().as_str(),
            "buy-a"
        );
    }

    #[test]
    fn test_later_sell_sees_depleted_inventory() {
        let buys = vec![trade("buy-1", Side::Buy, "1.0", "100", "0", 1000)];
        let sells = vec![
            trade("sell-1", Side::Sell, "0.75", "110", "0", 2000),
            trade("sell-2", Side::Sell, "0.75", "120", "0", 3000),
        ];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 3);
        // Second sell gets the remaining 0.25, then a 0.5 unmatched remainder.
        assert_eq!(
            outcome.allocations[1].allocated_size.to_canonical_string(),
            "0.25"
        );
        assert!(outcome.allocations[1].is_matched());
        assert_eq!(
            outcome.allocations[2].allocated_size.to_canonical_string(),
            "0.5"
        );
        assert!(!outcome.allocations[2].is_matched());
        assert_eq!(outcome.review_items.len(), 1);
        assert_eq!(outcome.review_items[0].order_id.as_str(), "sell-2");
    }

    #[test]
    fn test_usd_figures_rounded_half_even_once() {
        // price * size yields more than 8 decimal places; the stored figure
        // must be the half-even rounding of the full product.
        let buys = vec![trade("buy-1", Side::Buy, "0.333333335", "3", "0", 1000)];
        let sells = vec![trade("sell-1", Side::Sell, "0.333333335", "3", "0", 2000)];

        let outcome = run(&buys, &sells);
        assert_eq!(outcome.allocations.len(), 1);
        let a = &outcome.allocations[0];
        // 0.333333335 * 3 = 1.000000005 -> 1 under half-even at 8 dp.
        assert_eq!(a.proceeds_usd.to_canonical_string(), "1");
        assert_eq!(a.cost_basis_usd().unwrap().to_canonical_string(), "1");
        assert_eq!(a.pnl_usd().unwrap().to_canonical_string(), "0");
    }
}
