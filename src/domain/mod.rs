//! Domain types for FIFO lot accounting.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, OrderId, Symbol, Side
//! - TradeRecord ledger facts and FifoAllocation results
//! - Manual review queue contracts

pub mod allocation;
pub mod decimal;
pub mod primitives;
pub mod review;
pub mod trade;

pub use allocation::{AllocationKind, FifoAllocation};
pub use decimal::Decimal;
pub use primitives::{OrderId, Side, Symbol, TimeMs};
pub use review::{ManualReviewItem, ReviewStatus, Severity, ISSUE_UNMATCHED_SELL};
pub use trade::TradeRecord;
