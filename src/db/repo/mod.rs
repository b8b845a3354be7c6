//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `trades.rs` - trade ledger reads and idempotent ingest
//! - `allocations.rs` - allocation version persistence and queries
//! - `runs.rs` - computation log rows
//! - `review.rs` - manual review queue

mod allocations;
mod review;
mod runs;
mod trades;

pub use allocations::VersionScope;
pub use runs::{RunCompletion, RunMode, RunRecord, RunStatus};

use crate::domain::Decimal;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a decimal stored as a canonical string.
///
/// Stored strings are written by this crate, so a parse failure means a
/// corrupt row; degrade to zero with a warning rather than abort a read path.
pub(crate) fn parse_stored_decimal(raw: &str, column: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(
            column = column,
            value = raw,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored_decimal_valid() {
        assert_eq!(
            parse_stored_decimal("1.25", "size").to_canonical_string(),
            "1.25"
        );
    }

    #[test]
    fn test_parse_stored_decimal_corrupt_degrades_to_zero() {
        assert_eq!(parse_stored_decimal("not-a-number", "size"), Decimal::zero());
    }
}
