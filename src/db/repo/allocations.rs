//! Allocation version persistence and queries for the repository.

use crate::domain::{
    AllocationKind, FifoAllocation, ManualReviewItem, OrderId, Symbol, TimeMs,
};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use super::{parse_stored_decimal, Repository, RunCompletion};

/// Which slice of a version a recomputation replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScope<'a> {
    /// Replace every row of the version.
    AllSymbols,
    /// Replace only one symbol's rows, leaving the rest of the version intact.
    Symbol(&'a Symbol),
}

impl Repository {
    /// Replace a version (or one symbol's slice of it) in a single
    /// transaction: delete existing rows, insert the freshly computed
    /// allocations, upsert review items, and mark the computation-log row
    /// completed. Any failure rolls the whole transaction back, so a version
    /// is never observable half-rebuilt.
    ///
    /// # Errors
    /// Returns an error if any statement or the commit fails.
    pub async fn persist_computation(
        &self,
        scope: VersionScope<'_>,
        version: i64,
        allocations: &[FifoAllocation],
        review_items: &[ManualReviewItem],
        log_id: i64,
        completion: &RunCompletion,
    ) -> Result<(), sqlx::Error> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool().begin().await?;

        match scope {
            VersionScope::AllSymbols => {
                sqlx::query("DELETE FROM fifo_allocations WHERE allocation_version = ?")
                    .bind(version)
                    .execute(&mut *tx)
                    .await?;
            }
            VersionScope::Symbol(symbol) => {
                sqlx::query(
                    "DELETE FROM fifo_allocations WHERE allocation_version = ? AND symbol = ?",
                )
                .bind(version)
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        for allocation in allocations {
            sqlx::query(
                r#"
                INSERT INTO fifo_allocations (
                    sell_order_id, buy_order_id, symbol, allocated_size,
                    buy_price, sell_price, buy_fees_per_unit, sell_fees_per_unit,
                    cost_basis_usd, proceeds_usd, net_proceeds_usd, pnl_usd,
                    buy_time_ms, sell_time_ms, allocation_version,
                    allocation_batch_id, notes, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(allocation.sell_order_id.as_str())
            .bind(allocation.buy_order_id().map(|id| id.as_str().to_string()))
            .bind(allocation.symbol.as_str())
            .bind(allocation.allocated_size.to_canonical_string())
            .bind(allocation.buy_price().map(|d| d.to_canonical_string()))
            .bind(allocation.sell_price.to_canonical_string())
            .bind(
                allocation
                    .buy_fees_per_unit()
                    .map(|d| d.to_canonical_string()),
            )
            .bind(allocation.sell_fees_per_unit.to_canonical_string())
            .bind(allocation.cost_basis_usd().map(|d| d.to_canonical_string()))
            .bind(allocation.proceeds_usd.to_canonical_string())
            .bind(allocation.net_proceeds_usd.to_canonical_string())
            .bind(allocation.pnl_usd().map(|d| d.to_canonical_string()))
            .bind(allocation.buy_time().map(|t| t.as_i64()))
            .bind(allocation.sell_time.as_i64())
            .bind(allocation.allocation_version)
            .bind(allocation.allocation_batch_id.to_string())
            .bind(allocation.notes.as_deref())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        // Conflict keeps the operator-owned status and severity; only the
        // description and timestamp refresh on recompute.
        for item in review_items {
            sqlx::query(
                r#"
                INSERT INTO manual_review_queue (
                    order_id, issue_type, severity, status, description,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(order_id, issue_type) DO UPDATE SET
                    description = excluded.description,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(item.order_id.as_str())
            .bind(item.issue_type.as_str())
            .bind(item.severity.to_string())
            .bind(item.status.to_string())
            .bind(item.description.as_str())
            .bind(item.created_at.as_i64())
            .bind(item.updated_at.as_i64())
            .execute(&mut *tx)
            .await?;
        }

        let symbols_json = serde_json::to_string(
            &completion
                .symbols
                .iter()
                .map(|s| s.as_str().to_string())
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize symbol list for computation log");
            "[]".to_string()
        });

        sqlx::query(
            r#"
            UPDATE computation_log
            SET status = 'completed', ended_at_ms = ?, duration_ms = ?,
                buys_processed = ?, sells_processed = ?, allocations_created = ?,
                symbols = ?, total_pnl_usd = ?
            WHERE id = ?
            "#,
        )
        .bind(completion.ended_at.as_i64())
        .bind(completion.duration_ms)
        .bind(completion.buys_processed)
        .bind(completion.sells_processed)
        .bind(completion.allocations_created)
        .bind(symbols_json)
        .bind(completion.total_pnl_usd.to_canonical_string())
        .bind(log_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Count allocation rows for a version, optionally scoped to one symbol.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_allocations(
        &self,
        version: i64,
        symbol: Option<&Symbol>,
    ) -> Result<i64, sqlx::Error> {
        let row = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT COUNT(*) AS n FROM fifo_allocations
                    WHERE allocation_version = ? AND symbol = ?
                    "#,
                )
                .bind(version)
                .bind(symbol.as_str())
                .fetch_one(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS n FROM fifo_allocations WHERE allocation_version = ?",
                )
                .bind(version)
                .fetch_one(self.pool())
                .await?
            }
        };

        Ok(row.get("n"))
    }

    /// All allocation rows for a version, in deterministic order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_allocations_for_version(
        &self,
        version: i64,
    ) -> Result<Vec<FifoAllocation>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT sell_order_id, buy_order_id, symbol, allocated_size,
                   buy_price, sell_price, buy_fees_per_unit, sell_fees_per_unit,
                   cost_basis_usd, proceeds_usd, net_proceeds_usd, pnl_usd,
                   buy_time_ms, sell_time_ms, allocation_version,
                   allocation_batch_id, notes
            FROM fifo_allocations
            WHERE allocation_version = ?
            ORDER BY symbol ASC, sell_time_ms ASC, sell_order_id ASC, id ASC
            "#,
        )
        .bind(version)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(decode_allocation_row).collect())
    }
}

fn decode_allocation_row(row: &sqlx::sqlite::SqliteRow) -> FifoAllocation {
    let batch_raw: String = row.get("allocation_batch_id");
    let batch_id = Uuid::parse_str(&batch_raw).unwrap_or_else(|e| {
        warn!(batch_id = %batch_raw, error = %e, "Failed to parse stored batch id, using nil");
        Uuid::nil()
    });

    let kind = match row.get::<Option<String>, _>("buy_order_id") {
        Some(buy_order_id) => AllocationKind::Matched {
            buy_order_id: OrderId::new(buy_order_id),
            buy_price: decode_matched_decimal(row, "buy_price"),
            buy_fees_per_unit: decode_matched_decimal(row, "buy_fees_per_unit"),
            cost_basis_usd: decode_matched_decimal(row, "cost_basis_usd"),
            pnl_usd: decode_matched_decimal(row, "pnl_usd"),
            buy_time: TimeMs::new(row.get::<Option<i64>, _>("buy_time_ms").unwrap_or_else(
                || {
                    warn!("Matched allocation row missing buy_time_ms, using 0");
                    0
                },
            )),
        },
        None => AllocationKind::Unmatched,
    };

    let allocated_raw: String = row.get("allocated_size");
    let sell_price_raw: String = row.get("sell_price");
    let sell_fees_raw: String = row.get("sell_fees_per_unit");
    let proceeds_raw: String = row.get("proceeds_usd");
    let net_proceeds_raw: String = row.get("net_proceeds_usd");

    FifoAllocation {
        sell_order_id: OrderId::new(row.get::<String, _>("sell_order_id")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        allocated_size: parse_stored_decimal(&allocated_raw, "allocated_size"),
        sell_price: parse_stored_decimal(&sell_price_raw, "sell_price"),
        sell_fees_per_unit: parse_stored_decimal(&sell_fees_raw, "sell_fees_per_unit"),
        proceeds_usd: parse_stored_decimal(&proceeds_raw, "proceeds_usd"),
        net_proceeds_usd: parse_stored_decimal(&net_proceeds_raw, "net_proceeds_usd"),
        sell_time: TimeMs::new(row.get::<i64, _>("sell_time_ms")),
        allocation_version: row.get("allocation_version"),
        allocation_batch_id: batch_id,
        notes: row.get("notes"),
        kind,
    }
}

/// A matched row must carry all buy-side columns; a null one is a corrupt
/// row, degraded to zero with a warning.
fn decode_matched_decimal(row: &sqlx::sqlite::SqliteRow, column: &str) -> crate::domain::Decimal {
    match row.get::<Option<String>, _>(column) {
        Some(raw) => parse_stored_decimal(&raw, column),
        None => {
            warn!(column = column, "Matched allocation row missing column, using default");
            crate::domain::Decimal::default()
        }
    }
}
