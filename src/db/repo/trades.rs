//! Trade ledger operations for the repository.
//!
//! The ledger is append-only: the engine only reads it. Idempotent ingest is
//! kept for reconciliation backfill and test seeding.

use crate::domain::{OrderId, Side, Symbol, TimeMs, TradeRecord};
use sqlx::Row;
use tracing::warn;

use super::{parse_stored_decimal, Repository};

impl Repository {
    /// Insert a trade into the ledger idempotently, keyed by `order_id`.
    ///
    /// Returns false when the order id was already present.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_trade(&self, trade: &TradeRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_records (
                order_id, symbol, side, size, price, total_fees_usd,
                order_time_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO NOTHING
            "#,
        )
        .bind(trade.order_id.as_str())
        .bind(trade.symbol.as_str())
        .bind(trade.side.to_string())
        .bind(trade.size.to_canonical_string())
        .bind(trade.price.to_canonical_string())
        .bind(trade.total_fees_usd.to_canonical_string())
        .bind(trade.order_time.as_i64())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert multiple trades in a single transaction.
    ///
    /// Returns the number of newly inserted trades (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_trades_batch(&self, trades: &[TradeRecord]) -> Result<usize, sqlx::Error> {
        if trades.is_empty() {
            return Ok(0);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut total_inserted = 0usize;
        let mut tx = self.pool().begin().await?;

        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT INTO trade_records (
                    order_id, symbol, side, size, price, total_fees_usd,
                    order_time_ms, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(order_id) DO NOTHING
                "#,
            )
            .bind(trade.order_id.as_str())
            .bind(trade.symbol.as_str())
            .bind(trade.side.to_string())
            .bind(trade.size.to_canonical_string())
            .bind(trade.price.to_canonical_string())
            .bind(trade.total_fees_usd.to_canonical_string())
            .bind(trade.order_time.as_i64())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// All distinct symbols present in the ledger, sorted for stable iteration.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_distinct_symbols(&self) -> Result<Vec<Symbol>, sqlx::Error> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM trade_records ORDER BY symbol ASC")
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .iter()
            .map(|row| Symbol::new(row.get::<String, _>("symbol")))
            .collect())
    }

    /// Trades for one symbol and side, in FIFO order `(order_time, order_id)`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_trades(
        &self,
        symbol: &Symbol,
        side: Side,
    ) -> Result<Vec<TradeRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, symbol, side, size, price, total_fees_usd, order_time_ms
            FROM trade_records
            WHERE symbol = ? AND side = ?
            ORDER BY order_time_ms ASC, order_id ASC
            "#,
        )
        .bind(symbol.as_str())
        .bind(side.to_string())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(decode_trade_row).collect())
    }

    /// Every sell in the ledger, across all symbols, in FIFO order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_all_sells(&self) -> Result<Vec<TradeRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, symbol, side, size, price, total_fees_usd, order_time_ms
            FROM trade_records
            WHERE side = 'sell'
            ORDER BY symbol ASC, order_time_ms ASC, order_id ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(decode_trade_row).collect())
    }

    /// Count ledger rows for one side.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_trades(&self, side: Side) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trade_records WHERE side = ?")
            .bind(side.to_string())
            .fetch_one(self.pool())
            .await?;
        Ok(row.get("n"))
    }
}

fn decode_trade_row(row: &sqlx::sqlite::SqliteRow) -> TradeRecord {
    let side_raw: String = row.get("side");
    let side = Side::parse(&side_raw).unwrap_or_else(|| {
        warn!(side = %side_raw, "Unknown trade side in ledger, treating as buy");
        Side::Buy
    });

    let size_raw: String = row.get("size");
    let price_raw: String = row.get("price");
    let fees_raw: String = row.get("total_fees_usd");

    TradeRecord {
        order_id: OrderId::new(row.get::<String, _>("order_id")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        side,
        size: parse_stored_decimal(&size_raw, "size"),
        price: parse_stored_decimal(&price_raw, "price"),
        total_fees_usd: parse_stored_decimal(&fees_raw, "total_fees_usd"),
        order_time: TimeMs::new(row.get::<i64, _>("order_time_ms")),
    }
}
