//! Computation log operations for the repository.
//!
//! One row per engine invocation. The `running` row is written before the
//! allocation transaction opens; completion happens inside that transaction
//! and failure is recorded in its own transaction after rollback, so a crash
//! mid-run leaves a `running` row operators must treat as stale.

use crate::domain::{Decimal, Symbol, TimeMs};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use super::{parse_stored_decimal, Repository};

/// Whether a run covered the whole ledger or a single symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    SingleSymbol,
}

impl RunMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(RunMode::Full),
            "single-symbol" => Some(RunMode::SingleSymbol),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::SingleSymbol => write!(f, "single-symbol"),
        }
    }
}

/// Lifecycle state of a computation-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fields written when a run finishes successfully.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub ended_at: TimeMs,
    pub duration_ms: i64,
    pub buys_processed: i64,
    pub sells_processed: i64,
    pub allocations_created: i64,
    pub symbols: Vec<Symbol>,
    pub total_pnl_usd: Decimal,
}

/// One computation-log row read back from the database.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub allocation_version: i64,
    pub batch_id: Uuid,
    pub symbol: Option<Symbol>,
    pub mode: RunMode,
    pub status: RunStatus,
    pub triggered_by: String,
    pub started_at: TimeMs,
    pub ended_at: Option<TimeMs>,
    pub duration_ms: Option<i64>,
    pub buys_processed: Option<i64>,
    pub sells_processed: Option<i64>,
    pub allocations_created: Option<i64>,
    pub symbols: Vec<Symbol>,
    pub total_pnl_usd: Option<Decimal>,
    pub error_message: Option<String>,
}

impl Repository {
    /// Insert a `running` computation-log row and return its id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_run_started(
        &self,
        version: i64,
        batch_id: Uuid,
        mode: RunMode,
        symbol: Option<&Symbol>,
        triggered_by: &str,
        started_at: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO computation_log (
                allocation_version, batch_id, symbol, mode, status,
                triggered_by, started_at_ms
            ) VALUES (?, ?, ?, ?, 'running', ?, ?)
            "#,
        )
        .bind(version)
        .bind(batch_id.to_string())
        .bind(symbol.map(|s| s.as_str().to_string()))
        .bind(mode.to_string())
        .bind(triggered_by)
        .bind(started_at.as_i64())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a run as failed with the error message.
    ///
    /// Runs in its own transaction so the failure record survives the
    /// rolled-back allocation transaction.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_run_failed(
        &self,
        log_id: i64,
        error_message: &str,
        ended_at: TimeMs,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE computation_log
            SET status = 'failed', error_message = ?, ended_at_ms = ?, duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(ended_at.as_i64())
        .bind(duration_ms)
        .bind(log_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// All computation-log rows for a version, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_runs_for_version(
        &self,
        version: i64,
    ) -> Result<Vec<RunRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, allocation_version, batch_id, symbol, mode, status,
                   triggered_by, started_at_ms, ended_at_ms, duration_ms,
                   buys_processed, sells_processed, allocations_created,
                   symbols, total_pnl_usd, error_message
            FROM computation_log
            WHERE allocation_version = ?
            ORDER BY id DESC
            "#,
        )
        .bind(version)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(decode_run_row).collect())
    }

    /// The most recent completed run for a version, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_completed_run(
        &self,
        version: i64,
    ) -> Result<Option<RunRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, allocation_version, batch_id, symbol, mode, status,
                   triggered_by, started_at_ms, ended_at_ms, duration_ms,
                   buys_processed, sells_processed, allocations_created,
                   symbols, total_pnl_usd, error_message
            FROM computation_log
            WHERE allocation_version = ? AND status = 'completed'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(version)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(decode_run_row))
    }
}

fn decode_run_row(row: &sqlx::sqlite::SqliteRow) -> RunRecord {
    let batch_raw: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_raw).unwrap_or_else(|e| {
        warn!(batch_id = %batch_raw, error = %e, "Failed to parse stored batch id, using nil");
        Uuid::nil()
    });

    let mode_raw: String = row.get("mode");
    let mode = RunMode::parse(&mode_raw).unwrap_or_else(|| {
        warn!(mode = %mode_raw, "Unknown run mode, treating as full");
        RunMode::Full
    });

    let status_raw: String = row.get("status");
    let status = RunStatus::parse(&status_raw).unwrap_or_else(|| {
        warn!(status = %status_raw, "Unknown run status, treating as failed");
        RunStatus::Failed
    });

    let symbols: Vec<Symbol> = row
        .get::<Option<String>, _>("symbols")
        .map(|raw| {
            serde_json::from_str::<Vec<String>>(&raw)
                .unwrap_or_else(|e| {
                    warn!(symbols = %raw, error = %e, "Failed to parse stored symbol list");
                    Vec::new()
                })
                .into_iter()
                .map(Symbol::new)
                .collect()
        })
        .unwrap_or_default();

    RunRecord {
        id: row.get("id"),
        allocation_version: row.get("allocation_version"),
        batch_id,
        symbol: row
            .get::<Option<String>, _>("symbol")
            .map(Symbol::new),
        mode,
        status,
        triggered_by: row.get("triggered_by"),
        started_at: TimeMs::new(row.get::<i64, _>("started_at_ms")),
        ended_at: row.get::<Option<i64>, _>("ended_at_ms").map(TimeMs::new),
        duration_ms: row.get("duration_ms"),
        buys_processed: row.get("buys_processed"),
        sells_processed: row.get("sells_processed"),
        allocations_created: row.get("allocations_created"),
        symbols,
        total_pnl_usd: row
            .get::<Option<String>, _>("total_pnl_usd")
            .map(|raw| parse_stored_decimal(&raw, "total_pnl_usd")),
        error_message: row.get("error_message"),
    }
}
