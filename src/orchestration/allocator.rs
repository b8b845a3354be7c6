//! Allocation engine: per-version FIFO recomputation over the trade ledger.
//!
//! The engine reads the ledger, runs per-symbol matching in memory, and lands
//! the results through one repository transaction (delete the version's rows,
//! insert the fresh ones, upsert review items, mark the log row completed).
//! A failure anywhere rolls the whole transaction back and is recorded on the
//! computation-log row in its own transaction, so a version is never
//! observable half-rebuilt.
//!
//! Versions are caller-supplied, not auto-incremented, so recomputation is an
//! explicit, idempotent operation. There is no lock preventing two processes
//! from computing the same version concurrently; the job scheduler invoking
//! the engine must serialize runs per version.

use crate::db::repo::{RunCompletion, RunMode, VersionScope};
use crate::db::Repository;
use crate::domain::{Decimal, FifoAllocation, Side, Symbol, TimeMs};
use crate::engine::match_symbol;
use crate::error::AppError;
use crate::precision::Precision;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Immutable summary of one engine run. Logged, never persisted as a row.
#[derive(Debug, Clone)]
pub struct ComputationResult {
    pub success: bool,
    pub version: i64,
    pub batch_id: Uuid,
    pub symbols: Vec<Symbol>,
    pub buys_processed: i64,
    pub sells_processed: i64,
    pub allocations_created: i64,
    pub total_pnl_usd: Decimal,
    pub duration_ms: i64,
    pub error: Option<String>,
}

pub struct AllocationEngine {
    repo: Arc<Repository>,
    precision: Arc<dyn Precision>,
}

impl AllocationEngine {
    pub fn new(repo: Arc<Repository>, precision: Arc<dyn Precision>) -> Self {
        Self { repo, precision }
    }

    /// Recompute every symbol's allocations for `version`.
    ///
    /// A matching failure after the log row exists is returned as a failed
    /// `ComputationResult`, never silently swallowed.
    ///
    /// # Errors
    /// Returns an error if the computation-log row cannot be written at all.
    pub async fn compute_all_symbols(
        &self,
        version: i64,
        triggered_by: &str,
    ) -> Result<ComputationResult, AppError> {
        let batch_id = Uuid::new_v4();
        let started = now_ms();
        let log_id = self
            .repo
            .insert_run_started(version, batch_id, RunMode::Full, None, triggered_by, started)
            .await?;

        info!(
            version,
            batch_id = %batch_id,
            triggered_by,
            "Starting full allocation computation"
        );

        match self.compute_scope(None, version, batch_id, log_id, started).await {
            Ok(result) => Ok(result),
            Err(e) => self.record_failure(version, batch_id, log_id, started, e).await,
        }
    }

    /// Recompute one symbol's allocations for `version`, leaving the rest of
    /// the version's rows intact.
    ///
    /// # Errors
    /// Returns an error if the computation-log row cannot be written at all.
    pub async fn compute_symbol(
        &self,
        symbol: &Symbol,
        version: i64,
        batch_id: Option<Uuid>,
        triggered_by: &str,
    ) -> Result<ComputationResult, AppError> {
        let batch_id = batch_id.unwrap_or_else(Uuid::new_v4);
        let started = now_ms();
        let log_id = self
            .repo
            .insert_run_started(
                version,
                batch_id,
                RunMode::SingleSymbol,
                Some(symbol),
                triggered_by,
                started,
            )
            .await?;

        info!(
            version,
            symbol = %symbol,
            batch_id = %batch_id,
            triggered_by,
            "Starting single-symbol allocation computation"
        );

        match self
            .compute_scope(Some(symbol), version, batch_id, log_id, started)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => self.record_failure(version, batch_id, log_id, started, e).await,
        }
    }

    async fn compute_scope(
        &self,
        symbol: Option<&Symbol>,
        version: i64,
        batch_id: Uuid,
        log_id: i64,
        started: TimeMs,
    ) -> Result<ComputationResult, sqlx::Error> {
        let symbols = match symbol {
            Some(s) => vec![s.clone()],
            None => self.repo.query_distinct_symbols().await?,
        };

        let mut allocations = Vec::new();
        let mut review_items = Vec::new();
        let mut buys_processed = 0i64;
        let mut sells_processed = 0i64;

        for sym in &symbols {
            let buys = self.repo.query_trades(sym, Side::Buy).await?;
            let sells = self.repo.query_trades(sym, Side::Sell).await?;
            let outcome = match_symbol(
                &buys,
                &sells,
                self.precision.as_ref(),
                sym,
                version,
                batch_id,
                started,
            );

            info!(
                symbol = %sym,
                buys = outcome.buys_processed,
                sells = outcome.sells_processed,
                allocations = outcome.allocations.len(),
                unmatched = outcome.review_items.len(),
                "Symbol matched"
            );

            buys_processed += outcome.buys_processed;
            sells_processed += outcome.sells_processed;
            allocations.extend(outcome.allocations);
            review_items.extend(outcome.review_items);
        }

        let total_pnl_usd = total_matched_pnl(&allocations);
        let allocations_created = allocations.len() as i64;
        let ended = now_ms();
        let duration_ms = ended.as_i64() - started.as_i64();

        let scope = match symbol {
            Some(s) => VersionScope::Symbol(s),
            None => VersionScope::AllSymbols,
        };
        let completion = RunCompletion {
            ended_at: ended,
            duration_ms,
            buys_processed,
            sells_processed,
            allocations_created,
            symbols: symbols.clone(),
            total_pnl_usd,
        };
        self.repo
            .persist_computation(scope, version, &allocations, &review_items, log_id, &completion)
            .await?;

        info!(
            version,
            batch_id = %batch_id,
            allocations = allocations_created,
            total_pnl = %total_pnl_usd,
            duration_ms,
            "Allocation computation completed"
        );

        Ok(ComputationResult {
            success: true,
            version,
            batch_id,
            symbols,
            buys_processed,
            sells_processed,
            allocations_created,
            total_pnl_usd,
            duration_ms,
            error: None,
        })
    }

    async fn record_failure(
        &self,
        version: i64,
        batch_id: Uuid,
        log_id: i64,
        started: TimeMs,
        err: sqlx::Error,
    ) -> Result<ComputationResult, AppError> {
        let ended = now_ms();
        let duration_ms = ended.as_i64() - started.as_i64();
        let message = err.to_string();

        error!(
            version,
            batch_id = %batch_id,
            error = %message,
            "Allocation computation failed, transaction rolled back"
        );
        self.repo
            .mark_run_failed(log_id, &message, ended, duration_ms)
            .await?;

        Ok(ComputationResult {
            success: false,
            version,
            batch_id,
            symbols: Vec::new(),
            buys_processed: 0,
            sells_processed: 0,
            allocations_created: 0,
            total_pnl_usd: Decimal::zero(),
            duration_ms,
            error: Some(message),
        })
    }
}

/// Sum of realized PnL over matched allocations.
pub(crate) fn total_matched_pnl(allocations: &[FifoAllocation]) -> Decimal {
    allocations
        .iter()
        .filter_map(|a| a.pnl_usd())
        .fold(Decimal::zero(), |acc, pnl| acc + pnl)
}

fn now_ms() -> TimeMs {
    TimeMs::new(chrono::Utc::now().timestamp_millis())
}
