//! Post-hoc validation of a persisted allocation version.
//!
//! The validator reads committed state only and never mutates allocation
//! data; violations are data in the report, not exceptions. It must only be
//! pointed at versions whose computation has already committed, since a run
//! in flight can be observed half-rebuilt.
//!
//! Completeness is checked against the symbol's dust threshold from the
//! `Precision` provider, the single threshold source for the whole crate.

use crate::db::repo::{RunMode, RunRecord};
use crate::db::Repository;
use crate::domain::{
    Decimal, FifoAllocation, ManualReviewItem, ReviewStatus, Side, Symbol, TradeRecord,
};
use crate::error::AppError;
use crate::orchestration::allocator::total_matched_pnl;
use crate::precision::Precision;
use rust_decimal::Decimal as RustDecimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Report built fresh by each validator run and rendered to operators.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub version: i64,
    pub total_allocations: i64,
    pub total_sells: i64,
    pub total_buys: i64,
    pub unmatched_sells: i64,
    pub under_allocated_sells: i64,
    pub over_allocated_sells: i64,
    pub duplicate_allocations: i64,
    /// Matched PnL recomputed from the version's rows.
    pub computed_pnl_usd: Decimal,
    /// PnL recorded on the latest completed computation-log row, if any.
    pub logged_pnl_usd: Option<Decimal>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new(version: i64) -> Self {
        Self {
            is_valid: false,
            version,
            total_allocations: 0,
            total_sells: 0,
            total_buys: 0,
            unmatched_sells: 0,
            under_allocated_sells: 0,
            over_allocated_sells: 0,
            duplicate_allocations: 0,
            computed_pnl_usd: Decimal::zero(),
            logged_pnl_usd: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn finalize(&mut self, strict: bool) {
        self.is_valid = self.errors.is_empty() && (!strict || self.warnings.is_empty());
    }
}

/// Per-symbol slice of a health report.
#[derive(Debug, Clone)]
pub struct SymbolHealth {
    pub symbol: Symbol,
    pub allocations: i64,
    pub matched: i64,
    pub unmatched: i64,
    pub allocated_size: Decimal,
    pub pnl_usd: Decimal,
}

/// Read-only operator summary of a version's allocations, open review items,
/// and latest completed run.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub version: i64,
    pub symbols: Vec<SymbolHealth>,
    pub pending_review: Vec<ManualReviewItem>,
    pub latest_run: Option<RunRecord>,
}

pub struct AllocationValidator {
    repo: Arc<Repository>,
    precision: Arc<dyn Precision>,
}

impl AllocationValidator {
    pub fn new(repo: Arc<Repository>, precision: Arc<dyn Precision>) -> Self {
        Self { repo, precision }
    }

    /// Run every check against a committed version.
    ///
    /// `is_valid` requires no errors, and under `strict` no warnings either.
    ///
    /// # Errors
    /// Returns an error only on database failure, never on finding violations.
    pub async fn validate_version(
        &self,
        version: i64,
        strict: bool,
    ) -> Result<ValidationResult, AppError> {
        let allocations = self.repo.query_allocations_for_version(version).await?;
        let sells = self.repo.query_all_sells().await?;
        let total_buys = self.repo.count_trades(Side::Buy).await?;

        let mut result = ValidationResult::new(version);
        result.total_allocations = allocations.len() as i64;
        result.total_sells = sells.len() as i64;
        result.total_buys = total_buys;

        self.check_unmatched_sells(&allocations, &mut result);
        self.check_completeness(&allocations, &sells, &mut result);
        self.check_duplicates(&allocations, &mut result);
        self.check_temporal_consistency(&allocations, &mut result);
        self.reconcile_pnl(version, &allocations, &mut result).await?;

        result.finalize(strict);
        info!(
            version,
            valid = result.is_valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validation completed"
        );
        Ok(result)
    }

    /// Unmatched sells are an expected, flagged state, never an error.
    fn check_unmatched_sells(&self, allocations: &[FifoAllocation], result: &mut ValidationResult) {
        result.unmatched_sells = allocations.iter().filter(|a| !a.is_matched()).count() as i64;
        if result.unmatched_sells > 0 {
            result.warnings.push(format!(
                "{} unmatched sell allocation(s) in version {}; see the manual review queue",
                result.unmatched_sells, result.version
            ));
        }
    }

    /// Every sell's size must equal the sum of its allocations within the
    /// symbol's dust threshold.
    fn check_completeness(
        &self,
        allocations: &[FifoAllocation],
        sells: &[TradeRecord],
        result: &mut ValidationResult,
    ) {
        let mut allocated: HashMap<&str, Decimal> = HashMap::new();
        for a in allocations {
            let entry = allocated
                .entry(a.sell_order_id.as_str())
                .or_insert_with(Decimal::zero);
            *entry = *entry + a.allocated_size;
        }

        for sell in sells {
            let total = allocated
                .get(sell.order_id.as_str())
                .copied()
                .unwrap_or_else(Decimal::zero);
            let dust = self.precision.dust_threshold(&sell.symbol);
            let shortfall = sell.size - total;

            if shortfall > dust {
                result.under_allocated_sells += 1;
                result.errors.push(format!(
                    "Sell {} ({}) under-allocated: size {} vs allocated {}",
                    sell.order_id,
                    sell.symbol,
                    sell.size.to_canonical_string(),
                    total.to_canonical_string()
                ));
            } else if -shortfall > dust {
                result.over_allocated_sells += 1;
                result.errors.push(format!(
                    "Sell {} ({}) over-allocated: size {} vs allocated {}",
                    sell.order_id,
                    sell.symbol,
                    sell.size.to_canonical_string(),
                    total.to_canonical_string()
                ));
            }
        }
    }

    /// `(sell_order_id, buy_order_id)` must appear at most once per version.
    fn check_duplicates(&self, allocations: &[FifoAllocation], result: &mut ValidationResult) {
        let mut groups: HashMap<(&str, Option<&str>), i64> = HashMap::new();
        for a in allocations {
            let key = (
                a.sell_order_id.as_str(),
                a.buy_order_id().map(|id| id.as_str()),
            );
            *groups.entry(key).or_insert(0) += 1;
        }

        let mut duplicates: Vec<_> = groups.into_iter().filter(|(_, n)| *n > 1).collect();
        duplicates.sort();
        for ((sell, buy), n) in duplicates {
            result.duplicate_allocations += 1;
            result.errors.push(format!(
                "Duplicate allocation: sell {} / buy {} appears {} times",
                sell,
                buy.unwrap_or("<unmatched>"),
                n
            ));
        }
    }

    /// A matched allocation with `buy_time > sell_time` means a matching bug
    /// or corrupted data.
    fn check_temporal_consistency(
        &self,
        allocations: &[FifoAllocation],
        result: &mut ValidationResult,
    ) {
        for a in allocations {
            if let Some(buy_time) = a.buy_time() {
                if buy_time > a.sell_time {
                    result.errors.push(format!(
                        "Sell {} matched against buy {} that settled after it ({} > {})",
                        a.sell_order_id,
                        a.buy_order_id().map(|id| id.as_str()).unwrap_or("?"),
                        buy_time.as_i64(),
                        a.sell_time.as_i64()
                    ));
                }
            }
        }
    }

    /// Compare recomputed matched PnL against the latest completed run's
    /// logged total. A single-symbol run only logged its own slice.
    async fn reconcile_pnl(
        &self,
        version: i64,
        allocations: &[FifoAllocation],
        result: &mut ValidationResult,
    ) -> Result<(), sqlx::Error> {
        result.computed_pnl_usd = total_matched_pnl(allocations);

        let run = match self.repo.latest_completed_run(version).await? {
            Some(run) => run,
            None => {
                result.warnings.push(format!(
                    "No completed computation-log row for version {}",
                    version
                ));
                return Ok(());
            }
        };

        let expected = match (run.mode, &run.symbol) {
            (RunMode::SingleSymbol, Some(symbol)) => {
                let slice: Vec<FifoAllocation> = allocations
                    .iter()
                    .filter(|a| &a.symbol == symbol)
                    .cloned()
                    .collect();
                total_matched_pnl(&slice)
            }
            _ => result.computed_pnl_usd,
        };

        result.logged_pnl_usd = run.total_pnl_usd;
        match run.total_pnl_usd {
            Some(logged) if (expected - logged).abs() > pnl_tolerance() => {
                result.warnings.push(format!(
                    "PnL mismatch for version {}: computed {} vs logged {}",
                    version,
                    expected.to_canonical_string(),
                    logged.to_canonical_string()
                ));
            }
            Some(_) => {}
            None => {
                result.warnings.push(format!(
                    "Completed run {} for version {} has no recorded total PnL",
                    run.id, version
                ));
            }
        }

        Ok(())
    }

    /// Aggregate a version into a human-readable structure: per-symbol
    /// counts and totals, pending review items, and the latest completed run.
    ///
    /// # Errors
    /// Returns an error if any query fails.
    pub async fn generate_health_report(&self, version: i64) -> Result<HealthReport, AppError> {
        let allocations = self.repo.query_allocations_for_version(version).await?;

        let mut per_symbol: BTreeMap<Symbol, SymbolHealth> = BTreeMap::new();
        for a in &allocations {
            let entry = per_symbol
                .entry(a.symbol.clone())
                .or_insert_with(|| SymbolHealth {
                    symbol: a.symbol.clone(),
                    allocations: 0,
                    matched: 0,
                    unmatched: 0,
                    allocated_size: Decimal::zero(),
                    pnl_usd: Decimal::zero(),
                });
            entry.allocations += 1;
            if a.is_matched() {
                entry.matched += 1;
            } else {
                entry.unmatched += 1;
            }
            entry.allocated_size = entry.allocated_size + a.allocated_size;
            if let Some(pnl) = a.pnl_usd() {
                entry.pnl_usd = entry.pnl_usd + pnl;
            }
        }

        let pending_review = self
            .repo
            .query_review_items(Some(ReviewStatus::Pending))
            .await?;
        let latest_run = self.repo.latest_completed_run(version).await?;

        Ok(HealthReport {
            version,
            symbols: per_symbol.into_values().collect(),
            pending_review,
            latest_run,
        })
    }
}

/// Reconciliation tolerance for USD totals: 1e-8, matching the default
/// rounding precision.
fn pnl_tolerance() -> Decimal {
    Decimal::new(RustDecimal::new(1, 8))
}
