use clap::{Parser, Subcommand};
use lotmatch::config::Config;
use lotmatch::db::init_db;
use lotmatch::domain::Symbol;
use lotmatch::orchestration::{AllocationEngine, AllocationValidator, HealthReport};
use lotmatch::precision::{DefaultPrecision, Precision, SymbolPrecision};
use lotmatch::Repository;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lotmatch")]
#[command(about = "FIFO lot accounting over a trade ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute FIFO allocations for a version
    Compute {
        /// Allocation version to (re)compute
        #[arg(long)]
        version: i64,

        /// Recompute every symbol in the ledger
        #[arg(long, conflicts_with = "symbol")]
        all_symbols: bool,

        /// Recompute one symbol, leaving the version's other rows intact
        #[arg(long)]
        symbol: Option<String>,

        /// Permit recomputing a version that already has rows
        #[arg(long)]
        force: bool,

        /// Recorded in the computation log
        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },

    /// Validate a computed version
    Validate {
        /// Allocation version to validate
        #[arg(long)]
        version: i64,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,

        /// Print the per-symbol health report
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let precision: Arc<dyn Precision> = if config.symbol_rules.is_empty() {
        Arc::new(DefaultPrecision)
    } else {
        Arc::new(SymbolPrecision::new(config.symbol_rules.clone()))
    };

    let exit_code = match cli.cmd {
        Commands::Compute {
            version,
            all_symbols,
            symbol,
            force,
            triggered_by,
        } => {
            run_compute(
                repo,
                precision,
                version,
                all_symbols,
                symbol,
                force,
                &triggered_by,
            )
            .await
        }
        Commands::Validate {
            version,
            strict,
            report,
        } => run_validate(repo, precision, version, strict, report).await,
    };

    std::process::exit(exit_code);
}

async fn run_compute(
    repo: Arc<Repository>,
    precision: Arc<dyn Precision>,
    version: i64,
    all_symbols: bool,
    symbol: Option<String>,
    force: bool,
    triggered_by: &str,
) -> i32 {
    let target = match (all_symbols, symbol) {
        (true, None) => None,
        (false, Some(s)) => Some(Symbol::new(s)),
        _ => {
            eprintln!("Specify exactly one of --all-symbols or --symbol <SYMBOL>");
            return 2;
        }
    };

    let existing = match repo.count_allocations(version, target.as_ref()).await {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Failed to inspect version {}: {}", version, e);
            return 1;
        }
    };
    if existing > 0 && !force {
        eprintln!(
            "Version {} already has {} allocation row(s); pass --force to recompute",
            version, existing
        );
        return 1;
    }

    let engine = AllocationEngine::new(repo, precision);
    let result = match &target {
        None => engine.compute_all_symbols(version, triggered_by).await,
        Some(symbol) => engine.compute_symbol(symbol, version, None, triggered_by).await,
    };

    match result {
        Ok(r) if r.success => {
            println!(
                "Computed version {} (batch {}) in {} ms",
                r.version, r.batch_id, r.duration_ms
            );
            println!(
                "  symbols: {}",
                r.symbols
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!(
                "  buys: {}  sells: {}  allocations: {}",
                r.buys_processed, r.sells_processed, r.allocations_created
            );
            println!("  total PnL: {} USD", r.total_pnl_usd.to_canonical_string());
            0
        }
        Ok(r) => {
            eprintln!(
                "Computation failed: {}",
                r.error.as_deref().unwrap_or("unknown error")
            );
            1
        }
        Err(e) => {
            eprintln!("Computation failed: {}", e);
            1
        }
    }
}

async fn run_validate(
    repo: Arc<Repository>,
    precision: Arc<dyn Precision>,
    version: i64,
    strict: bool,
    report: bool,
) -> i32 {
    let validator = AllocationValidator::new(repo, precision);

    let result = match validator.validate_version(version, strict).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Validation failed to run: {}", e);
            return 1;
        }
    };

    println!(
        "Version {}: {} allocation(s), {} sell(s), {} buy(s)",
        result.version, result.total_allocations, result.total_sells, result.total_buys
    );
    println!(
        "  unmatched: {}  under-allocated: {}  over-allocated: {}  duplicates: {}",
        result.unmatched_sells,
        result.under_allocated_sells,
        result.over_allocated_sells,
        result.duplicate_allocations
    );
    println!(
        "  computed PnL: {} USD  logged PnL: {}",
        result.computed_pnl_usd.to_canonical_string(),
        result
            .logged_pnl_usd
            .map(|p| format!("{} USD", p.to_canonical_string()))
            .unwrap_or_else(|| "-".to_string())
    );
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }
    println!("  {}", if result.is_valid { "VALID" } else { "INVALID" });

    if report {
        match validator.generate_health_report(version).await {
            Ok(health) => print_health_report(&health),
            Err(e) => {
                eprintln!("Failed to generate health report: {}", e);
                return 1;
            }
        }
    }

    if result.is_valid {
        0
    } else {
        1
    }
}

fn print_health_report(report: &HealthReport) {
    println!("Health report for version {}:", report.version);
    for sym in &report.symbols {
        println!(
            "  {}: {} allocation(s) ({} matched, {} unmatched), size {}, PnL {} USD",
            sym.symbol,
            sym.allocations,
            sym.matched,
            sym.unmatched,
            sym.allocated_size.to_canonical_string(),
            sym.pnl_usd.to_canonical_string()
        );
    }
    if let Some(run) = &report.latest_run {
        println!(
            "  latest completed run: id {} batch {} triggered by {}",
            run.id, run.batch_id, run.triggered_by
        );
    } else {
        println!("  no completed run recorded");
    }
    if report.pending_review.is_empty() {
        println!("  no pending review items");
    } else {
        println!("  {} pending review item(s):", report.pending_review.len());
        for item in &report.pending_review {
            println!(
                "    [{}] {} {}: {}",
                item.severity, item.order_id, item.issue_type, item.description
            );
        }
    }
}
