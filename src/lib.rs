pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod precision;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    AllocationKind, Decimal, FifoAllocation, ManualReviewItem, OrderId, Side, Symbol, TimeMs,
    TradeRecord,
};
pub use error::AppError;
pub use orchestration::{
    AllocationEngine, AllocationValidator, ComputationResult, HealthReport, ValidationResult,
};
pub use precision::{DefaultPrecision, Precision, SymbolPrecision};
