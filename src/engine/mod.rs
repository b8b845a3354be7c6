//! Pure computation engine for deterministic FIFO lot matching.

pub mod matcher;

pub use matcher::{match_symbol, FifoMatcher, SymbolMatchOutcome};
