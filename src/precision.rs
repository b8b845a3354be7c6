//! Per-symbol precision rules: dust thresholds and USD rounding.
//!
//! The engine and validator depend on this through the `Precision` trait so
//! the implementation is chosen once at construction time: either the fixed
//! defaults or a per-symbol table delegating to the defaults for symbols it
//! does not know.

use crate::domain::{Decimal, Symbol};
use rust_decimal::Decimal as RustDecimal;
use std::collections::HashMap;

/// Smallest significant quantity and rounding rule per symbol.
pub trait Precision: Send + Sync {
    /// Quantities at or below this threshold are economically insignificant
    /// for the symbol and are ignored rather than left as phantom inventory.
    fn dust_threshold(&self, symbol: &Symbol) -> Decimal;

    /// Round a computed USD amount with the symbol's banker's-rounding rule.
    fn round_financial(&self, value: Decimal, symbol: &Symbol) -> Decimal;
}

const DEFAULT_ROUND_DP: u32 = 8;

fn default_dust() -> Decimal {
    // 1e-8
    Decimal::new(RustDecimal::new(1, 8))
}

/// Fixed fallback rules: 1e-8 dust, 8-decimal round-half-even.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrecision;

impl Precision for DefaultPrecision {
    fn dust_threshold(&self, _symbol: &Symbol) -> Decimal {
        default_dust()
    }

    fn round_financial(&self, value: Decimal, _symbol: &Symbol) -> Decimal {
        value.round_half_even(DEFAULT_ROUND_DP)
    }
}

/// Rule for one symbol in a `SymbolPrecision` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRule {
    pub dust: Decimal,
    pub round_dp: u32,
}

/// Per-symbol precision table delegating to `DefaultPrecision` for unknown
/// symbols.
#[derive(Debug, Clone, Default)]
pub struct SymbolPrecision {
    rules: HashMap<Symbol, SymbolRule>,
}

impl SymbolPrecision {
    pub fn new(rules: HashMap<Symbol, SymbolRule>) -> Self {
        Self { rules }
    }
}

impl Precision for SymbolPrecision {
    fn dust_threshold(&self, symbol: &Symbol) -> Decimal {
        self.rules
            .get(symbol)
            .map(|r| r.dust)
            .unwrap_or_else(default_dust)
    }

    fn round_financial(&self, value: Decimal, symbol: &Symbol) -> Decimal {
        let dp = self
            .rules
            .get(symbol)
            .map(|r| r.round_dp)
            .unwrap_or(DEFAULT_ROUND_DP);
        value.round_half_even(dp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_precision_dust() {
        let p = DefaultPrecision;
        let symbol = Symbol::new("BTC-USD");
        assert_eq!(
            p.dust_threshold(&symbol).to_canonical_string(),
            "0.00000001"
        );
    }

    #[test]
    fn test_default_precision_rounds_to_eight_places() {
        let p = DefaultPrecision;
        let symbol = Symbol::new("BTC-USD");
        let v = Decimal::from_str("1.234567885").unwrap();
        assert_eq!(
            p.round_financial(v, &symbol).to_canonical_string(),
            "1.23456788"
        );
    }

    #[test]
    fn test_symbol_precision_override() {
        let mut rules = HashMap::new();
        rules.insert(
            Symbol::new("DOGE-USD"),
            SymbolRule {
                dust: Decimal::from_str("0.01").unwrap(),
                round_dp: 4,
            },
        );
        let p = SymbolPrecision::new(rules);

        let doge = Symbol::new("DOGE-USD");
        assert_eq!(p.dust_threshold(&doge).to_canonical_string(), "0.01");
        let v = Decimal::from_str("1.23455").unwrap();
        assert_eq!(p.round_financial(v, &doge).to_canonical_string(), "1.2346");
    }

    #[test]
    fn test_symbol_precision_falls_back_to_default() {
        let p = SymbolPrecision::default();
        let unknown = Symbol::new("ETH-USD");
        assert_eq!(
            p.dust_threshold(&unknown).to_canonical_string(),
            "0.00000001"
        );
        let v = Decimal::from_str("0.123456785").unwrap();
        assert_eq!(
            p.round_financial(v, &unknown).to_canonical_string(),
            "0.12345678"
        );
    }
}
