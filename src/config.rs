use crate::domain::{Decimal, Symbol};
use crate::precision::SymbolRule;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Environment-driven process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Per-symbol precision overrides; empty means the fixed defaults apply.
    pub symbol_rules: HashMap<Symbol, SymbolRule>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let symbol_rules = match env_map.get("SYMBOL_PRECISION") {
            Some(raw) => parse_symbol_rules(raw)?,
            None => HashMap::new(),
        };

        Ok(Config {
            database_path,
            symbol_rules,
        })
    }
}

/// Parse `SYMBOL_PRECISION` entries of the form `SYM=dust:decimals`,
/// comma-separated, e.g. `BTC-USD=0.00000001:8,DOGE-USD=0.01:4`.
fn parse_symbol_rules(raw: &str) -> Result<HashMap<Symbol, SymbolRule>, ConfigError> {
    let mut rules = HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (symbol, rule) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue(
                "SYMBOL_PRECISION".to_string(),
                format!("expected SYM=dust:decimals, got {}", entry),
            )
        })?;

        let (dust_raw, decimals_raw) = rule.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(
                "SYMBOL_PRECISION".to_string(),
                format!("expected dust:decimals for {}, got {}", symbol, rule),
            )
        })?;

        let dust = Decimal::from_str(dust_raw.trim()).map_err(|_| {
            ConfigError::InvalidValue(
                "SYMBOL_PRECISION".to_string(),
                format!("dust for {} must be a decimal, got {}", symbol, dust_raw),
            )
        })?;

        let round_dp = decimals_raw.trim().parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue(
                "SYMBOL_PRECISION".to_string(),
                format!(
                    "decimals for {} must be a non-negative integer, got {}",
                    symbol, decimals_raw
                ),
            )
        })?;

        rules.insert(Symbol::new(symbol.trim()), SymbolRule { dust, round_dp });
    }

    Ok(rules)
}
