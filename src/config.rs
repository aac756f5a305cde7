//! Configuration management
//!
//! Handles loading and validation of JSON configuration files. The core
//! consumes the validated values; raw parsing stays here.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::Timeframe;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub market: MarketConfig,
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub data: DataConfig,
}

/// Market configuration: the traded pairs and their timeframes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketConfig {
    /// Base timeframe the candle feed is sourced at
    pub time_frame: Timeframe,

    /// Derived timeframes, each a whole multiple of the base
    #[serde(default)]
    pub time_frames: Vec<Timeframe>,

    pub pairs: Vec<PairConfig>,
}

/// Per-symbol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PairConfig {
    pub symbol: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// One strategy instance to run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    pub id: u32,

    /// Registry name of the strategy implementation
    pub name: String,

    pub symbols: Vec<String>,
    pub time_frames: Vec<Timeframe>,

    /// Number of candles handed to the strategy each tick
    #[serde(default = "default_candles_limit")]
    pub candles_limit: usize,

    /// Free-form parameters forwarded to `Strategy::configure`
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_candles_limit() -> usize {
    100
}

/// Replay data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding one `<SYMBOL>.csv` candle file per pair
    pub dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            dir: "data".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants the core relies on
    pub fn validate(&self) -> Result<()> {
        if self.market.pairs.is_empty() {
            bail!("config defines no pairs");
        }

        let mut symbols = HashSet::new();
        for pair in &self.market.pairs {
            if !symbols.insert(pair.symbol.as_str()) {
                bail!("duplicate pair '{}'", pair.symbol);
            }
        }

        for timeframe in &self.market.time_frames {
            if !timeframe.is_multiple_of(self.market.time_frame) {
                bail!(
                    "derived timeframe {} is not a multiple of the base timeframe {}",
                    timeframe,
                    self.market.time_frame
                );
            }
        }

        let mut ids = HashSet::new();
        for strategy in &self.strategies {
            if !ids.insert(strategy.id) {
                bail!("duplicate strategy id {}", strategy.id);
            }
            if strategy.candles_limit == 0 {
                bail!("strategy '{}' has a zero candles-limit", strategy.name);
            }
            for symbol in &strategy.symbols {
                if !symbols.contains(symbol.as_str()) {
                    bail!(
                        "strategy '{}' references unknown symbol '{}'",
                        strategy.name,
                        symbol
                    );
                }
            }
            for timeframe in &strategy.time_frames {
                let known = *timeframe == self.market.time_frame
                    || self.market.time_frames.contains(timeframe);
                if !known {
                    bail!(
                        "strategy '{}' references unconfigured timeframe {}",
                        strategy.name,
                        timeframe
                    );
                }
            }
        }
        Ok(())
    }
}
