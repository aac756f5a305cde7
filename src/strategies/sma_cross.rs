//! SMA crossover strategy
//!
//! Long-only two-SMA crossover: enters on a golden cross, exits on a death
//! cross, and protects every open position with a stop placed from the
//! open-position event. Indicators are updated incrementally with the `ta`
//! crate, so each tick costs O(1) regardless of history length.

use crate::events::{Event, EventKind};
use crate::strategies::{Action, Strategy, TickContext};
use crate::Side;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

/// SMA crossover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SmaCrossConfig {
    /// Fast SMA period
    pub fast_period: usize,
    /// Slow SMA period
    pub slow_period: usize,
    /// Protective stop distance as a fraction of entry price (0 disables)
    pub stop_fraction: f64,
}

impl Default for SmaCrossConfig {
    fn default() -> Self {
        SmaCrossConfig {
            fast_period: 9,
            slow_period: 21,
            stop_fraction: 0.02,
        }
    }
}

/// Two-SMA crossover strategy
pub struct SmaCrossStrategy {
    config: SmaCrossConfig,

    // Stateful indicators
    fast_sma: SimpleMovingAverage,
    slow_sma: SimpleMovingAverage,

    // State tracking
    prev_values: Option<(f64, f64)>,
    bars_seen: usize,
    last_processed: Option<i64>,
}

impl SmaCrossStrategy {
    pub fn new(config: SmaCrossConfig) -> Self {
        let fast_sma = SimpleMovingAverage::new(config.fast_period).unwrap();
        let slow_sma = SimpleMovingAverage::new(config.slow_period).unwrap();
        Self {
            config,
            fast_sma,
            slow_sma,
            prev_values: None,
            bars_seen: 0,
            last_processed: None,
        }
    }
}

/// Registry factory
pub fn create() -> Box<dyn Strategy> {
    Box::new(SmaCrossStrategy::new(SmaCrossConfig::default()))
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &'static str {
        "sma_cross"
    }

    fn configure(&mut self, params: &serde_json::Value) -> Result<()> {
        if !params.is_null() {
            self.config = serde_json::from_value(params.clone())
                .context("invalid sma_cross parameters")?;
        }
        if self.config.fast_period == 0 || self.config.slow_period == 0 {
            bail!("sma periods must be positive");
        }
        if self.config.fast_period >= self.config.slow_period {
            bail!(
                "fast period {} must be shorter than slow period {}",
                self.config.fast_period,
                self.config.slow_period
            );
        }
        if !(0.0..1.0).contains(&self.config.stop_fraction) {
            bail!("stop-fraction {} outside [0, 1)", self.config.stop_fraction);
        }
        // Periods validated above
        self.fast_sma = SimpleMovingAverage::new(self.config.fast_period).unwrap();
        self.slow_sma = SimpleMovingAverage::new(self.config.slow_period).unwrap();
        self.prev_values = None;
        self.bars_seen = 0;
        self.last_processed = None;
        Ok(())
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::OpenPosition, EventKind::ClosedPosition]
    }

    fn on_event(&mut self, event: &Event) -> Vec<Action> {
        match event {
            // Protect the fresh position with a stop below/above entry
            Event::OpenPosition(position) if self.config.stop_fraction > 0.0 => {
                match (position.entry_price(), position.side()) {
                    (Some(entry), Some(side)) => {
                        let stop = entry * (1.0 - side.factor() * self.config.stop_fraction);
                        vec![Action::stop_exit(100.0, stop).with_comment("protective stop")]
                    }
                    _ => Vec::new(),
                }
            }
            // Whatever closed the position, no order must outlive it
            Event::ClosedPosition(_) => vec![Action::CancelAll],
            _ => Vec::new(),
        }
    }

    fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action> {
        let mut crossed_up = false;
        let mut crossed_down = false;

        let last_processed = self.last_processed;
        for candle in ctx
            .candles
            .iter()
            .filter(|c| Some(c.timestamp) > last_processed)
        {
            let fast = self.fast_sma.next(candle.close);
            let slow = self.slow_sma.next(candle.close);
            self.bars_seen += 1;

            if let Some((prev_fast, prev_slow)) = self.prev_values {
                if self.bars_seen > self.config.slow_period {
                    crossed_up = prev_fast <= prev_slow && fast > slow;
                    crossed_down = prev_fast >= prev_slow && fast < slow;
                }
            }
            self.prev_values = Some((fast, slow));
            self.last_processed = Some(candle.timestamp);
        }

        if crossed_up && !ctx.in_position() {
            return vec![Action::market_entry(Side::Buy, 100.0).with_comment("golden cross")];
        }
        if crossed_down && ctx.in_position() {
            // Cancel the protective stop before the closing order goes in
            return vec![
                Action::CancelAll,
                Action::market_exit(100.0).with_comment("death cross"),
            ];
        }
        Vec::new()
    }
}
