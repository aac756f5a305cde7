//! Multi-timeframe candle aggregation
//!
//! One aggregator per symbol consumes the base-resolution candle stream and
//! maintains a synchronized series per configured higher timeframe. Each
//! derived candle closes in lock-step with the base candle that completes its
//! window: a right-aligned, non-overlapping tumbling window keyed off the
//! base clock, not a sliding window.

use crate::error::ReplayError;
use crate::{Candle, Symbol, Timeframe};
use std::collections::BTreeMap;
use tracing::trace;

/// Per-symbol candle history across the base and derived timeframes
#[derive(Debug, Clone)]
pub struct TimeframeAggregator {
    symbol: Symbol,
    price_precision: u32,
    quantity_precision: u32,

    base_timeframe: Timeframe,
    base_candles: Vec<Candle>,

    /// Append-only derived series, one per configured higher timeframe
    derived: BTreeMap<Timeframe, Vec<Candle>>,

    last_candle: Option<Candle>,
    expected_timestamp: Option<i64>,
}

impl TimeframeAggregator {
    /// Derived timeframes must be whole multiples of the base timeframe; the
    /// configuration layer validates that before construction.
    pub fn new(
        symbol: Symbol,
        price_precision: u32,
        quantity_precision: u32,
        base_timeframe: Timeframe,
        derived_timeframes: &[Timeframe],
    ) -> Self {
        let derived = derived_timeframes
            .iter()
            .map(|tf| (*tf, Vec::new()))
            .collect();
        Self {
            symbol,
            price_precision,
            quantity_precision,
            base_timeframe,
            base_candles: Vec::new(),
            derived,
            last_candle: None,
            expected_timestamp: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }

    pub fn quantity_precision(&self) -> u32 {
        self.quantity_precision
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.base_timeframe
    }

    /// Most recent base candle seen
    pub fn last_candle(&self) -> Option<&Candle> {
        self.last_candle.as_ref()
    }

    /// Ingest the next base-resolution candle, exactly one base interval
    /// after the previous one. Every derived series whose window this candle
    /// completes gains one aggregated candle.
    pub fn advance(&mut self, candle: Candle) -> Result<(), ReplayError> {
        let base = self.base_timeframe.secs();
        match self.expected_timestamp {
            None => {
                if candle.timestamp.rem_euclid(base) != 0 {
                    return Err(ReplayError::Sequence {
                        symbol: self.symbol.clone(),
                        expected: candle.timestamp - candle.timestamp.rem_euclid(base),
                        got: candle.timestamp,
                    });
                }
            }
            Some(expected) => {
                if candle.timestamp != expected {
                    return Err(ReplayError::Sequence {
                        symbol: self.symbol.clone(),
                        expected,
                        got: candle.timestamp,
                    });
                }
            }
        }
        self.expected_timestamp = Some(candle.timestamp + base);
        self.last_candle = Some(candle);
        self.base_candles.push(candle);

        for (timeframe, series) in &mut self.derived {
            let step = (timeframe.secs() / base) as usize;
            let completes_window = (candle.timestamp + base) % timeframe.secs() == 0;
            if completes_window && self.base_candles.len() >= step {
                let window = &self.base_candles[self.base_candles.len() - step..];
                let aggregated = aggregate_window(window);
                trace!(
                    symbol = %self.symbol,
                    timeframe = %timeframe,
                    timestamp = aggregated.timestamp,
                    "derived candle closed"
                );
                series.push(aggregated);
            }
        }
        Ok(())
    }

    /// The most recent `limit` candles of the base or a derived series, in
    /// chronological order. Returns all available candles when fewer than
    /// `limit` exist; callers needing a minimum history check the length
    /// themselves.
    pub fn window(&self, timeframe: Timeframe, limit: usize) -> Result<&[Candle], ReplayError> {
        let series = if timeframe == self.base_timeframe {
            &self.base_candles
        } else {
            self.derived
                .get(&timeframe)
                .ok_or(ReplayError::UnknownTimeframe {
                    symbol: self.symbol.clone(),
                    timeframe,
                })?
        };
        let start = series.len().saturating_sub(limit);
        Ok(&series[start..])
    }

    /// Number of candles produced for a timeframe so far
    pub fn series_len(&self, timeframe: Timeframe) -> Result<usize, ReplayError> {
        self.window(timeframe, usize::MAX).map(<[Candle]>::len)
    }
}

/// Collapse a complete window of base candles into one derived candle
fn aggregate_window(window: &[Candle]) -> Candle {
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let volume = window.iter().map(|c| c.volume).sum();
    Candle::new_unchecked(
        window[0].timestamp,
        window[0].open,
        high,
        low,
        window[window.len() - 1].close,
        volume,
    )
}
