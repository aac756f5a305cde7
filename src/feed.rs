//! Replay data loading
//!
//! Loads per-symbol OHLCV history from CSV files and zips it into per-tick
//! candle batches for the replay loop. Every symbol must cover the same
//! timestamps: the feed is the driver that guarantees all symbols advance to
//! the same clock before any symbol advances further.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::market::CandleBatch;
use crate::{Candle, Symbol};

/// Load OHLCV candles from a CSV file with validation
///
/// Expected columns: `timestamp,open,high,low,close,volume` with a header
/// row. Timestamps are Unix seconds; an RFC 3339 / `%Y-%m-%d %H:%M:%S`
/// datetime string is accepted as a fallback.
pub fn load_candles(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let ts_str = record.get(0).context("Missing timestamp column")?;
        let timestamp = parse_timestamp(ts_str)
            .with_context(|| format!("Failed to parse timestamp: {}", ts_str))?;

        let field = |idx: usize, name: &'static str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {name} column"))?
                .parse()
                .with_context(|| format!("Failed to parse {name}"))
        };
        let open = field(1, "open")?;
        let high = field(2, "high")?;
        let low = field(3, "low")?;
        let close = field(4, "close")?;
        let volume = field(5, "volume")?;

        let candle = Candle::new(timestamp, open, high, low, close, volume)
            .map_err(|e| anyhow!("Invalid candle at row {}: {}", row_idx + 1, e))?;
        candles.push(candle);
    }

    Ok(candles)
}

fn parse_timestamp(s: &str) -> Result<i64> {
    if let Ok(seconds) = s.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt.timestamp());
    }
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp())
}

/// An ordered sequence of per-tick candle batches, one candle per symbol
pub struct ReplayFeed {
    batches: Vec<CandleBatch>,
}

impl ReplayFeed {
    /// Load `<SYMBOL>.csv` for every symbol from `dir` and align them into
    /// per-tick batches. All series must have the same length and identical
    /// timestamps row by row.
    pub fn from_dir(dir: impl AsRef<Path>, symbols: &[Symbol]) -> Result<Self> {
        let dir = dir.as_ref();
        let mut series: BTreeMap<Symbol, Vec<Candle>> = BTreeMap::new();
        for symbol in symbols {
            let path = dir.join(format!("{}.csv", symbol));
            let candles = load_candles(&path)?;
            info!(symbol = %symbol, candles = candles.len(), "loaded history");
            series.insert(symbol.clone(), candles);
        }
        Self::from_series(series)
    }

    /// Align already-loaded per-symbol histories into per-tick batches
    pub fn from_series(series: BTreeMap<Symbol, Vec<Candle>>) -> Result<Self> {
        let Some(expected_len) = series.values().map(Vec::len).next() else {
            return Ok(Self { batches: Vec::new() });
        };
        for (symbol, candles) in &series {
            if candles.len() != expected_len {
                bail!(
                    "history length mismatch: {} has {} candles, expected {}",
                    symbol,
                    candles.len(),
                    expected_len
                );
            }
        }

        let mut batches = Vec::with_capacity(expected_len);
        for row in 0..expected_len {
            let mut batch = CandleBatch::new();
            let mut tick_timestamp = None;
            for (symbol, candles) in &series {
                let candle = candles[row];
                match tick_timestamp {
                    None => tick_timestamp = Some(candle.timestamp),
                    Some(expected) if candle.timestamp != expected => bail!(
                        "timestamp mismatch at row {}: {} has {}, expected {}",
                        row + 1,
                        symbol,
                        candle.timestamp,
                        expected
                    ),
                    Some(_) => {}
                }
                batch.insert(symbol.clone(), candle);
            }
            batches.push(batch);
        }
        Ok(Self { batches })
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandleBatch> {
        self.batches.iter()
    }
}

impl IntoIterator for ReplayFeed {
    type Item = CandleBatch;
    type IntoIter = std::vec::IntoIter<CandleBatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}
