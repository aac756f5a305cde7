//! Core data types used across the replay engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors raised by [`Candle::new`]
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("candle field '{0}' is not finite")]
    NonFinite(&'static str),

    #[error("candle high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    #[error("candle open {open} / close {close} outside range [{low}, {high}]")]
    BodyOutsideRange {
        open: f64,
        close: f64,
        low: f64,
        high: f64,
    },

    #[error("candle volume {0} is negative")]
    NegativeVolume(f64),
}

/// OHLCV candlestick data
///
/// Timestamps are whole seconds since the Unix epoch, aligned to the candle's
/// timeframe. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a candle, validating OHLCV sanity
    pub fn new(
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        for (name, value) in [
            ("open", open),
            ("high", high),
            ("low", low),
            ("close", close),
            ("volume", volume),
        ] {
            if !value.is_finite() {
                return Err(CandleValidationError::NonFinite(name));
            }
        }
        if high < low {
            return Err(CandleValidationError::HighBelowLow { high, low });
        }
        if open < low || open > high || close < low || close > high {
            return Err(CandleValidationError::BodyOutsideRange {
                open,
                close,
                low,
                high,
            });
        }
        if volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(volume));
        }
        Ok(Self::new_unchecked(timestamp, open, high, low, close, volume))
    }

    /// Create a candle without validation (trusted internal data)
    pub fn new_unchecked(
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Candle timestamp as a chrono datetime, for display and logging
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }

    /// Whether `price` lies within this candle's traded range
    pub fn touches(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sign factor: +1 for buy/long, -1 for sell/short
    pub fn factor(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Candle interval in whole seconds
///
/// Parses from and displays as the compact exchange notation ("1m", "4h",
/// "1d"). Derived timeframes must be whole multiples of a symbol's base
/// timeframe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe(u32);

impl Timeframe {
    pub const MIN1: Timeframe = Timeframe(60);
    pub const MIN5: Timeframe = Timeframe(5 * 60);
    pub const MIN15: Timeframe = Timeframe(15 * 60);
    pub const MIN30: Timeframe = Timeframe(30 * 60);
    pub const HOUR1: Timeframe = Timeframe(60 * 60);
    pub const HOUR2: Timeframe = Timeframe(2 * 60 * 60);
    pub const HOUR4: Timeframe = Timeframe(4 * 60 * 60);
    pub const HOUR6: Timeframe = Timeframe(6 * 60 * 60);
    pub const HOUR8: Timeframe = Timeframe(8 * 60 * 60);
    pub const HOUR12: Timeframe = Timeframe(12 * 60 * 60);
    pub const DAY1: Timeframe = Timeframe(24 * 60 * 60);
    pub const DAY3: Timeframe = Timeframe(3 * 24 * 60 * 60);
    pub const WEEK1: Timeframe = Timeframe(7 * 24 * 60 * 60);
    pub const MON1: Timeframe = Timeframe(30 * 24 * 60 * 60);

    /// Create a timeframe from a duration in seconds (must be positive)
    pub fn from_secs(secs: u32) -> Option<Self> {
        if secs == 0 {
            None
        } else {
            Some(Timeframe(secs))
        }
    }

    /// Duration in seconds
    pub fn secs(&self) -> i64 {
        self.0 as i64
    }

    /// Whether `self` is a whole multiple of `base`
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        self.0 % base.0 == 0
    }
}

const TIMEFRAME_UNITS: &[(&str, u32)] = &[
    ("M", 30 * 24 * 60 * 60),
    ("w", 7 * 24 * 60 * 60),
    ("d", 24 * 60 * 60),
    ("h", 60 * 60),
    ("m", 60),
    ("s", 1),
];

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (suffix, unit) in TIMEFRAME_UNITS {
            if self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        unreachable!("the 's' unit divides everything")
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, suffix) = s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8));
        let unit = TIMEFRAME_UNITS
            .iter()
            .find(|(u, _)| *u == suffix)
            .map(|(_, secs)| *secs)
            .ok_or_else(|| format!("unknown timeframe unit in '{}'", s))?;
        let count: u32 = digits
            .parse()
            .map_err(|_| format!("invalid timeframe '{}'", s))?;
        Timeframe::from_secs(count * unit).ok_or_else(|| format!("zero-length timeframe '{}'", s))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.to_string()
    }
}

/// Round to `dp` decimal places
pub fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_validation() {
        assert!(Candle::new(0, 100.0, 102.0, 99.0, 101.0, 10.0).is_ok());
        assert!(matches!(
            Candle::new(0, 100.0, 98.0, 99.0, 98.5, 10.0),
            Err(CandleValidationError::HighBelowLow { .. })
        ));
        assert!(matches!(
            Candle::new(0, 105.0, 102.0, 99.0, 101.0, 10.0),
            Err(CandleValidationError::BodyOutsideRange { .. })
        ));
        assert!(matches!(
            Candle::new(0, 100.0, 102.0, 99.0, 101.0, -1.0),
            Err(CandleValidationError::NegativeVolume(_))
        ));
        assert!(matches!(
            Candle::new(0, f64::NAN, 102.0, 99.0, 101.0, 1.0),
            Err(CandleValidationError::NonFinite("open"))
        ));
    }

    #[test]
    fn test_candle_touches() {
        let candle = Candle::new_unchecked(0, 100.0, 102.0, 99.0, 101.0, 10.0);
        assert!(candle.touches(99.0));
        assert!(candle.touches(102.0));
        assert!(candle.touches(100.5));
        assert!(!candle.touches(98.9));
        assert!(!candle.touches(102.1));
    }

    #[test]
    fn test_side_factor() {
        assert_eq!(Side::Buy.factor(), 1.0);
        assert_eq!(Side::Sell.factor(), -1.0);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn test_timeframe_parse_and_display() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::MIN1);
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::MIN5);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::HOUR4);
        assert_eq!("1d".parse::<Timeframe>().unwrap(), Timeframe::DAY1);
        assert_eq!("90s".parse::<Timeframe>().unwrap().secs(), 90);
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("5x".parse::<Timeframe>().is_err());
        assert!("m".parse::<Timeframe>().is_err());

        assert_eq!(Timeframe::MIN5.to_string(), "5m");
        assert_eq!(Timeframe::HOUR1.to_string(), "1h");
        assert_eq!(Timeframe::from_secs(90).unwrap().to_string(), "90s");
    }

    #[test]
    fn test_timeframe_multiples() {
        assert!(Timeframe::MIN5.is_multiple_of(Timeframe::MIN1));
        assert!(!Timeframe::from_secs(90).unwrap().is_multiple_of(Timeframe::MIN1));
    }

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(1.23456, 2), 1.23);
        assert_eq!(round_dp(2.5, 0), 3.0);
        assert_eq!(round_dp(104.0, 2), 104.0);
    }
}
