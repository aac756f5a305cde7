//! Order and position data model
//!
//! Orders carry a percentage of position size rather than an absolute
//! quantity; a position is the ordered accumulation of its filled entry and
//! exit orders, with every derived figure (weighted prices, run-up, drawdown)
//! computed from those fills.

use crate::{round_dp, Side, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Order ID type - u64 for performance
pub type OrderId = u64;

/// Position ID type
pub type PositionId = u64;

/// Atomic counters for fast ID generation
static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static POSITION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate next order ID (thread-safe, lock-free)
pub fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Generate next position ID
pub fn next_position_id() -> PositionId {
    POSITION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Cumulative exit percentage at which a position counts as fully closed.
/// Percentages are f64, so the comparison carries a small tolerance.
pub(crate) const FULL_EXIT_PERCENTAGE: f64 = 100.0 - 1e-9;

/// Order type, implied by which prices are present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// No prices: fills unconditionally at the next candle's open
    Market,

    /// Limit price only: fills when the candle range touches the limit price
    Limit,

    /// Stop price only: activates on touch, then fills at the candle open
    StopMarket,

    /// Both prices: activates on stop touch, then fills on limit touch
    StopLimit,
}

impl OrderType {
    pub fn from_prices(limit_price: Option<f64>, stop_price: Option<f64>) -> Self {
        match (limit_price, stop_price) {
            (None, None) => OrderType::Market,
            (Some(_), None) => OrderType::Limit,
            (None, Some(_)) => OrderType::StopMarket,
            (Some(_), Some(_)) => OrderType::StopLimit,
        }
    }
}

/// Order lifecycle state
///
/// Created `Open`; transitions to exactly one terminal state and is
/// immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

/// A single pending or resolved instruction against a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique, monotonic order ID
    pub id: OrderId,

    pub strategy_id: u32,
    pub symbol: Symbol,
    pub timeframe: Timeframe,

    pub side: Side,

    /// Fraction of position size in (0, 100]
    pub percentage: f64,

    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,

    /// Reduce-only orders can only shrink an existing position
    pub reduce_only: bool,

    pub comment: String,

    /// Stop orders start inactive and activate when the stop price is touched
    pub activated: bool,

    pub status: OrderStatus,
    pub open_timestamp: i64,
    pub close_timestamp: Option<i64>,
    pub filled_price: Option<f64>,
}

impl Order {
    pub fn order_type(&self) -> OrderType {
        OrderType::from_prices(self.limit_price, self.stop_price)
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    pub fn open_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.open_timestamp, 0).unwrap_or_default()
    }

    pub fn close_datetime(&self) -> Option<DateTime<Utc>> {
        self.close_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// A derived position figure that is normally computed from fills but can be
/// pinned to an externally supplied value (e.g. a restored position summary).
/// Resolved through a single accessor instead of ad-hoc `None` checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Overridable<T> {
    Computed,
    Overridden(T),
}

impl<T> Default for Overridable<T> {
    fn default() -> Self {
        Overridable::Computed
    }
}

impl<T: Copy> Overridable<T> {
    /// Resolve to the override, or compute
    pub fn resolve(&self, compute: impl FnOnce() -> T) -> T {
        match self {
            Overridable::Overridden(value) => *value,
            Overridable::Computed => compute(),
        }
    }

    /// Resolve to the override, or compute (possibly absent)
    pub fn resolve_or(&self, compute: impl FnOnce() -> Option<T>) -> Option<T> {
        match self {
            Overridable::Overridden(value) => Some(*value),
            Overridable::Computed => compute(),
        }
    }
}

/// Externally supplied position figures; any field left `Computed` keeps the
/// fill-derived answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSummary {
    pub side: Overridable<Side>,
    pub entry_timestamp: Overridable<i64>,
    pub entry_percentage: Overridable<f64>,
    pub entry_price: Overridable<f64>,
    pub exit_timestamp: Overridable<i64>,
    pub exit_price: Overridable<f64>,
    pub profit_ratio: Overridable<f64>,
    pub run_up_ratio: Overridable<f64>,
    pub drawdown_ratio: Overridable<f64>,
}

/// Accumulated exposure for one (strategy, symbol, timeframe) key
///
/// Opens the instant its first entry order fills and closes the instant the
/// cumulative exit percentage reaches 100. Price extremes accrue every tick
/// the position exists, so run-up and drawdown reflect the full excursion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub strategy_id: u32,
    pub symbol: Symbol,
    pub timeframe: Timeframe,

    /// Decimal places for price rounding, from the symbol configuration
    pub price_precision: u32,

    /// Filled entry orders, in fill order
    pub entry_orders: Vec<Order>,

    /// Filled exit orders, in fill order
    pub exit_orders: Vec<Order>,

    pub max_price_seen: f64,
    pub min_price_seen: f64,

    summary: PositionSummary,
}

impl Position {
    pub fn new(
        strategy_id: u32,
        symbol: Symbol,
        timeframe: Timeframe,
        price_precision: u32,
    ) -> Self {
        Self {
            id: next_position_id(),
            strategy_id,
            symbol,
            timeframe,
            price_precision,
            entry_orders: Vec::new(),
            exit_orders: Vec::new(),
            max_price_seen: f64::NEG_INFINITY,
            min_price_seen: f64::INFINITY,
            summary: PositionSummary::default(),
        }
    }

    /// Restore a position from an external summary; overridden fields win
    /// over fill-derived answers in every accessor.
    pub fn with_summary(
        strategy_id: u32,
        symbol: Symbol,
        timeframe: Timeframe,
        price_precision: u32,
        summary: PositionSummary,
    ) -> Self {
        let mut position = Self::new(strategy_id, symbol, timeframe, price_precision);
        position.summary = summary;
        position
    }

    /// Absorb a tick's candle range into the tracked extremes
    pub fn track_range(&mut self, high: f64, low: f64) {
        self.max_price_seen = self.max_price_seen.max(high);
        self.min_price_seen = self.min_price_seen.min(low);
    }

    pub fn record_entry(&mut self, order: Order) {
        self.entry_orders.push(order);
    }

    pub fn record_exit(&mut self, order: Order) {
        self.exit_orders.push(order);
    }

    /// Position side, derived from the first entry fill
    pub fn side(&self) -> Option<Side> {
        self.summary
            .side
            .resolve_or(|| self.entry_orders.first().map(|o| o.side))
    }

    pub fn entry_timestamp(&self) -> Option<i64> {
        self.summary
            .entry_timestamp
            .resolve_or(|| self.entry_orders.first().and_then(|o| o.close_timestamp))
    }

    pub fn entry_datetime(&self) -> Option<DateTime<Utc>> {
        self.entry_timestamp()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Cumulative entry percentage in [0, 100]
    pub fn entry_percentage(&self) -> f64 {
        self.summary
            .entry_percentage
            .resolve(|| self.entry_orders.iter().map(|o| o.percentage).sum())
    }

    /// Percentage-weighted average entry price, rounded to the symbol's
    /// price precision. `None` until the first entry fill.
    pub fn entry_price(&self) -> Option<f64> {
        self.summary
            .entry_price
            .resolve_or(|| weighted_price(&self.entry_orders, self.price_precision))
    }

    /// Cumulative exit percentage in [0, 100]
    pub fn exit_percentage(&self) -> f64 {
        self.exit_orders.iter().map(|o| o.percentage).sum()
    }

    /// Percentage-weighted average exit price. `None` until the first exit
    /// fill.
    pub fn exit_price(&self) -> Option<f64> {
        self.summary
            .exit_price
            .resolve_or(|| weighted_price(&self.exit_orders, self.price_precision))
    }

    /// Timestamp of the closing fill; only defined once fully closed
    pub fn exit_timestamp(&self) -> Option<i64> {
        self.summary.exit_timestamp.resolve_or(|| {
            if self.is_closed() {
                self.exit_orders.last().and_then(|o| o.close_timestamp)
            } else {
                None
            }
        })
    }

    pub fn exit_datetime(&self) -> Option<DateTime<Utc>> {
        self.exit_timestamp()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Open from the first entry fill until the exit percentage reaches 100
    pub fn is_open(&self) -> bool {
        !self.entry_orders.is_empty() && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.exit_percentage() >= FULL_EXIT_PERCENTAGE
    }

    /// Realized profit as a signed ratio of entry price (0.05 = +5%),
    /// rounded to 4 decimal places. `None` until both prices exist.
    pub fn profit_ratio(&self) -> Option<f64> {
        self.summary.profit_ratio.resolve_or(|| {
            let entry = self.entry_price()?;
            let exit = self.exit_price()?;
            let side = self.side()?;
            Some(round_dp((exit / entry - 1.0) * side.factor(), 4))
        })
    }

    /// Most favorable excursion while open, as a signed ratio of entry price
    pub fn run_up_ratio(&self) -> Option<f64> {
        self.summary
            .run_up_ratio
            .resolve_or(|| self.excursion_ratio(true))
    }

    /// Most unfavorable excursion while open, as a signed ratio of entry price
    pub fn drawdown_ratio(&self) -> Option<f64> {
        self.summary
            .drawdown_ratio
            .resolve_or(|| self.excursion_ratio(false))
    }

    fn excursion_ratio(&self, favorable: bool) -> Option<f64> {
        let entry = self.entry_price()?;
        let side = self.side()?;
        let long = side == Side::Buy;
        let extreme = if favorable == long {
            self.max_price_seen
        } else {
            self.min_price_seen
        };
        if !extreme.is_finite() {
            return None;
        }
        Some(round_dp((extreme / entry - 1.0) * side.factor(), 4))
    }

    /// Number of candles the position was held, in its own timeframe
    pub fn bars_held(&self) -> Option<i64> {
        let entry = self.entry_timestamp()?;
        let exit = self.exit_timestamp()?;
        Some((exit - entry) / self.timeframe.secs())
    }
}

fn weighted_price(orders: &[Order], price_precision: u32) -> Option<f64> {
    if orders.is_empty() {
        return None;
    }
    let total: f64 = orders.iter().map(|o| o.percentage).sum();
    if total <= 0.0 {
        return None;
    }
    let weighted_sum: f64 = orders
        .iter()
        .filter_map(|o| o.filled_price.map(|p| p * o.percentage))
        .sum();
    Some(round_dp(weighted_sum / total, price_precision))
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Position #{} {} {} {:?} entry={:?} exit={:?} profit={:?}",
            self.id,
            self.symbol,
            self.timeframe,
            self.side(),
            self.entry_price(),
            self.exit_price(),
            self.profit_ratio(),
        )
    }
}
