//! Typed errors for the replay core
//!
//! Every variant is a local, synchronous failure raised at the point of
//! violation. None are retried or swallowed: a broken invariant indicates a
//! driver or strategy bug, not a recoverable runtime condition.

use crate::{OrderId, Symbol, Timeframe};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Candle timestamp is non-monotonic or misaligned with the base timeframe
    #[error("candle for {symbol} out of sequence: expected timestamp {expected}, got {got}")]
    Sequence {
        symbol: Symbol,
        expected: i64,
        got: i64,
    },

    /// Order parameters cannot be represented
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Operation on an unknown or already-closed order id
    #[error("no open order with id {0}")]
    OrderNotFound(OrderId),

    /// Exit requested while no position is open
    #[error("no open position for {symbol} {timeframe}")]
    NoPosition { symbol: Symbol, timeframe: Timeframe },

    /// Query for a symbol that was never configured
    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),

    /// Query for a timeframe that was never configured for the symbol
    #[error("timeframe {timeframe} not configured for {symbol}")]
    UnknownTimeframe { symbol: Symbol, timeframe: Timeframe },

    /// An event handler failed; the tick aborts as a whole
    #[error("event handler failed: {0}")]
    Handler(anyhow::Error),
}
