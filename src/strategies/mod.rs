//! Strategy framework
//!
//! Strategies implement a trait interface and are created through a static
//! registry (name → factory) — concrete implementations registered at
//! startup, not runtime module loading. Strategies never mutate engines
//! directly: callbacks return [`Action`] values and the market applies them
//! after the callback returns, so orders placed mid-tick are queued and first
//! matched on the following tick.

pub mod sma_cross;

use crate::events::{Event, EventKind};
use crate::market::MarketData;
use crate::oms::{Order, OrderId, Position};
use crate::{Candle, Side, Symbol, Timeframe};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

// =============================================================================
// Strategy Trait - The contract all strategies must implement
// =============================================================================

/// Trading strategy interface.
///
/// `on_tick` fires once per closed candle of the strategy's own timeframe;
/// `on_event` fires synchronously for every subscribed lifecycle event.
pub trait Strategy {
    /// Strategy identifier (must match the config's strategy name)
    fn name(&self) -> &'static str;

    /// Apply the free-form `params` object from the configuration
    fn configure(&mut self, _params: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Lifecycle event kinds this strategy wants delivered to `on_event`
    fn subscriptions(&self) -> &'static [EventKind] {
        &[]
    }

    /// React to a subscribed lifecycle event. Returned actions are routed to
    /// this strategy's engine for the event's (symbol, timeframe) and queued
    /// into the open-order set; they are matched starting the next tick.
    fn on_event(&mut self, _event: &Event) -> Vec<Action> {
        Vec::new()
    }

    /// Evaluate the latest candle window and decide on actions
    fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action>;
}

/// Read-only view handed to `on_tick`
pub struct TickContext<'a> {
    pub symbol: &'a Symbol,
    pub timeframe: Timeframe,

    /// Most recent candles of the strategy's timeframe, oldest first,
    /// at most the configured candles-limit of them
    pub candles: &'a [Candle],

    /// The engine's current position (possibly still empty)
    pub position: &'a Position,

    /// Open orders of this (symbol, timeframe) engine, in submission order
    pub open_orders: &'a [Order],

    /// Market-wide query surface (other symbols, other timeframes)
    pub market: &'a MarketData,
}

impl TickContext<'_> {
    /// Latest base-resolution candle for the context symbol
    pub fn last_candle(&self) -> Option<&Candle> {
        self.market.last_candle(self.symbol)
    }

    /// Whether the strategy currently holds an open position here
    pub fn in_position(&self) -> bool {
        self.position.is_open()
    }
}

/// A strategy decision, applied to its trade engine by the market
#[derive(Debug, Clone)]
pub enum Action {
    Entry {
        side: Side,
        percentage: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        comment: String,
    },
    Exit {
        percentage: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        comment: String,
    },
    Cancel {
        order_id: OrderId,
    },
    CancelAll,
}

impl Action {
    /// Market entry for a fraction of position size
    pub fn market_entry(side: Side, percentage: f64) -> Self {
        Action::Entry {
            side,
            percentage,
            limit_price: None,
            stop_price: None,
            comment: String::new(),
        }
    }

    /// Limit entry at the given price
    pub fn limit_entry(side: Side, percentage: f64, limit_price: f64) -> Self {
        Action::Entry {
            side,
            percentage,
            limit_price: Some(limit_price),
            stop_price: None,
            comment: String::new(),
        }
    }

    /// Stop-market entry triggered at the given price
    pub fn stop_entry(side: Side, percentage: f64, stop_price: f64) -> Self {
        Action::Entry {
            side,
            percentage,
            limit_price: None,
            stop_price: Some(stop_price),
            comment: String::new(),
        }
    }

    /// Market exit of a fraction of the open position
    pub fn market_exit(percentage: f64) -> Self {
        Action::Exit {
            percentage,
            limit_price: None,
            stop_price: None,
            comment: String::new(),
        }
    }

    /// Stop-market exit (protective stop)
    pub fn stop_exit(percentage: f64, stop_price: f64) -> Self {
        Action::Exit {
            percentage,
            limit_price: None,
            stop_price: Some(stop_price),
            comment: String::new(),
        }
    }

    /// Attach a comment to an entry or exit action
    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Action::Entry { comment, .. } | Action::Exit { comment, .. } => *comment = text.into(),
            _ => {}
        }
        self
    }
}

// =============================================================================
// Strategy Registry - Static factory lookup, no runtime module loading
// =============================================================================

/// Factory function type for creating strategies
pub type StrategyFactory = fn() -> Box<dyn Strategy>;

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, StrategyFactory> = HashMap::new();
        map.insert("sma_cross", sma_cross::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create a strategy by registry name
pub fn create_strategy(name: &str) -> Result<Box<dyn Strategy>> {
    let registry = get_registry().read().unwrap();

    let factory = registry.get(name).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        anyhow::anyhow!("Unknown strategy: '{}'. Available: {}", name, available.join(", "))
    })?;

    Ok(factory())
}

/// Get list of available strategy names
pub fn available_strategies() -> Vec<&'static str> {
    let mut names: Vec<_> = get_registry().read().unwrap().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Register a new strategy (for extensions or testing)
pub fn register_strategy(name: &'static str, factory: StrategyFactory) {
    get_registry().write().unwrap().insert(name, factory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_bundled_strategies() {
        assert!(available_strategies().contains(&"sma_cross"));
        assert!(create_strategy("sma_cross").is_ok());
        assert!(create_strategy("nope").is_err());
    }

    #[test]
    fn test_register_strategy() {
        struct Noop;
        impl Strategy for Noop {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn on_tick(&mut self, _ctx: &TickContext) -> Vec<Action> {
                Vec::new()
            }
        }

        register_strategy("noop", || Box::new(Noop));
        assert_eq!(create_strategy("noop").unwrap().name(), "noop");
    }

    #[test]
    fn test_action_builders() {
        let entry = Action::limit_entry(Side::Buy, 50.0, 101.5).with_comment("scale-in");
        match entry {
            Action::Entry {
                side,
                percentage,
                limit_price,
                stop_price,
                comment,
            } => {
                assert_eq!(side, Side::Buy);
                assert_eq!(percentage, 50.0);
                assert_eq!(limit_price, Some(101.5));
                assert_eq!(stop_price, None);
                assert_eq!(comment, "scale-in");
            }
            other => panic!("expected entry action, got {other:?}"),
        }

        assert!(matches!(
            Action::stop_exit(100.0, 95.0),
            Action::Exit {
                stop_price: Some(_),
                ..
            }
        ));
    }
}
