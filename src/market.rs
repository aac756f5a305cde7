//! Simulation context: market data, strategies, engines, event wiring
//!
//! `MarketData` owns one aggregator per symbol plus the global replay clock
//! and exposes the query surface strategies use. `Market` wires configured
//! strategies to their trade engines and drives one fully synchronous tick
//! per base candle batch: aggregation, order matching, event dispatch and
//! strategy callbacks all complete for one symbol before the next advances.

use crate::aggregator::TimeframeAggregator;
use crate::config::{Config, MarketConfig};
use crate::error::ReplayError;
use crate::events::{Event, EventBus, EventKind};
use crate::oms::{Order, Position, TradeEngine};
use crate::strategies::{self, Action, Strategy, TickContext};
use crate::{Candle, Symbol, Timeframe};
use anyhow::Context;
use itertools::iproduct;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// One tick's worth of base candles, one per symbol, sharing a timestamp
pub type CandleBatch = BTreeMap<Symbol, Candle>;

/// All candle history plus the global replay clock
pub struct MarketData {
    base_timeframe: Timeframe,
    timestamp: Option<i64>,
    series: BTreeMap<Symbol, TimeframeAggregator>,
}

impl MarketData {
    pub fn new(config: &MarketConfig) -> Self {
        let series = config
            .pairs
            .iter()
            .map(|pair| {
                let symbol = Symbol::new(&pair.symbol);
                let aggregator = TimeframeAggregator::new(
                    symbol.clone(),
                    pair.price_precision,
                    pair.quantity_precision,
                    config.time_frame,
                    &config.time_frames,
                );
                (symbol, aggregator)
            })
            .collect();
        Self {
            base_timeframe: config.time_frame,
            timestamp: None,
            series,
        }
    }

    /// Advance the clock and every symbol's series by one base candle.
    /// All candles in a batch must share the same timestamp.
    pub fn advance(&mut self, batch: &CandleBatch) -> Result<(), ReplayError> {
        let mut tick_timestamp = None;
        for (symbol, candle) in batch {
            match tick_timestamp {
                None => tick_timestamp = Some(candle.timestamp),
                Some(expected) if candle.timestamp != expected => {
                    return Err(ReplayError::Sequence {
                        symbol: symbol.clone(),
                        expected,
                        got: candle.timestamp,
                    })
                }
                Some(_) => {}
            }
            self.series
                .get_mut(symbol)
                .ok_or_else(|| ReplayError::UnknownSymbol(symbol.clone()))?
                .advance(*candle)?;
        }
        if tick_timestamp.is_some() {
            self.timestamp = tick_timestamp;
        }
        Ok(())
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.base_timeframe
    }

    /// Current replay timestamp; 0 before the first tick
    pub fn timestamp(&self) -> i64 {
        self.timestamp.unwrap_or(0)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.series.keys()
    }

    fn aggregator(&self, symbol: &Symbol) -> Result<&TimeframeAggregator, ReplayError> {
        self.series
            .get(symbol)
            .ok_or_else(|| ReplayError::UnknownSymbol(symbol.clone()))
    }

    /// Latest base candle for a symbol, if any ticks have been replayed
    pub fn last_candle(&self, symbol: &Symbol) -> Option<&Candle> {
        self.series.get(symbol).and_then(TimeframeAggregator::last_candle)
    }

    /// Whether the latest candle's range touches `price`
    pub fn is_price_touched(&self, symbol: &Symbol, price: f64) -> bool {
        self.last_candle(symbol).is_some_and(|c| c.touches(price))
    }

    /// Market price for fills: the latest candle's open
    pub fn market_price(&self, symbol: &Symbol) -> Option<f64> {
        self.last_candle(symbol).map(|c| c.open)
    }

    /// The most recent `limit` candles of a symbol's series (§4.1 semantics)
    pub fn window(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<&[Candle], ReplayError> {
        self.aggregator(symbol)?.window(timeframe, limit)
    }

    pub fn price_precision(&self, symbol: &Symbol) -> Result<u32, ReplayError> {
        self.aggregator(symbol).map(TimeframeAggregator::price_precision)
    }

    pub fn quantity_precision(&self, symbol: &Symbol) -> Result<u32, ReplayError> {
        self.aggregator(symbol)
            .map(TimeframeAggregator::quantity_precision)
    }
}

/// An action queued by an event callback, routed to its engine at the next
/// safe point of the current tick
struct DeferredAction {
    symbol: Symbol,
    timeframe: Timeframe,
    action: Action,
}

/// One configured strategy with its engines, one per (symbol, timeframe)
struct StrategyRunner {
    id: u32,
    name: String,
    strategy: Rc<RefCell<Box<dyn Strategy>>>,
    deferred: Rc<RefCell<Vec<DeferredAction>>>,
    candles_limit: usize,
    engines: Vec<((Symbol, Timeframe), TradeEngine)>,
}

impl StrategyRunner {
    /// One full tick for this strategy: every engine matches against the new
    /// candle, then the strategy is consulted for each (symbol, timeframe)
    /// whose window the clock has crossed.
    fn tick(&mut self, data: &MarketData, bus: &mut EventBus) -> Result<(), ReplayError> {
        let now = data.timestamp();
        self.drain_deferred(bus, now)?;

        for index in 0..self.engines.len() {
            let candle = {
                let ((symbol, _), engine) = &mut self.engines[index];
                engine.set_clock(now);
                match data.last_candle(symbol) {
                    Some(candle) => *candle,
                    None => continue,
                }
            };
            self.engines[index].1.tick(&candle, bus)?;
            self.drain_deferred(bus, now)?;

            let timeframe = self.engines[index].0 .1;
            if now % timeframe.secs() == 0 {
                let actions = self.consult_strategy(index, data)?;
                for action in actions {
                    self.apply_action(index, action, bus)?;
                }
                self.drain_deferred(bus, now)?;
            }
        }
        Ok(())
    }

    fn consult_strategy(
        &self,
        index: usize,
        data: &MarketData,
    ) -> Result<Vec<Action>, ReplayError> {
        let ((symbol, timeframe), engine) = &self.engines[index];
        let candles = data.window(symbol, *timeframe, self.candles_limit)?;
        let open_orders: Vec<Order> = engine.open_orders().cloned().collect();
        let ctx = TickContext {
            symbol,
            timeframe: *timeframe,
            candles,
            position: engine.position(),
            open_orders: &open_orders,
            market: data,
        };
        Ok(self.strategy.borrow_mut().on_tick(&ctx))
    }

    fn apply_action(
        &mut self,
        index: usize,
        action: Action,
        bus: &mut EventBus,
    ) -> Result<(), ReplayError> {
        let engine = &mut self.engines[index].1;
        match action {
            Action::Entry {
                side,
                percentage,
                limit_price,
                stop_price,
                comment,
            } => {
                engine.entry(side, percentage, limit_price, stop_price, comment, bus)?;
            }
            Action::Exit {
                percentage,
                limit_price,
                stop_price,
                comment,
            } => {
                engine.exit(percentage, limit_price, stop_price, comment, bus)?;
            }
            Action::Cancel { order_id } => {
                engine.cancel_order(order_id, bus)?;
            }
            Action::CancelAll => {
                engine.cancel_all_orders(bus)?;
            }
        }
        Ok(())
    }

    /// Apply actions queued by event callbacks. Applying an action can
    /// publish events that queue further actions, so loop until quiet.
    fn drain_deferred(&mut self, bus: &mut EventBus, now: i64) -> Result<(), ReplayError> {
        loop {
            let pending: Vec<DeferredAction> =
                self.deferred.borrow_mut().drain(..).collect();
            if pending.is_empty() {
                return Ok(());
            }
            for deferred in pending {
                let index = self
                    .engines
                    .iter()
                    .position(|((symbol, timeframe), _)| {
                        *symbol == deferred.symbol && *timeframe == deferred.timeframe
                    })
                    .ok_or_else(|| ReplayError::UnknownSymbol(deferred.symbol.clone()))?;
                self.engines[index].1.set_clock(now);
                self.apply_action(index, deferred.action, bus)?;
            }
        }
    }
}

/// The simulated exchange: configured pairs, strategies and event wiring
pub struct Market {
    data: MarketData,
    bus: EventBus,
    runners: Vec<StrategyRunner>,
    closed_positions: Rc<RefCell<Vec<Position>>>,
}

impl Market {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let data = MarketData::new(&config.market);
        let mut bus = EventBus::new();

        // Ordered ledger of every closed position, consumed by reporting
        let closed_positions = Rc::new(RefCell::new(Vec::new()));
        let ledger = Rc::clone(&closed_positions);
        bus.subscribe(
            EventKind::ClosedPosition,
            Box::new(move |event| {
                if let Event::ClosedPosition(position) = event {
                    ledger.borrow_mut().push(position.clone());
                }
                Ok(())
            }),
        );

        let mut runners = Vec::with_capacity(config.strategies.len());
        for strategy_config in &config.strategies {
            let mut strategy = strategies::create_strategy(&strategy_config.name)?;
            strategy
                .configure(&strategy_config.params)
                .with_context(|| {
                    format!("configuring strategy '{}'", strategy_config.name)
                })?;
            let strategy = Rc::new(RefCell::new(strategy));
            let deferred: Rc<RefCell<Vec<DeferredAction>>> = Rc::new(RefCell::new(Vec::new()));

            // Route subscribed events into the strategy; any actions it
            // returns are queued for its own engine on the event's
            // (symbol, timeframe). Events from other strategies are
            // observable but cannot drive actions.
            for kind in strategy.borrow().subscriptions() {
                let strategy = Rc::clone(&strategy);
                let deferred = Rc::clone(&deferred);
                let strategy_id = strategy_config.id;
                bus.subscribe(
                    *kind,
                    Box::new(move |event| {
                        let actions = strategy.borrow_mut().on_event(event);
                        if actions.is_empty() {
                            return Ok(());
                        }
                        let (owner, symbol, timeframe) = match (event.order(), event.position()) {
                            (Some(order), _) => {
                                (order.strategy_id, order.symbol.clone(), order.timeframe)
                            }
                            (_, Some(position)) => (
                                position.strategy_id,
                                position.symbol.clone(),
                                position.timeframe,
                            ),
                            _ => unreachable!("every event carries an order or a position"),
                        };
                        if owner != strategy_id {
                            warn!(
                                strategy = strategy_id,
                                event_owner = owner,
                                "dropping actions queued for another strategy's event"
                            );
                            return Ok(());
                        }
                        deferred
                            .borrow_mut()
                            .extend(actions.into_iter().map(|action| DeferredAction {
                                symbol: symbol.clone(),
                                timeframe,
                                action,
                            }));
                        Ok(())
                    }),
                );
            }

            let mut engines = Vec::new();
            for (symbol_name, timeframe) in
                iproduct!(&strategy_config.symbols, &strategy_config.time_frames)
            {
                let symbol = Symbol::new(symbol_name);
                let price_precision = data.price_precision(&symbol)?;
                engines.push((
                    (symbol.clone(), *timeframe),
                    TradeEngine::new(strategy_config.id, symbol, *timeframe, price_precision),
                ));
            }

            info!(
                id = strategy_config.id,
                name = %strategy_config.name,
                engines = engines.len(),
                "strategy configured"
            );
            runners.push(StrategyRunner {
                id: strategy_config.id,
                name: strategy_config.name.clone(),
                strategy,
                deferred,
                candles_limit: strategy_config.candles_limit,
                engines,
            });
        }

        Ok(Self {
            data,
            bus,
            runners,
            closed_positions,
        })
    }

    /// One global tick: all symbols advance to the batch timestamp, then
    /// every strategy evaluates in configuration order.
    pub fn next(&mut self, batch: &CandleBatch) -> Result<(), ReplayError> {
        self.data.advance(batch)?;
        debug!(timestamp = self.data.timestamp(), symbols = batch.len(), "tick");
        for runner in &mut self.runners {
            runner.tick(&self.data, &mut self.bus)?;
        }
        Ok(())
    }

    pub fn data(&self) -> &MarketData {
        &self.data
    }

    pub fn timestamp(&self) -> i64 {
        self.data.timestamp()
    }

    /// Register an external observer for a lifecycle event kind
    pub fn subscribe(&mut self, kind: EventKind, handler: crate::events::EventHandler) {
        self.bus.subscribe(kind, handler);
    }

    /// Every position closed so far, in close order
    pub fn closed_positions(&self) -> Vec<Position> {
        self.closed_positions.borrow().clone()
    }

    /// Open positions across all strategies, in configuration order
    pub fn open_positions(&self) -> Vec<Position> {
        self.runners
            .iter()
            .flat_map(|runner| {
                runner
                    .engines
                    .iter()
                    .map(|(_, engine)| engine.position())
                    .filter(|position| position.is_open())
                    .cloned()
            })
            .collect()
    }

    /// Names and ids of the configured strategies, in configuration order
    pub fn strategy_names(&self) -> Vec<(u32, String)> {
        self.runners
            .iter()
            .map(|runner| (runner.id, runner.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataConfig, PairConfig, StrategyConfig};
    use crate::strategies::register_strategy;
    use crate::Side;

    fn market_config() -> MarketConfig {
        MarketConfig {
            time_frame: Timeframe::MIN1,
            time_frames: vec![Timeframe::MIN5],
            pairs: vec![
                PairConfig {
                    symbol: "BTCUSDT".to_string(),
                    price_precision: 2,
                    quantity_precision: 3,
                },
                PairConfig {
                    symbol: "ETHUSDT".to_string(),
                    price_precision: 2,
                    quantity_precision: 3,
                },
            ],
        }
    }

    fn batch(timestamp: i64, btc_open: f64, eth_open: f64) -> CandleBatch {
        let mut batch = CandleBatch::new();
        batch.insert(
            Symbol::new("BTCUSDT"),
            Candle::new_unchecked(timestamp, btc_open, btc_open + 2.0, btc_open - 2.0, btc_open + 1.0, 10.0),
        );
        batch.insert(
            Symbol::new("ETHUSDT"),
            Candle::new_unchecked(timestamp, eth_open, eth_open + 1.0, eth_open - 1.0, eth_open + 0.5, 5.0),
        );
        batch
    }

    #[test]
    fn test_market_data_clock_and_queries() {
        let mut data = MarketData::new(&market_config());
        assert_eq!(data.timestamp(), 0);
        assert!(data.last_candle(&Symbol::new("BTCUSDT")).is_none());

        data.advance(&batch(0, 100.0, 50.0)).unwrap();
        data.advance(&batch(60, 101.0, 51.0)).unwrap();

        assert_eq!(data.timestamp(), 60);
        assert_eq!(data.market_price(&Symbol::new("BTCUSDT")), Some(101.0));
        assert!(data.is_price_touched(&Symbol::new("BTCUSDT"), 102.0));
        assert!(!data.is_price_touched(&Symbol::new("BTCUSDT"), 110.0));
        assert_eq!(data.price_precision(&Symbol::new("ETHUSDT")).unwrap(), 2);
        assert_eq!(
            data.window(&Symbol::new("BTCUSDT"), Timeframe::MIN1, 10)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_market_data_rejects_mixed_timestamps() {
        let mut data = MarketData::new(&market_config());
        let mut bad = CandleBatch::new();
        bad.insert(
            Symbol::new("BTCUSDT"),
            Candle::new_unchecked(0, 100.0, 102.0, 98.0, 101.0, 10.0),
        );
        bad.insert(
            Symbol::new("ETHUSDT"),
            Candle::new_unchecked(60, 50.0, 51.0, 49.0, 50.5, 5.0),
        );
        assert!(matches!(
            data.advance(&bad).unwrap_err(),
            ReplayError::Sequence { .. }
        ));
    }

    #[test]
    fn test_market_data_rejects_unknown_symbol() {
        let mut data = MarketData::new(&market_config());
        let mut bad = CandleBatch::new();
        bad.insert(
            Symbol::new("DOGEUSDT"),
            Candle::new_unchecked(0, 1.0, 1.1, 0.9, 1.0, 10.0),
        );
        assert!(matches!(
            data.advance(&bad).unwrap_err(),
            ReplayError::UnknownSymbol(_)
        ));
    }

    /// Buys 100% at the first opportunity, exits once a position is open
    struct BuyOnce {
        bought: bool,
    }

    impl Strategy for BuyOnce {
        fn name(&self) -> &'static str {
            "test_buy_once"
        }

        fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action> {
            if !self.bought && !ctx.in_position() {
                self.bought = true;
                return vec![Action::market_entry(Side::Buy, 100.0)];
            }
            if ctx.in_position() {
                return vec![Action::market_exit(100.0)];
            }
            Vec::new()
        }
    }

    fn test_config() -> Config {
        Config {
            market: market_config(),
            strategies: vec![StrategyConfig {
                id: 1,
                name: "test_buy_once".to_string(),
                symbols: vec!["BTCUSDT".to_string()],
                time_frames: vec![Timeframe::MIN1],
                candles_limit: 10,
                params: serde_json::Value::Null,
            }],
            data: DataConfig::default(),
        }
    }

    #[test]
    fn test_full_order_lifecycle_through_market() {
        register_strategy("test_buy_once", || Box::new(BuyOnce { bought: false }));
        let mut market = Market::new(&test_config()).unwrap();

        // Tick 1: strategy submits a market buy (queued, not yet matched)
        market.next(&batch(0, 100.0, 50.0)).unwrap();
        assert!(market.closed_positions().is_empty());
        assert!(market.open_positions().is_empty());

        // Tick 2: the buy fills at the open; position opens; exit submitted
        market.next(&batch(60, 102.0, 50.0)).unwrap();
        assert_eq!(market.open_positions().len(), 1);
        assert_eq!(market.open_positions()[0].entry_price(), Some(102.0));

        // Tick 3: the exit fills; position closes into the ledger
        market.next(&batch(120, 104.0, 50.0)).unwrap();
        let closed = market.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].entry_price(), Some(102.0));
        assert_eq!(closed[0].exit_price(), Some(104.0));
        assert!(market.open_positions().is_empty());
    }
}
