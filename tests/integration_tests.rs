//! Integration tests for the market-replay system
//!
//! Covers the full tick pipeline end to end:
//! - multi-timeframe aggregation through the market query surface
//! - order/position lifecycle driven by real strategies
//! - mid-tick submission semantics (queued, matched next tick)
//! - event handler failure propagation
//! - reporting over the closed-position ledger

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use market_replay::config::{Config, DataConfig, MarketConfig, PairConfig, StrategyConfig};
use market_replay::strategies::{register_strategy, Action, Strategy, TickContext};
use market_replay::{
    Candle, CandleBatch, Event, EventKind, Market, ReplayFeed, Report, Side, Symbol, Timeframe,
};

// =============================================================================
// Test Data Generation
// =============================================================================

/// Generate a deterministic trending OHLCV series: ramps up, sells off, and
/// recovers, so crossover strategies trade several round trips.
fn generate_trending_candles(count: usize, base_price: f64) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(count);
    let mut price = base_price;

    for i in 0..count {
        let phase = (i * 6) / count.max(1);
        let trend = if phase % 2 == 0 { 0.004 } else { -0.005 };
        let noise = ((i * 17 + 31) % 100) as f64 / 100.0 - 0.5;
        price *= 1.0 + trend + noise * 0.002;

        let open = price;
        let close = price * (1.0 + trend / 2.0);
        let high = open.max(close) * 1.003;
        let low = open.min(close) * 0.997;
        candles.push(Candle::new_unchecked(
            i as i64 * 60,
            open,
            high,
            low,
            close,
            1_000.0 + (i % 7) as f64 * 100.0,
        ));
    }

    candles
}

fn single_pair_config(strategy: &str, timeframe: Timeframe, candles_limit: usize) -> Config {
    Config {
        market: MarketConfig {
            time_frame: Timeframe::MIN1,
            time_frames: vec![Timeframe::MIN5, Timeframe::MIN15],
            pairs: vec![PairConfig {
                symbol: "BTCUSDT".to_string(),
                price_precision: 2,
                quantity_precision: 3,
            }],
        },
        strategies: vec![StrategyConfig {
            id: 1,
            name: strategy.to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            time_frames: vec![timeframe],
            candles_limit,
            params: serde_json::Value::Null,
        }],
        data: DataConfig::default(),
    }
}

fn replay(market: &mut Market, candles: &[Candle]) {
    for candle in candles {
        let mut batch = CandleBatch::new();
        batch.insert(Symbol::new("BTCUSDT"), *candle);
        market.next(&batch).unwrap();
    }
}

// =============================================================================
// Multi-Timeframe Aggregation
// =============================================================================

static MTF_TICKS: AtomicUsize = AtomicUsize::new(0);

struct MtfRecorder;

impl Strategy for MtfRecorder {
    fn name(&self) -> &'static str {
        "itest_mtf_recorder"
    }

    fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action> {
        MTF_TICKS.fetch_add(1, Ordering::Relaxed);
        // The five-minute window only ever contains completed candles
        for pair in ctx.candles.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, 300);
        }
        Vec::new()
    }
}

#[test]
fn test_strategy_cadence_follows_its_timeframe() {
    register_strategy("itest_mtf_recorder", || Box::new(MtfRecorder));
    let config = single_pair_config("itest_mtf_recorder", Timeframe::MIN5, 50);
    let mut market = Market::new(&config).unwrap();

    MTF_TICKS.store(0, Ordering::Relaxed);
    let candles = generate_trending_candles(47, 100.0);
    replay(&mut market, &candles);

    // Base timestamps 0..2760; on_tick fires when ts % 300 == 0: ts = 0,
    // 300, ..., 2700 -> 10 invocations.
    assert_eq!(MTF_TICKS.load(Ordering::Relaxed), 10);

    // 47 base candles -> floor(47/5) five-minute candles, floor(47/15)
    // fifteen-minute candles, visible through the market query surface.
    let symbol = Symbol::new("BTCUSDT");
    let data = market.data();
    assert_eq!(data.window(&symbol, Timeframe::MIN5, 100).unwrap().len(), 9);
    assert_eq!(data.window(&symbol, Timeframe::MIN15, 100).unwrap().len(), 3);
    assert_eq!(data.window(&symbol, Timeframe::MIN1, 100).unwrap().len(), 47);

    let five_min = data.window(&symbol, Timeframe::MIN5, 100).unwrap();
    let base = data.window(&symbol, Timeframe::MIN1, 100).unwrap();
    for (i, derived) in five_min.iter().enumerate() {
        let window = &base[i * 5..(i + 1) * 5];
        assert_eq!(derived.open, window[0].open);
        assert_eq!(derived.close, window[4].close);
        assert_eq!(
            derived.high,
            window.iter().map(|c| c.high).fold(f64::MIN, f64::max)
        );
        assert_eq!(
            derived.low,
            window.iter().map(|c| c.low).fold(f64::MAX, f64::min)
        );
    }
}

// =============================================================================
// Order Lifecycle Through the Full Stack
// =============================================================================

#[test]
fn test_sma_cross_full_replay() {
    let config = single_pair_config("sma_cross", Timeframe::MIN1, 50);
    let mut market = Market::new(&config).unwrap();

    let candles = generate_trending_candles(400, 100.0);
    replay(&mut market, &candles);

    let closed = market.closed_positions();
    assert!(
        !closed.is_empty(),
        "a crossover strategy must trade a trending series"
    );

    for position in &closed {
        assert!(position.is_closed());
        assert_eq!(position.side(), Some(Side::Buy));
        assert!(position.entry_price().unwrap() > 0.0);
        assert!(position.exit_price().unwrap() > 0.0);
        assert!(position.profit_ratio().unwrap().is_finite());
        assert!(position.run_up_ratio().unwrap() >= position.drawdown_ratio().unwrap());
        assert!(position
            .exit_timestamp()
            .unwrap()
            .ge(&position.entry_timestamp().unwrap()));
    }

    let report = Report::from_positions(&closed, 10_000.0);
    assert_eq!(report.total_trades, closed.len());
    assert_eq!(
        report.winning_trades + report.losing_trades,
        closed
            .iter()
            .filter(|p| p.profit_ratio().unwrap_or(0.0) != 0.0)
            .count()
    );
    assert!(report.net_profit.is_finite());
}

#[test]
fn test_replay_is_reproducible() {
    let run = || {
        let config = single_pair_config("sma_cross", Timeframe::MIN1, 50);
        let mut market = Market::new(&config).unwrap();
        replay(&mut market, &generate_trending_candles(400, 100.0));
        market
            .closed_positions()
            .iter()
            .map(|p| {
                (
                    p.entry_timestamp().unwrap(),
                    p.exit_timestamp().unwrap(),
                    p.entry_price().unwrap().to_bits(),
                    p.exit_price().unwrap().to_bits(),
                )
            })
            .collect::<Vec<_>>()
    };

    let first = run();
    let second = run();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

// =============================================================================
// Mid-Tick Submission Semantics
// =============================================================================

struct StopPlacer {
    entered: bool,
}

impl Strategy for StopPlacer {
    fn name(&self) -> &'static str {
        "itest_stop_placer"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::OpenPosition]
    }

    fn on_event(&mut self, event: &Event) -> Vec<Action> {
        match event {
            // The candle filling the entry already trades through this stop
            // price; it must still not fill until the next tick.
            Event::OpenPosition(_) => vec![Action::stop_exit(100.0, 99.0)],
            _ => Vec::new(),
        }
    }

    fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action> {
        if !self.entered && !ctx.in_position() {
            self.entered = true;
            return vec![Action::market_entry(Side::Buy, 100.0)];
        }
        Vec::new()
    }
}

#[test]
fn test_orders_queued_mid_tick_match_next_tick() {
    register_strategy("itest_stop_placer", || Box::new(StopPlacer { entered: false }));
    let config = single_pair_config("itest_stop_placer", Timeframe::MIN1, 10);
    let mut market = Market::new(&config).unwrap();

    let flat = |ts: i64| Candle::new_unchecked(ts, 100.0, 105.0, 95.0, 100.0, 10.0);

    // Tick 1: entry submitted. Tick 2: entry fills, open-position event
    // queues the stop; the candle touches 99 but the stop must not fill yet.
    let mut batch = CandleBatch::new();
    batch.insert(Symbol::new("BTCUSDT"), flat(0));
    market.next(&batch).unwrap();

    let mut batch = CandleBatch::new();
    batch.insert(Symbol::new("BTCUSDT"), flat(60));
    market.next(&batch).unwrap();
    assert_eq!(market.open_positions().len(), 1);
    assert!(market.closed_positions().is_empty());

    // Tick 3: the stop activates and fills within the same evaluation pass
    let mut batch = CandleBatch::new();
    batch.insert(Symbol::new("BTCUSDT"), flat(120));
    market.next(&batch).unwrap();

    let closed = market.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_timestamp(), Some(120));
    // Activated stop-market fills at the candle open
    assert_eq!(closed[0].exit_price(), Some(100.0));
    assert!(market.open_positions().is_empty());
}

// =============================================================================
// Event Handler Failure Propagation
// =============================================================================

struct BuyAndClose {
    step: usize,
}

impl Strategy for BuyAndClose {
    fn name(&self) -> &'static str {
        "itest_buy_and_close"
    }

    fn on_tick(&mut self, ctx: &TickContext) -> Vec<Action> {
        self.step += 1;
        match self.step {
            1 => vec![Action::market_entry(Side::Buy, 100.0)],
            _ if ctx.in_position() => vec![Action::market_exit(100.0)],
            _ => Vec::new(),
        }
    }
}

#[test]
fn test_handler_error_fails_the_tick() {
    register_strategy("itest_buy_and_close", || Box::new(BuyAndClose { step: 0 }));
    let config = single_pair_config("itest_buy_and_close", Timeframe::MIN1, 10);
    let mut market = Market::new(&config).unwrap();

    market.subscribe(
        EventKind::ClosedPosition,
        Box::new(|_| anyhow::bail!("downstream rejected the position")),
    );

    let candles = generate_trending_candles(4, 100.0);
    let mut failed = false;
    for candle in &candles {
        let mut batch = CandleBatch::new();
        batch.insert(Symbol::new("BTCUSDT"), *candle);
        if market.next(&batch).is_err() {
            failed = true;
            break;
        }
    }
    assert!(failed, "the closing tick must abort when a handler fails");
}

// =============================================================================
// Feed Alignment Into the Market
// =============================================================================

#[test]
fn test_feed_batches_drive_multi_symbol_replay() {
    let mut series = BTreeMap::new();
    series.insert(Symbol::new("BTCUSDT"), generate_trending_candles(20, 100.0));
    series.insert(Symbol::new("ETHUSDT"), generate_trending_candles(20, 50.0));
    let feed = ReplayFeed::from_series(series).unwrap();

    let config = Config {
        market: MarketConfig {
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
                    quantity_precision: 2,
                },
            ],
        },
        strategies: vec![],
        data: DataConfig::default(),
    };
    let mut market = Market::new(&config).unwrap();

    for batch in feed.iter() {
        market.next(batch).unwrap();
    }

    assert_eq!(market.timestamp(), 19 * 60);
    for symbol in ["BTCUSDT", "ETHUSDT"] {
        let symbol = Symbol::new(symbol);
        assert_eq!(
            market
                .data()
                .window(&symbol, Timeframe::MIN5, 100)
                .unwrap()
                .len(),
            4
        );
        assert!(market.data().market_price(&symbol).is_some());
    }
}
