//! Performance benchmarks for market-replay
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use market_replay::{Candle, EventBus, Side, Symbol, Timeframe, TimeframeAggregator, TradeEngine};

fn candles(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let price = 100.0 + ((i * 13 + 7) % 50) as f64 / 10.0;
            Candle::new_unchecked(
                i as i64 * 60,
                price,
                price + 0.8,
                price - 0.8,
                price + 0.2,
                1_000.0,
            )
        })
        .collect()
}

fn benchmark_aggregator(c: &mut Criterion) {
    let candles = candles(10_000);
    c.bench_function("aggregate_10k_candles_3_timeframes", |b| {
        b.iter(|| {
            let mut agg = TimeframeAggregator::new(
                Symbol::new("BTCUSDT"),
                2,
                3,
                Timeframe::MIN1,
                &[Timeframe::MIN5, Timeframe::MIN15, Timeframe::HOUR1],
            );
            for candle in &candles {
                agg.advance(*candle).unwrap();
            }
            black_box(agg.window(Timeframe::HOUR1, 10).unwrap().len())
        })
    });
}

fn benchmark_engine_tick(c: &mut Criterion) {
    let candles = candles(1_000);
    c.bench_function("engine_1k_ticks_with_resting_limits", |b| {
        b.iter(|| {
            let mut engine = TradeEngine::new(1, Symbol::new("BTCUSDT"), Timeframe::MIN1, 2);
            let mut bus = EventBus::new();
            // Resting limit orders far from the traded range
            for i in 0..10 {
                engine
                    .entry(Side::Buy, 1.0, Some(10.0 + i as f64), None, "", &mut bus)
                    .unwrap();
            }
            for candle in &candles {
                engine.tick(candle, &mut bus).unwrap();
            }
            black_box(engine.open_orders().count())
        })
    });
}

criterion_group!(benches, benchmark_aggregator, benchmark_engine_tick);
criterion_main!(benches);
