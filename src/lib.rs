//! Market Replay
//!
//! A candle-replay trading simulator: historical candles are replayed through
//! a simulated exchange so strategies can open and close positions exactly as
//! they would against a live venue, and the resulting trade history feeds
//! performance reporting.
//!
//! The core is synchronous and deterministic: one tick per base-resolution
//! candle batch, aggregation into every configured higher timeframe, order
//! matching with intra-candle touch tests, and position accounting with
//! weighted entry/exit prices and run-up/drawdown tracking.
//!
//! ```no_run
//! use market_replay::{Config, Market, ReplayFeed, Report, Symbol};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/replay.json")?;
//!     let symbols: Vec<Symbol> = config
//!         .market
//!         .pairs
//!         .iter()
//!         .map(|p| Symbol::new(&p.symbol))
//!         .collect();
//!     let feed = ReplayFeed::from_dir(&config.data.dir, &symbols)?;
//!
//!     let mut market = Market::new(&config)?;
//!     for batch in feed.iter() {
//!         market.next(batch)?;
//!     }
//!
//!     let positions = market.closed_positions();
//!     Report::from_positions(&positions, 10_000.0).print_summary(&positions);
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod market;
pub mod oms;
pub mod report;
pub mod strategies;
pub mod types;

pub use aggregator::TimeframeAggregator;
pub use config::Config;
pub use error::ReplayError;
pub use events::{Event, EventBus, EventKind};
pub use feed::ReplayFeed;
pub use market::{CandleBatch, Market, MarketData};
pub use oms::{Order, OrderId, OrderStatus, OrderType, Position, TradeEngine};
pub use report::Report;
pub use strategies::{Action, Strategy, TickContext};
pub use types::*;
