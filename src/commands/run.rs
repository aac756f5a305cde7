//! Run command implementation

use anyhow::Result;
use market_replay::{Config, Market, ReplayFeed, Report, Symbol};
use tracing::info;

pub fn run(config_path: String, capital: f64, data_dir_override: Option<String>) -> Result<()> {
    info!("Starting replay");

    // Load configuration
    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(data_dir) = data_dir_override {
        info!("Overriding data directory to: {}", data_dir);
        config.data.dir = data_dir;
    }

    // Load candle history for every configured pair
    let symbols: Vec<Symbol> = config
        .market
        .pairs
        .iter()
        .map(|pair| Symbol::new(&pair.symbol))
        .collect();
    let feed = ReplayFeed::from_dir(&config.data.dir, &symbols)?;
    info!(
        "Loaded {} ticks for {} symbols from {}",
        feed.len(),
        symbols.len(),
        config.data.dir
    );

    // Build the market and replay every tick
    let mut market = Market::new(&config)?;
    info!("Running replay...");
    for batch in feed.iter() {
        market.next(batch)?;
    }
    info!(
        "Replay finished at timestamp {} with {} closed positions",
        market.timestamp(),
        market.closed_positions().len()
    );

    // Print results
    let positions = market.closed_positions();
    let report = Report::from_positions(&positions, capital);
    report.print_summary(&positions);

    let open = market.open_positions();
    if !open.is_empty() {
        println!("\nStill open at end of replay:");
        for position in &open {
            println!("  {}", position);
        }
    }

    Ok(())
}
