//! Performance reporting over the closed-position ledger
//!
//! Consumes the ordered sequence of closed positions the market emits and
//! derives the aggregate figures. Per-position profits are applied to a
//! fixed equity per trade, so figures stay reproducible regardless of
//! position sizing concerns that live outside the core.

use crate::oms::Position;
use crate::{round_dp, Side};
use statrs::statistics::Statistics;

/// Aggregate performance figures computed from closed positions
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub initial_capital: f64,

    pub total_trades: usize,
    pub long_trades: usize,
    pub short_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,

    /// Percent of closed trades with a positive profit
    pub win_rate: f64,

    pub net_profit: f64,
    pub net_profit_pct: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,

    pub avg_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    /// Worst peak-to-trough equity loss over the trade sequence
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    /// Mean per-position favorable / unfavorable excursion, in percent
    pub avg_run_up_pct: f64,
    pub avg_drawdown_pct: f64,

    /// Mean over standard deviation of per-trade returns
    pub sharpe_ratio: f64,

    pub avg_bars_held: f64,
}

impl Report {
    /// Compute the report with a fixed equity of `initial_capital` per trade
    pub fn from_positions(positions: &[Position], initial_capital: f64) -> Self {
        let mut report = Report {
            initial_capital,
            ..Report::default()
        };
        if positions.is_empty() {
            return report;
        }

        let returns: Vec<f64> = positions
            .iter()
            .map(|p| p.profit_ratio().unwrap_or(0.0))
            .collect();
        let profits: Vec<f64> = returns.iter().map(|r| r * initial_capital).collect();

        report.total_trades = positions.len();
        report.long_trades = positions
            .iter()
            .filter(|p| p.side() == Some(Side::Buy))
            .count();
        report.short_trades = report.total_trades - report.long_trades;
        report.winning_trades = profits.iter().filter(|&&p| p > 0.0).count();
        report.losing_trades = profits.iter().filter(|&&p| p < 0.0).count();
        report.win_rate =
            round_dp(report.winning_trades as f64 / report.total_trades as f64 * 100.0, 2);

        report.net_profit = round_dp(profits.iter().sum(), 2);
        report.net_profit_pct = round_dp(report.net_profit / initial_capital * 100.0, 2);
        report.gross_profit = round_dp(profits.iter().filter(|&&p| p > 0.0).sum(), 2);
        report.gross_loss = round_dp(
            profits.iter().filter(|&&p| p < 0.0).sum::<f64>().abs(),
            2,
        );
        report.profit_factor = if report.gross_loss > 0.0 {
            round_dp(report.gross_profit / report.gross_loss, 3)
        } else if report.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        report.avg_trade = round_dp(profits.iter().copied().mean(), 2);
        report.avg_win = if report.winning_trades > 0 {
            round_dp(
                report.gross_profit / report.winning_trades as f64,
                2,
            )
        } else {
            0.0
        };
        report.avg_loss = if report.losing_trades > 0 {
            round_dp(report.gross_loss / report.losing_trades as f64, 2)
        } else {
            0.0
        };
        report.largest_win = profits.iter().copied().fold(0.0, f64::max);
        report.largest_loss = profits.iter().copied().fold(0.0, f64::min).abs();

        // Peak-to-trough drawdown over the cumulative equity curve
        let mut equity = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown = 0.0f64;
        let mut max_drawdown_pct = 0.0f64;
        for profit in &profits {
            equity += profit;
            peak = peak.max(equity);
            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                max_drawdown_pct = drawdown / peak * 100.0;
            }
        }
        report.max_drawdown = round_dp(max_drawdown, 2);
        report.max_drawdown_pct = round_dp(max_drawdown_pct, 2);

        report.avg_run_up_pct = round_dp(
            positions
                .iter()
                .filter_map(Position::run_up_ratio)
                .map(|r| r * 100.0)
                .mean(),
            2,
        );
        report.avg_drawdown_pct = round_dp(
            positions
                .iter()
                .filter_map(Position::drawdown_ratio)
                .map(|r| r * 100.0)
                .mean(),
            2,
        );

        let std_dev = returns.iter().copied().std_dev();
        report.sharpe_ratio = if report.total_trades > 1 && std_dev > 0.0 {
            round_dp(returns.iter().copied().mean() / std_dev, 4)
        } else {
            0.0
        };

        report.avg_bars_held = round_dp(
            positions
                .iter()
                .filter_map(Position::bars_held)
                .map(|bars| bars as f64)
                .mean(),
            2,
        );

        report
    }

    /// Print the summary banner and the per-position table
    pub fn print_summary(&self, positions: &[Position]) {
        println!("\n{}", "=".repeat(64));
        println!("REPLAY RESULTS");
        println!("{}", "=".repeat(64));
        println!("Initial Capital:    {:.2}", self.initial_capital);
        println!(
            "Net Profit:         {:.2} ({:.2}%)",
            self.net_profit, self.net_profit_pct
        );
        println!("Gross Profit:       {:.2}", self.gross_profit);
        println!("Gross Loss:         {:.2}", self.gross_loss);
        println!("Profit Factor:      {:.3}", self.profit_factor);
        println!("Sharpe Ratio:       {:.4}", self.sharpe_ratio);
        println!(
            "Max Drawdown:       {:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
        println!(
            "Total Trades:       {} ({} long / {} short)",
            self.total_trades, self.long_trades, self.short_trades
        );
        println!("Win Rate:           {:.2}%", self.win_rate);
        println!("Winning Trades:     {}", self.winning_trades);
        println!("Losing Trades:      {}", self.losing_trades);
        println!("Average Trade:      {:.2}", self.avg_trade);
        println!("Average Win:        {:.2}", self.avg_win);
        println!("Average Loss:       {:.2}", self.avg_loss);
        println!("Largest Win:        {:.2}", self.largest_win);
        println!("Largest Loss:       {:.2}", self.largest_loss);
        println!("Avg Run-up:         {:.2}%", self.avg_run_up_pct);
        println!("Avg Drawdown:       {:.2}%", self.avg_drawdown_pct);
        println!("Avg Bars Held:      {:.2}", self.avg_bars_held);
        println!("{}", "-".repeat(64));

        if positions.is_empty() {
            println!("(no closed positions)");
        } else {
            println!(
                "{:<22}{:<10}{:<6}{:<6}{:>10}{:>10}{:>10}",
                "Exit Time", "Symbol", "TF", "Side", "Entry", "Exit", "Profit%"
            );
            for position in positions {
                let exit_time = position
                    .exit_datetime()
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let side = position
                    .side()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<22}{:<10}{:<6}{:<6}{:>10.2}{:>10.2}{:>10.2}",
                    exit_time,
                    position.symbol,
                    position.timeframe.to_string(),
                    side,
                    position.entry_price().unwrap_or(0.0),
                    position.exit_price().unwrap_or(0.0),
                    position.profit_ratio().unwrap_or(0.0) * 100.0,
                );
            }
        }
        println!("{}", "=".repeat(64));
    }
}
