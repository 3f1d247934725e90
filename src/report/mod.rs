use crate::models::ClosedTrade;
use std::collections::BTreeMap;

/// Aggregate performance over a set of closed trades
#[derive(Debug, Clone)]
pub struct FinalReport {
    pub capital: f64,

    // P&L
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub per_instrument_pnl: BTreeMap<String, f64>,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,

    pub best_trade: Option<ClosedTrade>,
    pub worst_trade: Option<ClosedTrade>,

    pub avg_hold_minutes: f64,
    pub exits_by_reason: BTreeMap<String, usize>,
}

impl FinalReport {
    pub fn from_trades(trades: &[ClosedTrade], capital: f64) -> Self {
        let total_trades = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();
        let winning_trades = trades.iter().filter(|t| t.is_win()).count();

        let mut per_instrument_pnl = BTreeMap::new();
        let mut exits_by_reason = BTreeMap::new();
        for trade in trades {
            *per_instrument_pnl.entry(trade.instrument.clone()).or_insert(0.0) += trade.realized_pnl;
            *exits_by_reason
                .entry(trade.exit_reason.as_str().to_string())
                .or_insert(0) += 1;
        }

        let gross_win: f64 = trades
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| t.realized_pnl < 0.0)
            .map(|t| t.realized_pnl.abs())
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let best_trade = trades
            .iter()
            .max_by(|a, b| a.realized_pnl_pct.total_cmp(&b.realized_pnl_pct))
            .cloned();
        let worst_trade = trades
            .iter()
            .min_by(|a, b| a.realized_pnl_pct.total_cmp(&b.realized_pnl_pct))
            .cloned();

        let avg_hold_minutes = if total_trades > 0 {
            trades.iter().map(|t| t.hold_minutes() as f64).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };

        Self {
            capital,
            total_pnl,
            total_return_pct: if capital > 0.0 { total_pnl / capital * 100.0 } else { 0.0 },
            per_instrument_pnl,
            total_trades,
            winning_trades,
            losing_trades: total_trades - winning_trades,
            win_rate: if total_trades > 0 {
                winning_trades as f64 / total_trades as f64 * 100.0
            } else {
                0.0
            },
            profit_factor,
            max_drawdown: Self::calculate_drawdown(trades),
            best_trade,
            worst_trade,
            avg_hold_minutes,
            exits_by_reason,
        }
    }

    /// Largest peak-to-trough fall of cumulative P&L, in resolution order
    fn calculate_drawdown(trades: &[ClosedTrade]) -> f64 {
        let mut ordered: Vec<&ClosedTrade> = trades.iter().collect();
        ordered.sort_by_key(|t| t.resolved_at);

        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for trade in ordered {
            equity += trade.realized_pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }
        max_drawdown
    }

    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║                 SESSION PERFORMANCE REPORT            ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 P&L SUMMARY");
        println!("  Capital:               ${:.2}", self.capital);
        println!(
            "  Total P&L:             ${:.2} ({:+.2}%)",
            self.total_pnl, self.total_return_pct
        );
        println!("  Max Drawdown:          ${:.2}", self.max_drawdown);

        println!("\n📈 TRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);

        if self.total_trades > 0 {
            println!("  Profit Factor:         {:.2}", self.profit_factor);
            println!("  Avg Hold:              {:.0} min", self.avg_hold_minutes);

            if let Some(best) = &self.best_trade {
                println!(
                    "  Best Trade:            {} {} {:+.2}%",
                    best.instrument, best.side, best.realized_pnl_pct
                );
            }
            if let Some(worst) = &self.worst_trade {
                println!(
                    "  Worst Trade:           {} {} {:+.2}%",
                    worst.instrument, worst.side, worst.realized_pnl_pct
                );
            }

            println!("\n💰 P&L BY INSTRUMENT");
            for (instrument, pnl) in &self.per_instrument_pnl {
                println!("  {:<22} ${:+.2}", instrument, pnl);
            }

            println!("\n🚪 EXITS");
            for (reason, count) in &self.exits_by_reason {
                println!("  {:<22} {}", reason, count);
            }
        }

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}
