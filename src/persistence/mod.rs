use crate::models::ClosedTrade;
use crate::Result;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Append-only store for closed trades
pub trait TradeStore: Send + Sync {
    fn save_trade(&self, trade: &ClosedTrade) -> Result<()>;

    fn load_trades(&self) -> Result<Vec<ClosedTrade>>;

    /// Write every stored trade to `path` as CSV, returning the row count
    fn export_csv(&self, path: &Path) -> Result<usize> {
        let trades = self.load_trades()?;
        write_csv(&trades, path)?;
        Ok(trades.len())
    }
}

/// One JSON object per line
///
/// Lines that fail to parse are skipped with a warning on load so a torn
/// final write never hides the rest of the history.
pub struct JsonlTradeStore {
    path: PathBuf,
}

impl JsonlTradeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeStore for JsonlTradeStore {
    fn save_trade(&self, trade: &ClosedTrade) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(trade)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_trades(&self) -> Result<Vec<ClosedTrade>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut trades = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClosedTrade>(&line) {
                Ok(trade) => trades.push(trade),
                Err(e) => tracing::warn!(
                    "Skipping unreadable trade on line {} of {}: {}",
                    n + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(trades)
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: Mutex<Vec<ClosedTrade>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeStore for MemoryTradeStore {
    fn save_trade(&self, trade: &ClosedTrade) -> Result<()> {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trade.clone());
        Ok(())
    }

    fn load_trades(&self) -> Result<Vec<ClosedTrade>> {
        Ok(self
            .trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: String,
    instrument: &'a str,
    side: String,
    entry_price: f64,
    exit_price: f64,
    size: f64,
    leverage: u32,
    confidence: f64,
    expected_return: f64,
    risk_score: f64,
    entry_time: String,
    resolved_at: String,
    hold_minutes: i64,
    exit_reason: &'static str,
    realized_pnl_pct: f64,
    realized_pnl: f64,
}

impl<'a> From<&'a ClosedTrade> for CsvRow<'a> {
    fn from(trade: &'a ClosedTrade) -> Self {
        Self {
            id: trade.id.to_string(),
            instrument: &trade.instrument,
            side: trade.side.to_string(),
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            size: trade.size,
            leverage: trade.leverage,
            confidence: trade.confidence,
            expected_return: trade.expected_return,
            risk_score: trade.risk_score,
            entry_time: trade.entry_time.to_rfc3339(),
            resolved_at: trade.resolved_at.to_rfc3339(),
            hold_minutes: trade.hold_minutes(),
            exit_reason: trade.exit_reason.as_str(),
            realized_pnl_pct: trade.realized_pnl_pct,
            realized_pnl: trade.realized_pnl,
        }
    }
}

pub fn write_csv(trades: &[ClosedTrade], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for trade in trades {
        writer.serialize(CsvRow::from(trade))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::closed_trade;
    use crate::models::ExitReason;
    use tokio_test::assert_ok;

    #[test]
    fn test_jsonl_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTradeStore::new(dir.path().join("nested/trades.jsonl"));

        assert!(store.load_trades().unwrap().is_empty());

        let first = closed_trade("BTC", 2.5, ExitReason::TakeProfit);
        let second = closed_trade("ETH", -1.0, ExitReason::StopLoss);
        assert_ok!(store.save_trade(&first));
        assert_ok!(store.save_trade(&second));

        let loaded = store.load_trades().unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let store = JsonlTradeStore::new(&path);
        store
            .save_trade(&closed_trade("BTC", 1.0, ExitReason::TimeLimit))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"instrument\": \"trunc").unwrap();

        assert_eq!(store.load_trades().unwrap().len(), 1);
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryTradeStore::new();
        store
            .save_trade(&closed_trade("BTC", 2.5, ExitReason::TakeProfit))
            .unwrap();
        store
            .save_trade(&closed_trade("SOL", -3.0, ExitReason::TrailingStop))
            .unwrap();

        let out = dir.path().join("trades.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 2);

        let contents = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,instrument,side"));
        assert!(lines[2].contains("trailing-stop"));
    }
}
