use crate::models::MarketSnapshot;
use std::collections::{HashMap, VecDeque};

/// Rolling window of snapshots for each instrument
///
/// Owned by the market observer; the oldest snapshot is evicted once the window is full.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    data: HashMap<String, VecDeque<MarketSnapshot>>,
    max_snapshots: usize,
}

impl SnapshotHistory {
    /// Create an empty history
    ///
    /// # Arguments
    /// * `max_snapshots` - Maximum number of snapshots kept per instrument
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            data: HashMap::new(),
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Append a snapshot to its instrument's window
    ///
    /// If the window is full, drops the oldest snapshot
    pub fn push(&mut self, snapshot: MarketSnapshot) {
        let window = self
            .data
            .entry(snapshot.instrument.clone())
            .or_insert_with(VecDeque::new);

        window.push_back(snapshot);

        while window.len() > self.max_snapshots {
            window.pop_front();
        }
    }

    /// Get the most recent snapshot for an instrument
    pub fn latest(&self, instrument: &str) -> Option<&MarketSnapshot> {
        self.data.get(instrument).and_then(|w| w.back())
    }

    /// Snapshot `n` observations before the most recent one
    pub fn back(&self, instrument: &str, n: usize) -> Option<&MarketSnapshot> {
        let window = self.data.get(instrument)?;
        let idx = window.len().checked_sub(n + 1)?;
        window.get(idx)
    }

    /// Full retained window, oldest first
    pub fn get(&self, instrument: &str) -> Vec<MarketSnapshot> {
        self.data
            .get(instrument)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last `n` prices, oldest first
    pub fn recent_prices(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.data
            .get(instrument)
            .map(|w| w.iter().rev().take(n).rev().map(|s| s.price).collect())
            .unwrap_or_default()
    }

    /// Get the most recent snapshot of every known instrument
    pub fn all_latest(&self) -> Vec<MarketSnapshot> {
        self.data.values().filter_map(|w| w.back().cloned()).collect()
    }
}
