use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::BotConfig;
use crate::market::MarketObserver;
use crate::models::{
    ClosedTrade, ExitReason, MarketSnapshot, OpenPosition, SimulatedOutcome, TradingSignal,
};
use crate::persistence::TradeStore;

const EVENT_CAPACITY: usize = 1024;
/// Unrealized P&L % above which the trailing stop engages
const TRAILING_ACTIVATION_PCT: f64 = 2.0;
/// Minimum profit % before a momentum shift forces an exit
const MOMENTUM_EXIT_MIN_PROFIT_PCT: f64 = 0.5;

#[derive(Debug, Clone)]
pub enum PositionEvent {
    Opened(OpenPosition),
    Closed(ClosedTrade),
}

/// Aggregate counters over open and closed positions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionStats {
    pub open_positions: usize,
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

#[derive(Default)]
struct PositionBook {
    open: HashMap<String, OpenPosition>,
    closed: Vec<ClosedTrade>,
    /// Trades whose append to the store failed; retried on export
    unsaved: Vec<ClosedTrade>,
}

/// Owns every open position and the closed-trade history
pub struct PositionManager {
    config: Arc<BotConfig>,
    store: Arc<dyn TradeStore>,
    book: Mutex<PositionBook>,
    events: broadcast::Sender<PositionEvent>,
    stopped: AtomicBool,
}

impl PositionManager {
    pub fn new(config: Arc<BotConfig>, store: Arc<dyn TradeStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            store,
            book: Mutex::new(PositionBook::default()),
            events,
            stopped: AtomicBool::new(false),
        }
    }

    /// Receive `Opened` and `Closed` notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.events.subscribe()
    }

    /// Spawn the position check loop, fed by the observer's latest snapshots
    pub fn start(
        self: &Arc<Self>,
        observer: Arc<MarketObserver>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "💼 Position manager checking every {}s",
                manager.config.position_check_interval_secs
            );

            let mut ticker = interval(manager.config.position_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !*shutdown.borrow() && !manager.is_stopped() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshots: HashMap<String, MarketSnapshot> = observer
                            .get_all_latest()
                            .into_iter()
                            .map(|s| (s.instrument.clone(), s))
                            .collect();
                        manager.check_positions_at(&snapshots, Utc::now());
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!("Position manager stopped");
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether another position fits under the concurrency limit
    pub fn can_open_position(&self) -> bool {
        self.lock_book().open.len() < self.config.max_concurrent_positions
    }

    pub fn has_open_position(&self, instrument: &str) -> bool {
        self.lock_book().open.contains_key(instrument)
    }

    /// Open a live position from `signal` at the current time
    pub fn open_position(&self, signal: &TradingSignal) -> Option<OpenPosition> {
        self.open_position_at(signal, None, Utc::now())
    }

    /// Open a position from `signal`, optionally driven by a scripted dry-run outcome.
    ///
    /// Entry is taken at the signal's latest snapshot price, so a position never
    /// opens already in profit or loss.
    ///
    /// Returns `None` when capacity is exhausted or the instrument is already covered.
    pub fn open_position_at(
        &self,
        signal: &TradingSignal,
        simulated: Option<SimulatedOutcome>,
        now: DateTime<Utc>,
    ) -> Option<OpenPosition> {
        let signal = &signal.repriced(signal.snapshot.price);
        let position = {
            let mut book = self.lock_book();
            if book.open.len() >= self.config.max_concurrent_positions {
                tracing::debug!(instrument = %signal.instrument, "No capacity for new position");
                return None;
            }
            if book.open.contains_key(&signal.instrument) {
                tracing::debug!(instrument = %signal.instrument, "Position already open");
                return None;
            }

            let mut position = OpenPosition {
                id: signal.id,
                instrument: signal.instrument.clone(),
                side: signal.side,
                entry_price: signal.entry_price,
                current_price: signal.entry_price,
                size: signal.size,
                leverage: signal.leverage,
                confidence: signal.confidence,
                unrealized_pnl: 0.0,
                unrealized_pnl_pct: 0.0,
                take_profit: signal.take_profit,
                stop_loss: signal.stop_loss,
                trailing_stop: None,
                entry_time: now,
                max_hold: Duration::minutes(signal.hold_minutes),
                snapshot: signal.snapshot.clone(),
                simulated,
            };

            book.open.insert(position.instrument.clone(), position.clone());
            position
        };

        tracing::info!(
            instrument = %position.instrument,
            "📈 Opened {} {}x @ ${:.4} (TP ${:.4}, SL ${:.4}, size {:.1}%){}",
            position.side,
            position.leverage,
            position.entry_price,
            position.take_profit,
            position.stop_loss,
            position.size * 100.0,
            if position.simulated.is_some() { " [dry-run]" } else { "" }
        );

        let _ = self.events.send(PositionEvent::Opened(position.clone()));
        Some(position)
    }

    /// P&L % of `position` at `price`, leverage included
    pub fn pnl_pct(position: &OpenPosition, price: f64) -> f64 {
        position.side.sign() * (price - position.entry_price) / position.entry_price
            * position.leverage as f64
            * 100.0
    }

    fn pnl_amount(&self, size: f64, pnl_pct: f64) -> f64 {
        self.config.capital * size * pnl_pct / 100.0
    }

    fn mark_to_market(&self, position: &mut OpenPosition, price: f64) {
        position.current_price = price;
        position.unrealized_pnl_pct = Self::pnl_pct(position, price);
        position.unrealized_pnl = self.pnl_amount(position.size, position.unrealized_pnl_pct);
    }

    /// Advance the trailing stop once in profit; it only ever tightens
    fn update_trailing_stop(position: &mut OpenPosition) {
        if position.unrealized_pnl_pct <= TRAILING_ACTIVATION_PCT {
            return;
        }

        let half_stop = (position.entry_price - position.stop_loss).abs() / 2.0;
        let sign = position.side.sign();
        let candidate = position.current_price - sign * half_stop;

        let improves = match position.trailing_stop {
            Some(existing) => sign * (candidate - existing) > 0.0,
            None => true,
        };
        if improves {
            position.trailing_stop = Some(candidate);
        }
    }

    /// First exit condition that holds, with the price it fills at
    fn exit_condition(
        position: &OpenPosition,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Option<(ExitReason, f64)> {
        let sign = position.side.sign();
        let price = position.current_price;
        let reached = |level: f64| sign * (price - level) >= 0.0;
        let breached = |level: f64| sign * (price - level) <= 0.0;

        if reached(position.take_profit) {
            return Some((ExitReason::TakeProfit, position.take_profit));
        }
        if breached(position.stop_loss) {
            return Some((ExitReason::StopLoss, position.stop_loss));
        }
        if let Some(trail) = position.trailing_stop.filter(|&t| breached(t)) {
            return Some((ExitReason::TrailingStop, trail));
        }
        if let Some(outcome) = &position.simulated {
            if now >= position.entry_time + Duration::minutes(outcome.hold_minutes) {
                return Some((outcome.exit_reason, outcome.exit_price));
            }
        }
        if now - position.entry_time >= position.max_hold {
            return Some((ExitReason::TimeLimit, price));
        }
        if snapshot.momentum_shift && position.unrealized_pnl_pct > MOMENTUM_EXIT_MIN_PROFIT_PCT {
            return Some((ExitReason::MomentumShift, price));
        }
        None
    }

    /// One check cycle over every open position.
    ///
    /// Positions without a snapshot are left untouched this cycle.
    pub fn check_positions_at(
        &self,
        snapshots: &HashMap<String, MarketSnapshot>,
        now: DateTime<Utc>,
    ) -> Vec<ClosedTrade> {
        let closed = {
            let mut book = self.lock_book();
            let mut exits = Vec::new();

            for position in book.open.values_mut() {
                let Some(snapshot) = snapshots.get(&position.instrument) else {
                    continue;
                };

                self.mark_to_market(position, snapshot.price);
                position.snapshot = snapshot.clone();
                Self::update_trailing_stop(position);

                if let Some((reason, fill)) = Self::exit_condition(position, snapshot, now) {
                    exits.push((position.instrument.clone(), reason, fill));
                }
            }

            let mut closed = Vec::with_capacity(exits.len());
            for (instrument, reason, fill) in exits {
                if let Some(position) = book.open.remove(&instrument) {
                    let trade = self.to_closed_trade(position, fill, reason, now);
                    book.closed.push(trade.clone());
                    closed.push(trade);
                }
            }
            closed
        };

        for trade in &closed {
            self.record_close(trade);
        }
        closed
    }

    /// Close the open position on `instrument` at `price`
    pub fn close_position_at(
        &self,
        instrument: &str,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ClosedTrade> {
        let trade = {
            let mut book = self.lock_book();
            let Some(position) = book.open.remove(instrument) else {
                anyhow::bail!("No open position for {}", instrument);
            };
            let trade = self.to_closed_trade(position, price, reason, now);
            book.closed.push(trade.clone());
            trade
        };

        self.record_close(&trade);
        Ok(trade)
    }

    fn to_closed_trade(
        &self,
        position: OpenPosition,
        exit_price: f64,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
    ) -> ClosedTrade {
        let realized_pnl_pct = Self::pnl_pct(&position, exit_price);
        let stop_distance_pct =
            (position.stop_loss - position.entry_price).abs() / position.entry_price * 100.0;

        ClosedTrade {
            id: position.id,
            instrument: position.instrument,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            leverage: position.leverage,
            confidence: position.confidence,
            expected_return: (position.take_profit - position.entry_price).abs()
                / position.entry_price
                * 100.0,
            risk_score: stop_distance_pct * position.leverage as f64,
            entry_time: position.entry_time,
            exit_reason,
            realized_pnl_pct,
            realized_pnl: self.pnl_amount(position.size, realized_pnl_pct),
            resolved_at: now,
        }
    }

    /// Persist and publish a closed trade
    fn record_close(&self, trade: &ClosedTrade) {
        let emoji = if trade.is_win() { "✅" } else { "❌" };
        tracing::info!(
            instrument = %trade.instrument,
            "{} Closed {} ({}) @ ${:.4}: {:+.2}% (${:+.2})",
            emoji,
            trade.side,
            trade.exit_reason,
            trade.exit_price,
            trade.realized_pnl_pct,
            trade.realized_pnl
        );

        if let Err(e) = self.store.save_trade(trade) {
            tracing::warn!(instrument = %trade.instrument, "Failed to persist trade, will retry on export: {}", e);
            self.lock_book().unsaved.push(trade.clone());
        }

        let _ = self.events.send(PositionEvent::Closed(trade.clone()));
    }

    /// Get a copy of every open position
    pub fn get_open_positions(&self) -> Vec<OpenPosition> {
        let mut positions: Vec<OpenPosition> = self.lock_book().open.values().cloned().collect();
        positions.sort_by_key(|p| p.entry_time);
        positions
    }

    /// Get every trade closed this session, in close order
    pub fn get_closed_trades(&self) -> Vec<ClosedTrade> {
        self.lock_book().closed.clone()
    }

    /// Get counts, win rate and realized/unrealized P&L
    pub fn get_stats(&self) -> PositionStats {
        let book = self.lock_book();
        let wins = book.closed.iter().filter(|t| t.is_win()).count();
        let closed = book.closed.len();

        PositionStats {
            open_positions: book.open.len(),
            closed_trades: closed,
            wins,
            losses: closed - wins,
            win_rate: if closed > 0 {
                wins as f64 / closed as f64 * 100.0
            } else {
                0.0
            },
            realized_pnl: book.closed.iter().map(|t| t.realized_pnl).sum(),
            unrealized_pnl: book.open.values().map(|p| p.unrealized_pnl).sum(),
        }
    }

    /// Retry unsaved trades, then write the store's full history to `csv_path`
    pub fn export_results(&self, csv_path: &Path) -> anyhow::Result<usize> {
        let pending = std::mem::take(&mut self.lock_book().unsaved);
        let mut failed = Vec::new();
        for trade in pending {
            if let Err(e) = self.store.save_trade(&trade) {
                tracing::warn!(instrument = %trade.instrument, "Trade still not persisted: {}", e);
                failed.push(trade);
            }
        }
        let still_unsaved = failed.len();
        self.lock_book().unsaved.extend(failed);

        let rows = self
            .store
            .export_csv(csv_path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to export trades to {}", csv_path.display()))?;

        if still_unsaved > 0 {
            anyhow::bail!("{} closed trades could not be persisted", still_unsaved);
        }
        Ok(rows)
    }

    fn lock_book(&self) -> MutexGuard<'_, PositionBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{position_signal, snapshot};
    use crate::models::Side;
    use crate::persistence::MemoryTradeStore;

    fn manager() -> PositionManager {
        PositionManager::new(Arc::new(BotConfig::default()), Arc::new(MemoryTradeStore::new()))
    }

    fn prices(instrument: &str, price: f64) -> HashMap<String, MarketSnapshot> {
        let mut map = HashMap::new();
        map.insert(instrument.to_string(), snapshot(instrument, price, 1.0));
        map
    }

    #[test]
    fn test_open_position() {
        let pm = manager();
        let sig = position_signal("SOL", Side::Long, 100.0, 103.0, 98.0, 3);
        let position = pm.open_position(&sig).unwrap();

        assert!(pm.has_open_position("SOL"));
        assert_eq!(position.id, sig.id);
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.trailing_stop, None);
    }

    #[test]
    fn test_entry_taken_at_latest_snapshot() {
        let pm = manager();
        let mut sig = position_signal("SOL", Side::Long, 100.0, 103.0, 98.0, 3);
        sig.snapshot = snapshot("SOL", 101.0, 1.0);

        let position = pm.open_position(&sig).unwrap();

        assert_eq!(position.entry_price, 101.0);
        assert_eq!(position.unrealized_pnl_pct, 0.0);
        assert!((position.take_profit - 101.0 * 1.03).abs() < 1e-9);
        assert!((position.stop_loss - 101.0 * 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_prevent_duplicate_positions() {
        let pm = manager();
        let sig = position_signal("SOL", Side::Long, 100.0, 103.0, 98.0, 3);
        assert!(pm.open_position(&sig).is_some());

        let again = position_signal("SOL", Side::Short, 101.0, 98.0, 103.0, 3);
        assert!(pm.open_position(&again).is_none());
        assert_eq!(pm.get_open_positions().len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let config = BotConfig {
            max_concurrent_positions: 2,
            ..Default::default()
        };
        let pm = PositionManager::new(Arc::new(config), Arc::new(MemoryTradeStore::new()));

        for name in ["A", "B"] {
            assert!(pm
                .open_position(&position_signal(name, Side::Long, 10.0, 11.0, 9.5, 2))
                .is_some());
        }
        assert!(!pm.can_open_position());
        assert!(pm
            .open_position(&position_signal("C", Side::Long, 10.0, 11.0, 9.5, 2))
            .is_none());
    }

    #[test]
    fn test_take_profit_hit() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3), None, t0);

        let closed = pm.check_positions_at(&prices("X", 103.5), t0 + Duration::minutes(5));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(closed[0].exit_price, 103.0);
        assert!(closed[0].realized_pnl > 0.0);
        assert!(!pm.has_open_position("X"));
    }

    #[test]
    fn test_stop_loss_hit() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3), None, t0);

        let closed = pm.check_positions_at(&prices("X", 97.5), t0 + Duration::minutes(5));
        assert_eq!(closed[0].exit_reason, ExitReason::StopLoss);
        assert!((closed[0].realized_pnl_pct - (-2.0 * 3.0)).abs() < 1e-9);
        assert!((closed[0].risk_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_exits_mirror_long() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Short, 100.0, 96.0, 102.0, 2), None, t0);

        assert!(pm.check_positions_at(&prices("X", 99.0), t0).is_empty());
        let closed = pm.check_positions_at(&prices("X", 95.0), t0);
        assert_eq!(closed[0].exit_reason, ExitReason::TakeProfit);
        assert!((closed[0].realized_pnl_pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_stop_monotonic_long() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 110.0, 98.0, 2), None, t0);

        let mut last = None;
        for price in [101.5, 102.0, 104.0, 103.5, 105.0, 104.8] {
            assert!(pm.check_positions_at(&prices("X", price), t0).is_empty());
            let trail = pm.get_open_positions()[0].trailing_stop;
            if let (Some(prev), Some(now)) = (last, trail) {
                assert!(now >= prev);
            }
            if last.is_some() {
                assert!(trail.is_some());
            }
            last = trail.or(last);
        }
        // 105 - half of the 2.0 stop distance
        assert_eq!(last, Some(104.0));

        let closed = pm.check_positions_at(&prices("X", 103.9), t0);
        assert_eq!(closed[0].exit_reason, ExitReason::TrailingStop);
        assert_eq!(closed[0].exit_price, 104.0);
        assert!(closed[0].is_win());
    }

    #[test]
    fn test_trailing_stop_monotonic_short() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Short, 100.0, 90.0, 102.0, 2), None, t0);

        pm.check_positions_at(&prices("X", 97.0), t0);
        assert_eq!(pm.get_open_positions()[0].trailing_stop, Some(98.0));
        pm.check_positions_at(&prices("X", 97.5), t0);
        assert_eq!(pm.get_open_positions()[0].trailing_stop, Some(98.0));
        pm.check_positions_at(&prices("X", 96.0), t0);
        assert_eq!(pm.get_open_positions()[0].trailing_stop, Some(97.0));
    }

    #[test]
    fn test_time_limit() {
        let pm = manager();
        let t0 = Utc::now();
        let sig = position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3);
        pm.open_position_at(&sig, None, t0);

        let before = t0 + Duration::minutes(sig.hold_minutes) - Duration::seconds(1);
        assert!(pm.check_positions_at(&prices("X", 100.5), before).is_empty());

        let closed = pm.check_positions_at(&prices("X", 100.5), t0 + Duration::minutes(sig.hold_minutes));
        assert_eq!(closed[0].exit_reason, ExitReason::TimeLimit);
        assert_eq!(closed[0].exit_price, 100.5);
    }

    #[test]
    fn test_momentum_shift_exit_requires_profit() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 110.0, 95.0, 1), None, t0);

        let mut flat = snapshot("X", 100.2, -0.5);
        flat.momentum_shift = true;
        let mut map = HashMap::new();
        map.insert("X".to_string(), flat);
        assert!(pm.check_positions_at(&map, t0).is_empty());

        let mut up = snapshot("X", 101.0, -0.5);
        up.momentum_shift = true;
        map.insert("X".to_string(), up);
        let closed = pm.check_positions_at(&map, t0);
        assert_eq!(closed[0].exit_reason, ExitReason::MomentumShift);
    }

    #[test]
    fn test_simulated_outcome_closes_on_schedule() {
        let pm = manager();
        let t0 = Utc::now();
        let sig = position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3);
        let outcome = SimulatedOutcome {
            exit_price: 103.0,
            exit_reason: ExitReason::TakeProfit,
            hold_minutes: 30,
        };
        pm.open_position_at(&sig, Some(outcome), t0);

        assert!(pm.check_positions_at(&prices("X", 100.2), t0 + Duration::minutes(29)).is_empty());
        let closed = pm.check_positions_at(&prices("X", 100.2), t0 + Duration::minutes(30));
        assert_eq!(closed[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(closed[0].exit_price, 103.0);
    }

    #[test]
    fn test_missing_snapshot_is_not_an_exit() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3), None, t0);

        // Long past max hold, but no data for X this cycle
        let closed = pm.check_positions_at(&prices("OTHER", 1.0), t0 + Duration::days(3));
        assert!(closed.is_empty());
        assert!(pm.has_open_position("X"));
    }

    #[test]
    fn test_close_position_publishes_and_persists() {
        let store = Arc::new(MemoryTradeStore::new());
        let pm = PositionManager::new(Arc::new(BotConfig::default()), store.clone());
        let mut rx = pm.subscribe();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("X", Side::Long, 100.0, 103.0, 98.0, 3), None, t0);

        let trade = pm
            .close_position_at("X", 101.0, ExitReason::Manual, t0 + Duration::minutes(10))
            .unwrap();
        assert_eq!(trade.hold_minutes(), 10);

        assert!(matches!(rx.try_recv(), Ok(PositionEvent::Opened(_))));
        assert!(matches!(rx.try_recv(), Ok(PositionEvent::Closed(ref t)) if t.id == trade.id));
        assert_eq!(store.load_trades().unwrap().len(), 1);

        let err = pm.close_position_at("X", 101.0, ExitReason::Manual, t0).unwrap_err();
        assert!(err.to_string().contains("No open position"));
    }

    #[test]
    fn test_stats() {
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("A", Side::Long, 100.0, 103.0, 98.0, 2), None, t0);
        pm.open_position_at(&position_signal("B", Side::Long, 100.0, 103.0, 98.0, 2), None, t0);
        pm.open_position_at(&position_signal("C", Side::Long, 100.0, 103.0, 98.0, 2), None, t0);

        pm.close_position_at("A", 103.0, ExitReason::TakeProfit, t0).unwrap();
        pm.close_position_at("B", 98.0, ExitReason::StopLoss, t0).unwrap();

        let stats = pm.get_stats();
        assert_eq!(stats.open_positions, 1);
        assert_eq!(stats.closed_trades, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.win_rate, 50.0);
    }

    #[test]
    fn test_export_results() {
        let dir = tempfile::tempdir().unwrap();
        let pm = manager();
        let t0 = Utc::now();
        pm.open_position_at(&position_signal("A", Side::Long, 100.0, 103.0, 98.0, 2), None, t0);
        pm.close_position_at("A", 103.0, ExitReason::TakeProfit, t0).unwrap();

        let rows = pm.export_results(&dir.path().join("out.csv")).unwrap();
        assert_eq!(rows, 1);
    }
}
