use crate::config::BotConfig;
use crate::execution::{OutcomeSimulator, PositionEvent, PositionManager};
use crate::market::MarketObserver;
use crate::models::{ExitReason, OpenPosition, TradingSignal, Urgency};
use crate::report::FinalReport;
use crate::strategy::signals::is_contradicted;
use crate::strategy::{SignalEvent, SignalGenerator};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Confidence at which a young "wait" signal may still be promoted
const WAIT_OVERRIDE_CONFIDENCE: f64 = 80.0;

/// Why a signal was passed over on a promotion tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooYoung,
    AwaitingConviction,
    AlreadyConsumed,
    PositionOpen,
    CoolingDown,
    /// Price has since moved against the signal; a replacement is pending
    Contradicted,
}

#[derive(Debug, Default)]
struct PromotionState {
    consumed: HashSet<Uuid>,
    /// Last close time per instrument
    last_closed: HashMap<String, DateTime<Utc>>,
}

/// Wires the observer, generator and position manager together and promotes
/// matured signals into positions, one per tick.
pub struct Orchestrator {
    config: Arc<BotConfig>,
    observer: Arc<MarketObserver>,
    generator: Arc<SignalGenerator>,
    positions: Arc<PositionManager>,
    simulator: Arc<dyn OutcomeSimulator>,
    state: Mutex<PromotionState>,
    position_events: Mutex<broadcast::Receiver<PositionEvent>>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: Arc<BotConfig>,
        observer: Arc<MarketObserver>,
        generator: Arc<SignalGenerator>,
        positions: Arc<PositionManager>,
        simulator: Arc<dyn OutcomeSimulator>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            position_events: Mutex::new(positions.subscribe()),
            config,
            observer,
            generator,
            positions,
            simulator,
            state: Mutex::new(PromotionState::default()),
            shutdown,
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start every periodic task
    pub fn start(self: &Arc<Self>) {
        tracing::info!("🚀 Orchestrator starting");
        tracing::info!(
            "  Mode: {} | Max positions: {} | Min confidence: {:.0} | Min signal age: {}s",
            if self.config.dry_run { "DRY RUN" } else { "LIVE" },
            self.config.max_concurrent_positions,
            self.config.min_confidence,
            self.config.min_signal_age_secs
        );

        let mut handles = Vec::new();
        // Subscribers first, so the observer's first cycle reaches them
        handles.extend(
            self.generator
                .start(Arc::clone(&self.observer), self.shutdown.subscribe()),
        );
        handles.push(
            self.positions
                .start(Arc::clone(&self.observer), self.shutdown.subscribe()),
        );
        handles.push(self.spawn_promotion_loop());
        handles.push(self.spawn_status_loop());
        handles.push(self.observer.start(self.shutdown.subscribe()));

        self.lock_handles().extend(handles);
    }

    /// Run until Ctrl+C or `duration` elapses, then stop and return the final report
    pub async fn run(self: &Arc<Self>, duration: Option<std::time::Duration>) -> FinalReport {
        self.start();

        match duration {
            Some(duration) => {
                tracing::info!("Running for {} minutes", duration.as_secs() / 60);
                tokio::select! {
                    _ = tokio::time::sleep(duration) => tracing::info!("Run duration elapsed"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl+C received"),
                }
            }
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                tracing::info!("Ctrl+C received");
            }
        }

        self.stop().await
    }

    fn spawn_promotion_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut signal_events = self.generator.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(orchestrator.config.promotion_tick());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !*shutdown.borrow() && !orchestrator.is_stopped() {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.promote_at(Utc::now());
                    }
                    event = signal_events.recv() => match event {
                        Ok(SignalEvent::Created(_)) | Ok(SignalEvent::Replaced { .. }) => {
                            orchestrator.promote_at(Utc::now());
                        }
                        Ok(SignalEvent::Expired(_)) | Ok(SignalEvent::Invalidated(_)) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Promotion loop lagged, skipped {} signal events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_status_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(orchestrator.config.status_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            while !*shutdown.borrow() && !orchestrator.is_stopped() {
                tokio::select! {
                    _ = ticker.tick() => orchestrator.log_status(),
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn log_status(&self) {
        let signals = self.generator.get_active_signals();
        let open = self.positions.get_open_positions();
        let stats = self.positions.get_stats();
        let generated = self.generator.stats();

        tracing::info!(
            "📊 Status: {} instruments, {} active signals, {} open positions, {} closed ({:.0}% win), realized ${:+.2}, unrealized ${:+.2}",
            self.observer.get_all_latest().len(),
            signals.len(),
            open.len(),
            stats.closed_trades,
            stats.win_rate,
            stats.realized_pnl,
            stats.unrealized_pnl
        );
        tracing::debug!(
            "Signals so far: {} from inference, {} from fallback, {} inference failures",
            generated.inference_signals,
            generated.fallback_signals,
            generated.inference_failures
        );

        for signal in signals.iter().take(3) {
            tracing::info!(
                "  📡 {} {} {:.0}% ({:?})",
                signal.instrument,
                signal.side,
                signal.confidence,
                signal.urgency
            );
        }
        for position in &open {
            tracing::info!(
                "  💼 {} {} {}x @ ${:.4} → ${:.4} ({:+.2}%)",
                position.instrument,
                position.side,
                position.leverage,
                position.entry_price,
                position.current_price,
                position.unrealized_pnl_pct
            );
        }
    }

    /// Apply pending close notifications to the cooldown book
    fn drain_position_events(&self) {
        let mut events = self
            .position_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.lock_state();

        loop {
            match events.try_recv() {
                Ok(PositionEvent::Closed(trade)) => {
                    state
                        .last_closed
                        .insert(trade.instrument.clone(), trade.resolved_at);
                }
                Ok(PositionEvent::Opened(_)) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} position events, rebuilding cooldowns", skipped);
                    for trade in self.positions.get_closed_trades() {
                        let entry = state
                            .last_closed
                            .entry(trade.instrument.clone())
                            .or_insert(trade.resolved_at);
                        *entry = (*entry).max(trade.resolved_at);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Why `signal` may not be promoted at `now`, if anything
    pub fn skip_reason(&self, signal: &TradingSignal, now: DateTime<Utc>) -> Option<SkipReason> {
        let state = self.lock_state();
        self.skip_reason_with(&state, signal, now)
    }

    fn skip_reason_with(
        &self,
        state: &PromotionState,
        signal: &TradingSignal,
        now: DateTime<Utc>,
    ) -> Option<SkipReason> {
        let age = signal.age_at(now);
        let min_age = self.config.min_signal_age();

        if age < min_age {
            return Some(SkipReason::TooYoung);
        }
        if signal.urgency == Urgency::Wait
            && age < min_age * 2
            && signal.confidence < WAIT_OVERRIDE_CONFIDENCE
        {
            return Some(SkipReason::AwaitingConviction);
        }
        if state.consumed.contains(&signal.id) {
            return Some(SkipReason::AlreadyConsumed);
        }
        if is_contradicted(signal, signal.snapshot.price) {
            return Some(SkipReason::Contradicted);
        }
        if self.positions.has_open_position(&signal.instrument) {
            return Some(SkipReason::PositionOpen);
        }
        if let Some(closed_at) = state.last_closed.get(&signal.instrument) {
            if now < *closed_at + self.config.cooldown() {
                return Some(SkipReason::CoolingDown);
            }
        }
        None
    }

    /// One promotion pass: open a position for the first eligible signal, if any
    pub fn promote_at(&self, now: DateTime<Utc>) -> Option<OpenPosition> {
        if self.is_stopped() {
            return None;
        }
        self.drain_position_events();

        if !self.positions.can_open_position() {
            return None;
        }

        let candidate = {
            let mut state = self.lock_state();
            let mut chosen = None;
            for signal in self.generator.active_signals_at(now) {
                match self.skip_reason_with(&state, &signal, now) {
                    Some(reason) => {
                        tracing::trace!(instrument = %signal.instrument, ?reason, "Signal skipped");
                    }
                    None => {
                        state.consumed.insert(signal.id);
                        chosen = Some(signal);
                        break;
                    }
                }
            }
            chosen
        }?;

        self.generator.consume(&candidate.instrument, candidate.id);
        let candidate = candidate.repriced(candidate.snapshot.price);

        let simulated = if self.config.dry_run {
            Some(self.simulator.simulate_outcome(&candidate))
        } else {
            None
        };

        tracing::info!(
            instrument = %candidate.instrument,
            "🎯 Promoting {} signal ({:.0}% conf, age {}s)",
            candidate.side,
            candidate.confidence,
            candidate.age_at(now).num_seconds()
        );
        self.positions.open_position_at(&candidate, simulated, now)
    }

    /// Close remaining simulated positions at their last price
    fn settle_dry_run_positions(&self, now: DateTime<Utc>) {
        for position in self.positions.get_open_positions() {
            if position.simulated.is_none() {
                continue;
            }
            if let Err(e) = self.positions.close_position_at(
                &position.instrument,
                position.current_price,
                ExitReason::Manual,
                now,
            ) {
                tracing::warn!(instrument = %position.instrument, "Failed to settle position: {}", e);
            }
        }
    }

    /// Stop every task, settle dry-run positions, print and export the final report
    pub async fn stop(&self) -> FinalReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Orchestrator already stopped");
        }

        tracing::info!("🛑 Stopping orchestrator");
        self.observer.stop();
        self.generator.stop();
        self.positions.stop();
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.lock_handles().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Task ended abnormally: {}", e);
            }
        }

        if self.config.dry_run {
            self.settle_dry_run_positions(Utc::now());
        }

        let report = FinalReport::from_trades(&self.positions.get_closed_trades(), self.config.capital);
        report.print_report();

        let csv_path = self.csv_path();
        match self.positions.export_results(&csv_path) {
            Ok(rows) => tracing::info!("💾 Exported {} trades to {}", rows, csv_path.display()),
            Err(e) => tracing::warn!("Export failed: {:#}", e),
        }

        report
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn csv_path(&self) -> PathBuf {
        PathBuf::from(&self.config.trades_path).with_extension("csv")
    }

    fn lock_state(&self) -> MutexGuard<'_, PromotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RandomOutcomeSimulator;
    use crate::fixtures::{snapshot, StaticSource};
    use crate::persistence::MemoryTradeStore;
    use chrono::Duration;

    fn orchestrator(config: BotConfig) -> Orchestrator {
        let config = Arc::new(config);
        let observer = Arc::new(MarketObserver::new(
            config.clone(),
            Arc::new(StaticSource::default()),
        ));
        let generator = Arc::new(SignalGenerator::new(config.clone(), None));
        let positions = Arc::new(PositionManager::new(
            config.clone(),
            Arc::new(MemoryTradeStore::new()),
        ));
        Orchestrator::new(
            config,
            observer,
            generator,
            positions,
            Arc::new(RandomOutcomeSimulator::new(Some(1))),
        )
    }

    #[tokio::test]
    async fn test_young_signal_skipped_then_promoted() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        // 2.6% move: confidence 76, urgency soon
        let signal = orch
            .generator
            .evaluate(snapshot("X", 100.0, 2.6), t0)
            .await
            .unwrap();

        assert_eq!(orch.skip_reason(&signal, t0 + Duration::seconds(5)), Some(SkipReason::TooYoung));
        assert!(orch.promote_at(t0 + Duration::seconds(5)).is_none());

        let position = orch.promote_at(t0 + Duration::seconds(12)).unwrap();
        assert_eq!(position.id, signal.id);
        assert!(position.simulated.is_some());
        assert!(orch.generator.get_signal("X").is_none());
    }

    #[tokio::test]
    async fn test_young_wait_signal_needs_conviction() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        // 1.0% move: confidence 60, urgency wait
        let signal = orch
            .generator
            .evaluate(snapshot("X", 100.0, 1.0), t0)
            .await
            .unwrap();
        assert_eq!(signal.urgency, Urgency::Wait);

        assert_eq!(
            orch.skip_reason(&signal, t0 + Duration::seconds(15)),
            Some(SkipReason::AwaitingConviction)
        );
        assert_eq!(orch.skip_reason(&signal, t0 + Duration::seconds(20)), None);
    }

    #[tokio::test]
    async fn test_contradicted_signal_not_promoted() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        let signal = orch
            .generator
            .evaluate(snapshot("X", 100.0, 3.2), t0)
            .await
            .unwrap();
        assert!(orch.generator.refresh_snapshot(&snapshot("X", 98.0, 0.3), t0));

        let refreshed = orch.generator.get_signal("X").unwrap();
        let later = t0 + Duration::seconds(12);
        assert_eq!(refreshed.id, signal.id);
        assert_eq!(orch.skip_reason(&refreshed, later), Some(SkipReason::Contradicted));
        assert!(orch.promote_at(later).is_none());
        assert!(orch.positions.get_open_positions().is_empty());
    }

    #[tokio::test]
    async fn test_promotion_enters_at_latest_price() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        let signal = orch
            .generator
            .evaluate(snapshot("X", 100.0, 3.2), t0)
            .await
            .unwrap();
        assert!(!orch.generator.refresh_snapshot(&snapshot("X", 100.8, 3.4), t0));

        let position = orch.promote_at(t0 + Duration::seconds(12)).unwrap();

        assert_eq!(position.entry_price, 100.8);
        assert_eq!(position.unrealized_pnl_pct, 0.0);
        let tp_ratio = signal.take_profit / signal.entry_price;
        assert!((position.take_profit - 100.8 * tp_ratio).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_one_promotion_per_tick() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        orch.generator.evaluate(snapshot("A", 10.0, 2.0), t0).await;
        orch.generator.evaluate(snapshot("B", 10.0, 4.0), t0).await;

        let first = orch.promote_at(t0 + Duration::seconds(30)).unwrap();
        assert_eq!(first.instrument, "B");
        assert_eq!(orch.positions.get_open_positions().len(), 1);

        let second = orch.promote_at(t0 + Duration::seconds(31)).unwrap();
        assert_eq!(second.instrument, "A");
    }

    #[tokio::test]
    async fn test_cooldown_after_close() {
        let orch = orchestrator(BotConfig::default());
        let t0 = Utc::now();
        orch.generator.evaluate(snapshot("X", 100.0, 2.0), t0).await;
        orch.promote_at(t0 + Duration::seconds(20)).unwrap();

        let closed_at = t0 + Duration::seconds(60);
        orch.positions
            .close_position_at("X", 100.0, ExitReason::Manual, closed_at)
            .unwrap();

        let fresh = orch
            .generator
            .evaluate(snapshot("X", 100.0, 2.0), closed_at)
            .await
            .unwrap();

        let during = closed_at + Duration::seconds(120);
        assert!(orch.promote_at(during).is_none());
        assert_eq!(orch.skip_reason(&fresh, during), Some(SkipReason::CoolingDown));

        let after = closed_at + Duration::seconds(301);
        assert_eq!(orch.promote_at(after).unwrap().instrument, "X");
    }

    #[tokio::test]
    async fn test_capacity_blocks_promotion() {
        let orch = orchestrator(BotConfig {
            max_concurrent_positions: 1,
            ..Default::default()
        });
        let t0 = Utc::now();
        orch.generator.evaluate(snapshot("A", 10.0, 2.0), t0).await;
        orch.generator.evaluate(snapshot("B", 10.0, 3.0), t0).await;

        assert!(orch.promote_at(t0 + Duration::seconds(30)).is_some());
        assert!(orch.promote_at(t0 + Duration::seconds(31)).is_none());
        assert_eq!(orch.generator.active_signals_at(t0 + Duration::seconds(31)).len(), 1);
    }

    #[tokio::test]
    async fn test_live_mode_skips_simulation() {
        let orch = orchestrator(BotConfig {
            dry_run: false,
            account_address: Some("0xabc".to_string()),
            ..Default::default()
        });
        let t0 = Utc::now();
        orch.generator.evaluate(snapshot("X", 100.0, 3.5), t0).await;

        let position = orch.promote_at(t0 + Duration::seconds(11)).unwrap();
        assert!(position.simulated.is_none());
    }

    #[tokio::test]
    async fn test_stop_settles_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(BotConfig {
            trades_path: dir.path().join("trades.jsonl").display().to_string(),
            ..Default::default()
        });
        let t0 = Utc::now();
        orch.generator.evaluate(snapshot("X", 100.0, 3.5), t0).await;
        orch.promote_at(t0 + Duration::seconds(11)).unwrap();

        let report = orch.stop().await;
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.exits_by_reason["manual"], 1);
        assert!(orch.positions.get_open_positions().is_empty());
        assert!(dir.path().join("trades.csv").exists());
        assert!(orch.promote_at(Utc::now()).is_none());
    }
}
