use crate::config::BotConfig;
use crate::inference::InferenceService;
use crate::market::{MarketObserver, ObserverEvent};
use crate::models::{MarketSnapshot, TradingSignal};
use crate::strategy::signals::{
    build_signal, draft_from_analysis, fallback_draft, instrument_context, is_contradicted,
    SignalDraft,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum SignalEvent {
    Created(TradingSignal),
    /// A contradicted signal was regenerated; carries the id it superseded
    Replaced {
        previous: Uuid,
        signal: TradingSignal,
    },
    Expired(TradingSignal),
    /// A contradicted signal for which no fresh direction could be found
    Invalidated(TradingSignal),
}

#[derive(Debug, Default)]
struct SignalBook {
    active: HashMap<String, TradingSignal>,
    in_flight: HashSet<String>,
}

/// Counters surfaced in status reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    pub inference_signals: u64,
    pub fallback_signals: u64,
    pub inference_failures: u64,
}

/// Turns observer opportunities into at most one active signal per instrument
pub struct SignalGenerator {
    config: Arc<BotConfig>,
    inference: Option<Arc<dyn InferenceService>>,
    book: Mutex<SignalBook>,
    events: broadcast::Sender<SignalEvent>,
    stopped: AtomicBool,
    inference_signals: AtomicU64,
    fallback_signals: AtomicU64,
    inference_failures: AtomicU64,
}

impl SignalGenerator {
    pub fn new(config: Arc<BotConfig>, inference: Option<Arc<dyn InferenceService>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            inference,
            book: Mutex::new(SignalBook::default()),
            events,
            stopped: AtomicBool::new(false),
            inference_signals: AtomicU64::new(0),
            fallback_signals: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
        }
    }

    /// Receive signal lifecycle notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    /// Spawn the observer listener and the deep-scan loop
    pub fn start(
        self: &Arc<Self>,
        observer: Arc<MarketObserver>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        // Subscribe before spawning so nothing published in between is missed
        let observer_events = observer.subscribe();

        vec![
            self.spawn_listener(observer_events, shutdown.clone()),
            self.spawn_deep_scan(observer, shutdown),
        ]
    }

    fn spawn_listener(
        self: &Arc<Self>,
        mut observer_events: broadcast::Receiver<ObserverEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = observer_events.recv() => match event {
                        Ok(event) => generator.handle_observer_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Signal generator lagged, skipped {} market events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
                if generator.is_stopped() {
                    break;
                }
            }
            tracing::info!("Signal listener stopped");
        })
    }

    fn spawn_deep_scan(
        self: &Arc<Self>,
        observer: Arc<MarketObserver>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "🧠 Signal generator deep scan every {}s (top {})",
                generator.config.deep_scan_interval_secs,
                generator.config.deep_scan_top_k
            );

            let mut ticker = interval(generator.config.deep_scan_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately, before the observer has data
            ticker.tick().await;

            while !*shutdown.borrow() && !generator.is_stopped() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let created = generator.deep_scan(&observer, Utc::now()).await;
                        tracing::debug!("Deep scan produced {} signals", created.len());
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn handle_observer_event(self: &Arc<Self>, event: ObserverEvent) {
        let now = Utc::now();
        match event {
            ObserverEvent::Updated(snapshot) => {
                self.purge_expired(now);
                if self.refresh_snapshot(&snapshot, now) {
                    tracing::info!(
                        instrument = %snapshot.instrument,
                        price = snapshot.price,
                        "Price contradicts active signal, regenerating"
                    );
                    self.spawn_evaluation(snapshot);
                }
            }
            ObserverEvent::Opportunity(snapshot) => self.spawn_evaluation(snapshot),
            ObserverEvent::FetchFailed(_) => {}
        }
    }

    /// Evaluate on a separate task so a slow inference call only suspends itself
    fn spawn_evaluation(self: &Arc<Self>, snapshot: MarketSnapshot) {
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            generator.evaluate(snapshot, Utc::now()).await;
        });
    }

    /// Attach the newer snapshot to a still-valid signal.
    ///
    /// Returns true when the new price contradicts the signal's direction.
    pub fn refresh_snapshot(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        let mut book = self.lock_book();
        match book.active.get_mut(&snapshot.instrument) {
            Some(signal) if !signal.is_expired_at(now) => {
                signal.snapshot = snapshot.clone();
                is_contradicted(signal, snapshot.price)
            }
            _ => false,
        }
    }

    /// Produce a signal for `snapshot` unless a valid, uncontradicted one exists
    /// or an analysis for the instrument is already running.
    pub async fn evaluate(&self, snapshot: MarketSnapshot, now: DateTime<Utc>) -> Option<TradingSignal> {
        if self.is_stopped() {
            return None;
        }

        let previous = {
            let mut book = self.lock_book();
            if book.in_flight.contains(&snapshot.instrument) {
                tracing::debug!(instrument = %snapshot.instrument, "Analysis already in flight");
                return None;
            }

            let previous = match book.active.get_mut(&snapshot.instrument) {
                Some(existing) if !existing.is_expired_at(now) => {
                    if !is_contradicted(existing, snapshot.price) {
                        existing.snapshot = snapshot.clone();
                        return None;
                    }
                    Some(existing.id)
                }
                _ => None,
            };

            book.in_flight.insert(snapshot.instrument.clone());
            previous
        };

        let draft = self.synthesize(&snapshot).await;

        let mut book = self.lock_book();
        book.in_flight.remove(&snapshot.instrument);

        if self.is_stopped() {
            tracing::debug!(instrument = %snapshot.instrument, "Discarding analysis that finished after stop");
            return None;
        }

        let Some(draft) = draft else {
            // Contradicted with no fresh direction: the stale signal must not linger
            if let Some(previous) = previous {
                if book.active.get(&snapshot.instrument).map(|s| s.id) == Some(previous) {
                    if let Some(stale) = book.active.remove(&snapshot.instrument) {
                        drop(book);
                        tracing::info!(
                            instrument = %stale.instrument,
                            price = snapshot.price,
                            "Withdrew contradicted {} signal",
                            stale.side
                        );
                        let _ = self.events.send(SignalEvent::Invalidated(stale));
                    }
                }
            }
            return None;
        };
        let signal = build_signal(draft, &snapshot, &self.config, now);

        tracing::info!(
            instrument = %signal.instrument,
            "📡 {} signal {:.0}% conf, {}x, size {:.1}%, hold {}m ({:?})",
            signal.side,
            signal.confidence,
            signal.leverage,
            signal.size * 100.0,
            signal.hold_minutes,
            signal.source
        );

        // A replaced signal may have been consumed while the analysis ran
        let replaced = book
            .active
            .insert(signal.instrument.clone(), signal.clone())
            .filter(|old| Some(old.id) == previous);
        drop(book);

        let event = match replaced {
            Some(old) => SignalEvent::Replaced {
                previous: old.id,
                signal: signal.clone(),
            },
            None => SignalEvent::Created(signal.clone()),
        };
        let _ = self.events.send(event);

        Some(signal)
    }

    /// Inference first, deterministic heuristic when it fails or is rejected
    async fn synthesize(&self, snapshot: &MarketSnapshot) -> Option<SignalDraft> {
        if let Some(inference) = &self.inference {
            let context = instrument_context(snapshot);
            match inference.analyze(&context).await {
                Ok(analysis) => {
                    match draft_from_analysis(analysis, self.config.deep_scan_min_confidence) {
                        Some(draft) => {
                            self.inference_signals.fetch_add(1, Ordering::Relaxed);
                            return Some(draft);
                        }
                        None => {
                            tracing::debug!(
                                instrument = %snapshot.instrument,
                                "Inference verdict neutral or below threshold, using fallback"
                            );
                        }
                    }
                }
                Err(e) => {
                    self.inference_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        instrument = %snapshot.instrument,
                        "Inference failed, using fallback: {}",
                        e
                    );
                }
            }
        }

        let draft = fallback_draft(snapshot);
        if draft.is_some() {
            self.fallback_signals.fetch_add(1, Ordering::Relaxed);
        }
        draft
    }

    /// Purge, then evaluate the top-K instruments by |score|
    pub async fn deep_scan(&self, observer: &MarketObserver, now: DateTime<Utc>) -> Vec<TradingSignal> {
        self.purge_expired(now);

        let mut created = Vec::new();
        for snapshot in observer.top_by_score(self.config.deep_scan_top_k) {
            if self.is_stopped() {
                break;
            }
            if let Some(signal) = self.evaluate(snapshot, now).await {
                created.push(signal);
            }
        }
        created
    }

    /// Drop every signal whose expiry has passed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        let expired: Vec<TradingSignal> = {
            let mut book = self.lock_book();
            let instruments: Vec<String> = book
                .active
                .iter()
                .filter(|(_, s)| s.is_expired_at(now))
                .map(|(instrument, _)| instrument.clone())
                .collect();
            instruments
                .iter()
                .filter_map(|instrument| book.active.remove(instrument))
                .collect()
        };

        for signal in &expired {
            tracing::debug!(instrument = %signal.instrument, "Signal expired");
            let _ = self.events.send(SignalEvent::Expired(signal.clone()));
        }
        expired
    }

    /// Get all non-expired signals, highest confidence first
    pub fn get_active_signals(&self) -> Vec<TradingSignal> {
        self.active_signals_at(Utc::now())
    }

    /// Non-expired signals, highest confidence first
    pub fn active_signals_at(&self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        let mut signals: Vec<TradingSignal> = self
            .lock_book()
            .active
            .values()
            .filter(|s| !s.is_expired_at(now))
            .cloned()
            .collect();
        signals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        signals
    }

    /// Get the active signal for an instrument, if it has not expired
    pub fn get_signal(&self, instrument: &str) -> Option<TradingSignal> {
        let now = Utc::now();
        self.lock_book()
            .active
            .get(instrument)
            .filter(|s| !s.is_expired_at(now))
            .cloned()
    }

    /// Remove a promoted signal. Only matches if `id` is still the active one.
    pub fn consume(&self, instrument: &str, id: Uuid) -> Option<TradingSignal> {
        let mut book = self.lock_book();
        if book.active.get(instrument).map(|s| s.id) == Some(id) {
            book.active.remove(instrument)
        } else {
            None
        }
    }

    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            inference_signals: self.inference_signals.load(Ordering::Relaxed),
            fallback_signals: self.fallback_signals.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn lock_book(&self) -> MutexGuard<'_, SignalBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
