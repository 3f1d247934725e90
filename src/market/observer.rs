use crate::api::MarketDataSource;
use crate::config::BotConfig;
use crate::market::history::SnapshotHistory;
use crate::market::scoring::{momentum_shift, score_instrument, volatility_trend, ScoreBreakdown};
use crate::models::{InstrumentData, MarketSnapshot};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 4096;
const PRICE_HISTORY_LEN: usize = 20;
/// How many observations back the momentum-shift comparison looks
const SHIFT_LOOKBACK: usize = 5;

/// Notifications published by the observer, in emission order
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Updated(MarketSnapshot),
    Opportunity(MarketSnapshot),
    FetchFailed(String),
}

/// Polls the market data source and keeps a rolling snapshot history per instrument
pub struct MarketObserver {
    config: Arc<BotConfig>,
    source: Arc<dyn MarketDataSource>,
    history: Mutex<SnapshotHistory>,
    events: broadcast::Sender<ObserverEvent>,
    stopped: AtomicBool,
    cycles: AtomicU64,
}

impl MarketObserver {
    pub fn new(config: Arc<BotConfig>, source: Arc<dyn MarketDataSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            history: Mutex::new(SnapshotHistory::new(config.history_window)),
            config,
            source,
            events,
            stopped: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.events.subscribe()
    }

    /// Spawn the polling loop. The first poll happens immediately.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "🔭 Market observer starting (every {}s)",
                observer.config.market_poll_interval_secs
            );

            let mut ticker = interval(observer.config.market_poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !*shutdown.borrow() && !observer.is_stopped() {
                tokio::select! {
                    _ = ticker.tick() => {
                        observer.poll_once().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!("Market observer stopped");
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// One fetch cycle. Failures are published and skipped; the next tick retries.
    pub async fn poll_once(&self) {
        match self.source.fetch_instruments().await {
            Ok(instruments) => {
                if self.is_stopped() {
                    tracing::debug!("Discarding market data that arrived after stop");
                    return;
                }

                let events = self.ingest(instruments, Utc::now());
                let opportunities = events
                    .iter()
                    .filter(|e| matches!(e, ObserverEvent::Opportunity(_)))
                    .count();
                tracing::debug!(
                    "Market cycle {}: {} events, {} opportunities",
                    self.cycles(),
                    events.len(),
                    opportunities
                );

                for event in events {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                }
            }
            Err(e) => {
                tracing::warn!("Market fetch failed, skipping cycle: {}", e);
                let _ = self.events.send(ObserverEvent::FetchFailed(e.to_string()));
            }
        }
    }

    /// Turn raw records into snapshots, append them to history and return the notifications
    pub fn ingest(&self, instruments: Vec<InstrumentData>, now: DateTime<Utc>) -> Vec<ObserverEvent> {
        let mut history = self.lock_history();
        let mut events = Vec::with_capacity(instruments.len());

        for data in instruments {
            if !is_usable(&data) {
                tracing::warn!(instrument = %data.instrument, "Skipping malformed market record");
                continue;
            }

            let scored = score_instrument(&data);
            let opportunity = scored.is_opportunity(self.config.min_confidence);
            let snapshot = build_snapshot(&history, data, &scored, now);

            history.push(snapshot.clone());
            if opportunity {
                tracing::debug!(
                    instrument = %snapshot.instrument,
                    score = snapshot.score,
                    "Opportunity detected"
                );
                events.push(ObserverEvent::Updated(snapshot.clone()));
                events.push(ObserverEvent::Opportunity(snapshot));
            } else {
                events.push(ObserverEvent::Updated(snapshot));
            }
        }

        self.cycles.fetch_add(1, Ordering::SeqCst);
        events
    }

    /// Get the latest snapshot for an instrument
    pub fn get_snapshot(&self, instrument: &str) -> Option<MarketSnapshot> {
        self.lock_history().latest(instrument).cloned()
    }

    /// Get the retained window for an instrument, oldest first
    pub fn get_history(&self, instrument: &str) -> Vec<MarketSnapshot> {
        self.lock_history().get(instrument)
    }

    /// Get one latest snapshot per known instrument
    pub fn get_all_latest(&self) -> Vec<MarketSnapshot> {
        self.lock_history().all_latest()
    }

    /// Latest snapshots of the `k` tradeable instruments with the largest |score|
    pub fn top_by_score(&self, k: usize) -> Vec<MarketSnapshot> {
        let mut latest: Vec<MarketSnapshot> = self
            .get_all_latest()
            .into_iter()
            .filter(|s| s.tradeable)
            .collect();
        latest.sort_by(|a, b| b.score.abs().total_cmp(&a.score.abs()));
        latest.truncate(k);
        latest
    }

    fn lock_history(&self) -> MutexGuard<'_, SnapshotHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_usable(data: &InstrumentData) -> bool {
    data.price.is_finite()
        && data.price > 0.0
        && data.change_24h_pct.is_finite()
        && data.volume_24h.is_finite()
        && data.funding_rate.is_finite()
        && data.open_interest.is_finite()
}

fn build_snapshot(
    history: &SnapshotHistory,
    data: InstrumentData,
    scored: &ScoreBreakdown,
    now: DateTime<Utc>,
) -> MarketSnapshot {
    let mut price_history = history.recent_prices(&data.instrument, PRICE_HISTORY_LEN - 1);
    price_history.push(data.price);

    // The snapshot being built is not in history yet, so `back(SHIFT_LOOKBACK - 1)`
    // is SHIFT_LOOKBACK observations before it.
    let earlier = history
        .back(&data.instrument, SHIFT_LOOKBACK - 1)
        .map(|s| s.momentum);

    MarketSnapshot {
        volatility_trend: volatility_trend(&price_history),
        momentum_shift: momentum_shift(scored.momentum, earlier),
        instrument: data.instrument,
        price: data.price,
        change_24h_pct: data.change_24h_pct,
        volume_24h: data.volume_24h,
        funding_rate: data.funding_rate,
        open_interest: data.open_interest,
        max_leverage: data.max_leverage,
        momentum: scored.momentum,
        momentum_strength: scored.momentum_strength,
        funding_bias: scored.funding_bias,
        volume_tier: scored.volume_tier,
        liquidity_score: scored.liquidity_score,
        tradeable: scored.tradeable,
        volatility: scored.volatility,
        trend_strength: scored.trend_strength,
        score: scored.score,
        confidence: scored.confidence,
        timestamp: now,
        price_history,
    }
}
