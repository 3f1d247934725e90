//! Shared builders for unit tests

use crate::api::MarketDataSource;
use crate::market::scoring::score_instrument;
use crate::models::{
    ClosedTrade, ExitReason, InstrumentData, MarketSnapshot, Side, SignalSource, TradingSignal,
    Urgency, VolatilityTrend,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

/// Liquid instrument with mildly positive funding (0.02%)
pub fn instrument(name: &str, price: f64, change_24h_pct: f64) -> InstrumentData {
    InstrumentData {
        instrument: name.to_string(),
        price,
        change_24h_pct,
        volume_24h: 80_000_000.0,
        funding_rate: 0.0002,
        open_interest: 50_000_000.0 / price,
        max_leverage: 20,
    }
}

pub fn snapshot(name: &str, price: f64, change_24h_pct: f64) -> MarketSnapshot {
    let data = instrument(name, price, change_24h_pct);
    let scored = score_instrument(&data);

    MarketSnapshot {
        instrument: data.instrument,
        price,
        change_24h_pct,
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
        timestamp: Utc::now(),
        price_history: vec![price],
        volatility_trend: VolatilityTrend::Unknown,
        momentum_shift: false,
    }
}

/// Signal with explicit targets, created now
pub fn position_signal(
    name: &str,
    side: Side,
    entry: f64,
    take_profit: f64,
    stop_loss: f64,
    leverage: u32,
) -> TradingSignal {
    let now = Utc::now();
    TradingSignal {
        id: Uuid::new_v4(),
        instrument: name.to_string(),
        side,
        confidence: 75.0,
        urgency: Urgency::Soon,
        entry_price: entry,
        take_profit,
        stop_loss,
        size: 0.05,
        leverage,
        hold_minutes: 60,
        rationale: "test".to_string(),
        source: SignalSource::Fallback,
        created_at: now,
        expires_at: now + Duration::minutes(15),
        snapshot: snapshot(name, entry, side.sign() * 2.0),
    }
}

/// Signal with +3% / -2% targets on the given side
pub fn signal(name: &str, side: Side, entry: f64, confidence: f64) -> TradingSignal {
    let sign = side.sign();
    let mut signal = position_signal(
        name,
        side,
        entry,
        entry * (1.0 + sign * 0.03),
        entry * (1.0 - sign * 0.02),
        3,
    );
    signal.confidence = confidence;
    signal
}

/// Long trade of 10% capital at 1x, closed after 30 minutes
pub fn closed_trade(name: &str, pnl_pct: f64, exit_reason: ExitReason) -> ClosedTrade {
    let entry_time = Utc::now() - Duration::minutes(30);
    ClosedTrade {
        id: Uuid::new_v4(),
        instrument: name.to_string(),
        side: Side::Long,
        entry_price: 100.0,
        exit_price: 100.0 + pnl_pct,
        size: 0.1,
        leverage: 1,
        confidence: 75.0,
        expected_return: 3.0,
        risk_score: 2.0,
        entry_time,
        exit_reason,
        realized_pnl_pct: pnl_pct,
        realized_pnl: pnl_pct * 10.0,
        resolved_at: entry_time + Duration::minutes(30),
    }
}

/// Market data source returning a fixed list, or always failing
#[derive(Default)]
pub struct StaticSource {
    instruments: Vec<InstrumentData>,
    fail: bool,
}

impl StaticSource {
    pub fn new(instruments: Vec<InstrumentData>) -> Self {
        Self {
            instruments,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            instruments: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    async fn fetch_instruments(&self) -> crate::Result<Vec<InstrumentData>> {
        if self.fail {
            return Err("market data unavailable".into());
        }
        Ok(self.instruments.clone())
    }
}
