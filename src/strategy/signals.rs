use crate::config::BotConfig;
use crate::inference::{Analysis, InstrumentContext};
use crate::models::{MarketSnapshot, Side, SignalSource, TradingSignal, Urgency};
use crate::strategy::sizing;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const MIN_CONFIDENCE: f64 = 50.0;
pub const MAX_CONFIDENCE: f64 = 95.0;
pub const MIN_TAKE_PROFIT_PCT: f64 = 1.0;
pub const MAX_TAKE_PROFIT_PCT: f64 = 10.0;
pub const MIN_STOP_LOSS_PCT: f64 = 0.5;
pub const MAX_STOP_LOSS_PCT: f64 = 5.0;

/// Below this |24h change| the fallback sees no directional bias
const FALLBACK_MIN_MOVE_PCT: f64 = 0.5;
/// Adverse move from entry that invalidates an active signal
pub const CONTRADICTION_PCT: f64 = 1.5;

/// Unclamped trade idea, from either the inference service or the fallback
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDraft {
    pub side: Side,
    pub confidence: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub hold_minutes: f64,
    pub urgency: Urgency,
    pub rationale: String,
    pub source: SignalSource,
}

/// Deterministic heuristic from momentum magnitude and direction
///
/// Bigger moves give higher confidence and a shorter hold. Returns `None`
/// when the move is too small to call a direction.
pub fn fallback_draft(snapshot: &MarketSnapshot) -> Option<SignalDraft> {
    let change = snapshot.change_24h_pct;
    let magnitude = change.abs();
    if !magnitude.is_finite() || magnitude < FALLBACK_MIN_MOVE_PCT {
        return None;
    }

    let side = if change > 0.0 { Side::Long } else { Side::Short };
    let take_profit_pct = magnitude * 0.8;
    let urgency = if magnitude >= 3.0 {
        Urgency::Immediate
    } else if magnitude >= 1.5 {
        Urgency::Soon
    } else {
        Urgency::Wait
    };

    Some(SignalDraft {
        side,
        confidence: 50.0 + magnitude * 10.0,
        take_profit_pct,
        stop_loss_pct: take_profit_pct / 2.0,
        hold_minutes: 240.0 - magnitude * 20.0,
        urgency,
        rationale: format!(
            "Momentum fallback: {:+.2}% over 24h, {:?} volume, funding {:?}",
            change, snapshot.volume_tier, snapshot.funding_bias
        ),
        source: SignalSource::Fallback,
    })
}

/// Accept an inference verdict only if it is directional and confident enough
pub fn draft_from_analysis(analysis: Analysis, min_confidence: f64) -> Option<SignalDraft> {
    let side = analysis.direction.side()?;
    if analysis.confidence < min_confidence {
        return None;
    }

    Some(SignalDraft {
        side,
        confidence: analysis.confidence,
        take_profit_pct: analysis.take_profit_pct,
        stop_loss_pct: analysis.stop_loss_pct,
        hold_minutes: analysis.hold_minutes,
        urgency: analysis.urgency,
        rationale: analysis.rationale,
        source: SignalSource::Inference,
    })
}

pub fn instrument_context(snapshot: &MarketSnapshot) -> InstrumentContext {
    InstrumentContext {
        instrument: snapshot.instrument.clone(),
        price: snapshot.price,
        change_24h_pct: snapshot.change_24h_pct,
        funding_rate_pct: snapshot.funding_rate * 100.0,
        funding_bias: snapshot.funding_bias,
        volume_tier: snapshot.volume_tier,
        momentum: snapshot.momentum,
        score: snapshot.score,
        volatility_trend: snapshot.volatility_trend,
        momentum_shift: snapshot.momentum_shift,
        recent_prices: snapshot.price_history.clone(),
    }
}

/// Clamp the draft, size it, and turn it into a signal valid from `now`
pub fn build_signal(
    draft: SignalDraft,
    snapshot: &MarketSnapshot,
    config: &BotConfig,
    now: DateTime<Utc>,
) -> TradingSignal {
    let confidence = draft.confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
    let tp_pct = draft.take_profit_pct.clamp(MIN_TAKE_PROFIT_PCT, MAX_TAKE_PROFIT_PCT);
    let sl_pct = draft.stop_loss_pct.clamp(MIN_STOP_LOSS_PCT, MAX_STOP_LOSS_PCT);

    let entry = snapshot.price;
    let sign = draft.side.sign();
    let take_profit = entry * (1.0 + sign * tp_pct / 100.0);
    let stop_loss = entry * (1.0 - sign * sl_pct / 100.0);

    TradingSignal {
        id: Uuid::new_v4(),
        instrument: snapshot.instrument.clone(),
        side: draft.side,
        confidence,
        urgency: draft.urgency,
        entry_price: entry,
        take_profit,
        stop_loss,
        size: sizing::position_size(confidence, snapshot.liquidity_score, config),
        leverage: sizing::leverage(confidence, snapshot.volatility, snapshot.max_leverage, config),
        hold_minutes: sizing::hold_minutes(draft.hold_minutes, snapshot.volatility_trend, confidence),
        rationale: draft.rationale,
        source: draft.source,
        created_at: now,
        expires_at: now + config.signal_expiry(),
        snapshot: snapshot.clone(),
    }
}

/// True when price has moved far enough against the signal to invalidate it
pub fn is_contradicted(signal: &TradingSignal, price: f64) -> bool {
    let move_pct = (price - signal.entry_price) / signal.entry_price * 100.0;
    signal.side.sign() * move_pct <= -CONTRADICTION_PCT
}
