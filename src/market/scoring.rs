use crate::models::{
    FundingBias, InstrumentData, MomentumDirection, TrendStrength, VolatilityRegime,
    VolatilityTrend, VolumeTier,
};

/// |score| above which an instrument counts as an opportunity
pub const OPPORTUNITY_THRESHOLD: f64 = 40.0;

const DIRECTION_DEADBAND_PCT: f64 = 0.1;
const FULL_STRENGTH_CHANGE_PCT: f64 = 5.0;
const MOMENTUM_WEIGHT: f64 = 0.5;

// Funding thresholds, in percent per funding interval
const FUNDING_NEUTRAL_PCT: f64 = 0.005;
const FUNDING_CROWDED_PCT: f64 = 0.05;
const CONTRARIAN_BONUS: f64 = 20.0;
const TREND_FOLLOW_BONUS: f64 = 10.0;
const CROWDED_PENALTY: f64 = -10.0;

const STRONG_VOLUME: f64 = 50_000_000.0;
const MODERATE_VOLUME: f64 = 10_000_000.0;

// Liquidity gate
const MIN_VOLUME: f64 = 1_000_000.0;
const MIN_OPEN_INTEREST_NOTIONAL: f64 = 500_000.0;

const MIN_TREND_PRICES: usize = 6;
const TREND_PRICE_WINDOW: usize = 20;

/// Everything the observer derives from a single raw record
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub momentum: MomentumDirection,
    pub momentum_strength: f64,
    pub funding_bias: FundingBias,
    pub volume_tier: VolumeTier,
    pub liquidity_score: f64,
    pub tradeable: bool,
    pub volatility: VolatilityRegime,
    pub trend_strength: TrendStrength,
    pub score: f64,
    pub confidence: f64,
}

impl ScoreBreakdown {
    /// Tradeable, |score| above the threshold and confident enough
    pub fn is_opportunity(&self, min_confidence: f64) -> bool {
        self.tradeable
            && self.score.abs() > OPPORTUNITY_THRESHOLD
            && self.confidence >= min_confidence
    }
}

pub fn momentum_direction(change_pct: f64) -> MomentumDirection {
    if change_pct > DIRECTION_DEADBAND_PCT {
        MomentumDirection::Up
    } else if change_pct < -DIRECTION_DEADBAND_PCT {
        MomentumDirection::Down
    } else {
        MomentumDirection::Neutral
    }
}

pub fn volume_tier(volume: f64) -> VolumeTier {
    if volume >= STRONG_VOLUME {
        VolumeTier::Strong
    } else if volume >= MODERATE_VOLUME {
        VolumeTier::Moderate
    } else {
        VolumeTier::Weak
    }
}

fn volume_multiplier(tier: VolumeTier) -> f64 {
    match tier {
        VolumeTier::Strong => 1.2,
        VolumeTier::Moderate => 1.0,
        VolumeTier::Weak => 0.7,
    }
}

pub fn funding_bias(funding_pct: f64, momentum: MomentumDirection) -> FundingBias {
    if funding_pct.abs() < FUNDING_NEUTRAL_PCT || momentum == MomentumDirection::Neutral {
        return FundingBias::Neutral;
    }

    let same_side = funding_pct.signum() == momentum.sign();
    if !same_side {
        FundingBias::Contrarian
    } else if funding_pct.abs() <= FUNDING_CROWDED_PCT {
        FundingBias::TrendFollow
    } else {
        FundingBias::Crowded
    }
}

fn funding_term(bias: FundingBias) -> f64 {
    match bias {
        FundingBias::Contrarian => CONTRARIAN_BONUS,
        FundingBias::TrendFollow => TREND_FOLLOW_BONUS,
        FundingBias::Crowded => CROWDED_PENALTY,
        FundingBias::Neutral => 0.0,
    }
}

pub fn volatility_regime(change_pct: f64) -> VolatilityRegime {
    let magnitude = change_pct.abs();
    if magnitude < 1.0 {
        VolatilityRegime::Low
    } else if magnitude < 3.0 {
        VolatilityRegime::Normal
    } else if magnitude < 7.0 {
        VolatilityRegime::High
    } else {
        VolatilityRegime::Extreme
    }
}

pub fn trend_strength(change_pct: f64) -> TrendStrength {
    let magnitude = change_pct.abs();
    if magnitude < 1.5 {
        TrendStrength::Weak
    } else if magnitude < 4.0 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Strong
    }
}

fn liquidity_score(volume: f64, open_interest_notional: f64) -> f64 {
    let volume_part = volume / 100_000_000.0 * 70.0;
    let oi_part = open_interest_notional / 50_000_000.0 * 30.0;
    (volume_part + oi_part).clamp(0.0, 100.0)
}

/// Composite opportunity score for one instrument
pub fn score_instrument(data: &InstrumentData) -> ScoreBreakdown {
    let momentum = momentum_direction(data.change_24h_pct);
    let momentum_strength = (data.change_24h_pct.abs() / FULL_STRENGTH_CHANGE_PCT * 100.0).min(100.0);
    let funding_pct = data.funding_rate * 100.0;
    let bias = funding_bias(funding_pct, momentum);
    let tier = volume_tier(data.volume_24h);

    let oi_notional = data.open_interest * data.price;
    let tradeable = data.volume_24h >= MIN_VOLUME && oi_notional >= MIN_OPEN_INTEREST_NOTIONAL;

    let (score, confidence) = if tradeable {
        let raw = (MOMENTUM_WEIGHT * momentum_strength + funding_term(bias)) * momentum.sign();
        let score = (raw * volume_multiplier(tier)).clamp(-100.0, 100.0);
        (score, (50.0 + score.abs() / 2.0).min(100.0))
    } else {
        (0.0, 0.0)
    };

    ScoreBreakdown {
        momentum,
        momentum_strength,
        funding_bias: bias,
        volume_tier: tier,
        liquidity_score: liquidity_score(data.volume_24h, oi_notional),
        tradeable,
        volatility: volatility_regime(data.change_24h_pct),
        trend_strength: trend_strength(data.change_24h_pct),
        score,
        confidence,
    }
}

/// Compare step volatility of the newer half of `prices` against the older half
pub fn volatility_trend(prices: &[f64]) -> VolatilityTrend {
    let window = &prices[prices.len().saturating_sub(TREND_PRICE_WINDOW)..];
    if window.len() < MIN_TREND_PRICES {
        return VolatilityTrend::Unknown;
    }

    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] / w[0] - 1.0).abs())
        .collect();
    let mid = returns.len() / 2;
    let (older, newer) = returns.split_at(mid);
    if older.is_empty() || newer.is_empty() {
        return VolatilityTrend::Unknown;
    }

    let older_avg = older.iter().sum::<f64>() / older.len() as f64;
    let newer_avg = newer.iter().sum::<f64>() / newer.len() as f64;

    if older_avg == 0.0 {
        return if newer_avg > 0.0 {
            VolatilityTrend::Increasing
        } else {
            VolatilityTrend::Stable
        };
    }

    let ratio = newer_avg / older_avg;
    if ratio > 1.2 {
        VolatilityTrend::Increasing
    } else if ratio < 0.8 {
        VolatilityTrend::Decreasing
    } else {
        VolatilityTrend::Stable
    }
}

/// True when both directions are decided and point opposite ways
pub fn momentum_shift(current: MomentumDirection, earlier: Option<MomentumDirection>) -> bool {
    match earlier {
        Some(earlier) => {
            current != MomentumDirection::Neutral
                && earlier != MomentumDirection::Neutral
                && current != earlier
        }
        None => false,
    }
}
