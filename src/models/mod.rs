use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw per-instrument record returned by the market data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentData {
    pub instrument: String,
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    /// Funding rate as a fraction per funding interval (0.0002 = 0.02%)
    pub funding_rate: f64,
    /// Open interest in contracts (multiply by price for notional)
    pub open_interest: f64,
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MomentumDirection {
    Up,
    Down,
    Neutral,
}

impl MomentumDirection {
    pub fn sign(self) -> f64 {
        match self {
            MomentumDirection::Up => 1.0,
            MomentumDirection::Down => -1.0,
            MomentumDirection::Neutral => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FundingBias {
    /// Funding pays the side that follows momentum
    Contrarian,
    TrendFollow,
    /// Funding so stretched in the momentum direction that the trade is crowded
    Crowded,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolumeTier {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolatilityTrend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

/// Immutable per-instrument observation produced once per observer cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: String,
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    pub funding_rate: f64,
    pub open_interest: f64,
    pub max_leverage: u32,
    pub momentum: MomentumDirection,
    pub momentum_strength: f64,
    pub funding_bias: FundingBias,
    pub volume_tier: VolumeTier,
    pub liquidity_score: f64,
    pub tradeable: bool,
    pub volatility: VolatilityRegime,
    pub trend_strength: TrendStrength,
    /// Composite opportunity score in [-100, 100]
    pub score: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Recent prices, oldest first, ending with `price`
    pub price_history: Vec<f64>,
    pub volatility_trend: VolatilityTrend,
    pub momentum_shift: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Immediate,
    Soon,
    Wait,
}

/// Where the numbers in a signal came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalSource {
    Inference,
    Fallback,
}

/// A time-bounded proposal to trade one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub confidence: f64,
    pub urgency: Urgency,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Fraction of capital
    pub size: f64,
    pub leverage: u32,
    pub hold_minutes: i64,
    pub rationale: String,
    pub source: SignalSource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub snapshot: MarketSnapshot,
}

impl TradingSignal {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Expected return of the take-profit target, in percent before leverage
    pub fn take_profit_pct(&self) -> f64 {
        ((self.take_profit - self.entry_price) / self.entry_price).abs() * 100.0
    }

    pub fn stop_loss_pct(&self) -> f64 {
        ((self.stop_loss - self.entry_price) / self.entry_price).abs() * 100.0
    }

    /// Same signal with entry moved to `price`, targets kept at the same distance in percent
    pub fn repriced(&self, price: f64) -> TradingSignal {
        let mut signal = self.clone();
        if price == self.entry_price {
            return signal;
        }

        let sign = self.side.sign();
        signal.take_profit = price * (1.0 + sign * self.take_profit_pct() / 100.0);
        signal.stop_loss = price * (1.0 - sign * self.stop_loss_pct() / 100.0);
        signal.entry_price = price;
        signal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeLimit,
    MomentumShift,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TrailingStop => "trailing-stop",
            ExitReason::TimeLimit => "time-limit",
            ExitReason::MomentumShift => "momentum-shift",
            ExitReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scripted result for a dry-run position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedOutcome {
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub hold_minutes: i64,
}

/// A live trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Inherited from the originating signal
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub size: f64,
    pub leverage: u32,
    pub confidence: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub trailing_stop: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub max_hold: Duration,
    pub snapshot: MarketSnapshot,
    pub simulated: Option<SimulatedOutcome>,
}

/// Append-only record of a finished trade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Fraction of capital
    pub size: f64,
    pub leverage: u32,
    pub confidence: f64,
    /// Take-profit distance in percent
    pub expected_return: f64,
    /// Stop distance in percent times leverage
    pub risk_score: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub realized_pnl_pct: f64,
    /// P&L in capital units
    pub realized_pnl: f64,
    pub resolved_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.realized_pnl_pct > 0.0
    }

    pub fn hold_minutes(&self) -> i64 {
        (self.resolved_at - self.entry_time).num_minutes()
    }
}
