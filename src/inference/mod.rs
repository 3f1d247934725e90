pub mod openai;

pub use openai::OpenAiAnalyst;

use crate::models::{FundingBias, MomentumDirection, Side, Urgency, VolatilityTrend, VolumeTier};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Context handed to the inference service for one instrument
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentContext {
    pub instrument: String,
    pub price: f64,
    pub change_24h_pct: f64,
    pub funding_rate_pct: f64,
    pub funding_bias: FundingBias,
    pub volume_tier: VolumeTier,
    pub momentum: MomentumDirection,
    pub score: f64,
    pub volatility_trend: VolatilityTrend,
    pub momentum_shift: bool,
    /// Oldest first
    pub recent_prices: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDirection {
    Long,
    Short,
    Neutral,
}

impl AnalysisDirection {
    pub fn side(self) -> Option<Side> {
        match self {
            AnalysisDirection::Long => Some(Side::Long),
            AnalysisDirection::Short => Some(Side::Short),
            AnalysisDirection::Neutral => None,
        }
    }
}

/// Verdict returned by the inference service; numbers are unclamped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    pub direction: AnalysisDirection,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub hold_minutes: f64,
    pub urgency: Urgency,
}

/// External inference collaborator. Callers must always have a fallback.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn analyze(&self, context: &InstrumentContext) -> Result<Analysis>;
}
