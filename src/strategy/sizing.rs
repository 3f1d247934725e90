use crate::config::BotConfig;
use crate::models::{VolatilityRegime, VolatilityTrend};

pub const MIN_HOLD_MINUTES: f64 = 15.0;
pub const MAX_HOLD_MINUTES: f64 = 720.0;

/// Fraction of capital to commit, tiered by confidence and cut for thin liquidity
pub fn position_size(confidence: f64, liquidity_score: f64, config: &BotConfig) -> f64 {
    let tier: f64 = if confidence >= 85.0 {
        0.10
    } else if confidence >= 75.0 {
        0.07
    } else if confidence >= 65.0 {
        0.05
    } else {
        0.03
    };

    let per_slot = 1.0 / config.max_concurrent_positions as f64;
    let capped = tier.min(config.max_position_size).min(per_slot);

    let slippage_factor = if liquidity_score < 30.0 {
        0.5
    } else if liquidity_score < 60.0 {
        0.75
    } else {
        1.0
    };

    capped * slippage_factor
}

/// Whole-number leverage, tiered by confidence and reduced in violent markets
pub fn leverage(
    confidence: f64,
    volatility: VolatilityRegime,
    instrument_max: u32,
    config: &BotConfig,
) -> u32 {
    let base: i64 = if confidence >= 85.0 {
        5
    } else if confidence >= 75.0 {
        4
    } else if confidence >= 65.0 {
        3
    } else {
        2
    };

    let penalty = match volatility {
        VolatilityRegime::Extreme => 2,
        VolatilityRegime::High => 1,
        VolatilityRegime::Normal | VolatilityRegime::Low => 0,
    };

    let ceiling = config.max_leverage.min(instrument_max.max(1)).max(1) as i64;
    (base - penalty).clamp(1, ceiling) as u32
}

/// Final hold time in minutes after volatility and conviction adjustments
pub fn hold_minutes(base_minutes: f64, trend: VolatilityTrend, confidence: f64) -> i64 {
    let mut minutes = base_minutes.clamp(MIN_HOLD_MINUTES, MAX_HOLD_MINUTES);

    minutes *= match trend {
        VolatilityTrend::Increasing => 0.7,
        VolatilityTrend::Decreasing => 1.3,
        VolatilityTrend::Stable | VolatilityTrend::Unknown => 1.0,
    };

    if confidence >= 85.0 {
        minutes *= 1.15;
    }

    minutes.clamp(MIN_HOLD_MINUTES, MAX_HOLD_MINUTES).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_grows_with_confidence() {
        let config = BotConfig::default();
        let low = position_size(55.0, 100.0, &config);
        let mid = position_size(70.0, 100.0, &config);
        let high = position_size(90.0, 100.0, &config);

        assert!(low < mid && mid < high);
        assert_eq!(high, 0.10);
    }

    #[test]
    fn test_size_capped_by_config_and_slots() {
        let config = BotConfig {
            max_position_size: 0.04,
            ..Default::default()
        };
        assert_eq!(position_size(90.0, 100.0, &config), 0.04);

        let config = BotConfig {
            max_concurrent_positions: 20,
            ..Default::default()
        };
        assert_eq!(position_size(90.0, 100.0, &config), 0.05);
    }

    #[test]
    fn test_size_reduced_for_poor_liquidity() {
        let config = BotConfig::default();
        assert_eq!(position_size(90.0, 20.0, &config), 0.05);
        assert!((position_size(90.0, 45.0, &config) - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_leverage_tiers_and_bounds() {
        let config = BotConfig::default();
        assert_eq!(leverage(90.0, VolatilityRegime::Normal, 50, &config), 5);
        assert_eq!(leverage(78.0, VolatilityRegime::Normal, 50, &config), 4);
        assert_eq!(leverage(90.0, VolatilityRegime::Extreme, 50, &config), 3);
        assert_eq!(leverage(55.0, VolatilityRegime::Extreme, 50, &config), 1);
        // Instrument ceiling wins
        assert_eq!(leverage(90.0, VolatilityRegime::Low, 3, &config), 3);

        let config = BotConfig {
            max_leverage: 2,
            ..Default::default()
        };
        assert_eq!(leverage(90.0, VolatilityRegime::Low, 50, &config), 2);
    }

    #[test]
    fn test_hold_adjustments() {
        assert_eq!(hold_minutes(100.0, VolatilityTrend::Stable, 70.0), 100);
        assert_eq!(hold_minutes(100.0, VolatilityTrend::Increasing, 70.0), 70);
        assert_eq!(hold_minutes(100.0, VolatilityTrend::Decreasing, 70.0), 130);
        assert_eq!(hold_minutes(100.0, VolatilityTrend::Stable, 90.0), 115);
        assert_eq!(hold_minutes(5.0, VolatilityTrend::Increasing, 70.0), 15);
        assert_eq!(hold_minutes(10_000.0, VolatilityTrend::Decreasing, 90.0), 720);
    }
}
