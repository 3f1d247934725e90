use crate::models::{ExitReason, SimulatedOutcome, TradingSignal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Share of non-winning outcomes that hit the stop; the rest time out near entry
const STOP_SHARE_OF_LOSSES: f64 = 0.75;
const TIME_EXIT_DRIFT: f64 = 0.005;

/// Scripts how a dry-run position ends, in place of a real venue
pub trait OutcomeSimulator: Send + Sync {
    fn simulate_outcome(&self, signal: &TradingSignal) -> SimulatedOutcome;
}

/// Win probability rises with signal confidence
pub struct RandomOutcomeSimulator {
    rng: Mutex<StdRng>,
}

impl RandomOutcomeSimulator {
    /// Seeded runs are reproducible
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng) }
    }

    pub fn win_probability(confidence: f64) -> f64 {
        (confidence / 100.0 * 0.8).clamp(0.0, 1.0)
    }
}

impl OutcomeSimulator for RandomOutcomeSimulator {
    fn simulate_outcome(&self, signal: &TradingSignal) -> SimulatedOutcome {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let p_win = Self::win_probability(signal.confidence);
        let roll: f64 = rng.gen();
        let max_hold = signal.hold_minutes.max(1);

        if roll < p_win {
            SimulatedOutcome {
                exit_price: signal.take_profit,
                exit_reason: ExitReason::TakeProfit,
                hold_minutes: rng.gen_range(1..=max_hold),
            }
        } else if roll < p_win + (1.0 - p_win) * STOP_SHARE_OF_LOSSES {
            SimulatedOutcome {
                exit_price: signal.stop_loss,
                exit_reason: ExitReason::StopLoss,
                hold_minutes: rng.gen_range(1..=max_hold),
            }
        } else {
            let drift = rng.gen_range(-TIME_EXIT_DRIFT..=TIME_EXIT_DRIFT);
            SimulatedOutcome {
                exit_price: signal.entry_price * (1.0 + drift),
                exit_reason: ExitReason::TimeLimit,
                hold_minutes: max_hold,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::signal;
    use crate::models::Side;

    #[test]
    fn test_win_probability_scales_with_confidence() {
        assert!((RandomOutcomeSimulator::win_probability(50.0) - 0.4).abs() < 1e-12);
        assert!((RandomOutcomeSimulator::win_probability(95.0) - 0.76).abs() < 1e-12);
    }

    #[test]
    fn test_same_seed_same_outcomes() {
        let sig = signal("BTC", Side::Long, 100.0, 80.0);
        let a = RandomOutcomeSimulator::new(Some(7));
        let b = RandomOutcomeSimulator::new(Some(7));

        for _ in 0..20 {
            assert_eq!(a.simulate_outcome(&sig), b.simulate_outcome(&sig));
        }
    }

    #[test]
    fn test_outcomes_stay_within_signal_bounds() {
        let sig = signal("ETH", Side::Short, 200.0, 70.0);
        let sim = RandomOutcomeSimulator::new(Some(42));

        let mut reasons = std::collections::HashSet::new();
        for _ in 0..500 {
            let outcome = sim.simulate_outcome(&sig);
            assert!(outcome.hold_minutes >= 1 && outcome.hold_minutes <= sig.hold_minutes);
            match outcome.exit_reason {
                ExitReason::TakeProfit => assert_eq!(outcome.exit_price, sig.take_profit),
                ExitReason::StopLoss => assert_eq!(outcome.exit_price, sig.stop_loss),
                ExitReason::TimeLimit => {
                    assert!((outcome.exit_price / sig.entry_price - 1.0).abs() <= TIME_EXIT_DRIFT + 1e-12)
                }
                other => panic!("unexpected simulated exit {:?}", other),
            }
            reasons.insert(outcome.exit_reason);
        }
        assert_eq!(reasons.len(), 3);
    }
}
