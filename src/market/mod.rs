// Market observation: polling, scoring and rolling snapshot history
pub mod history;
pub mod observer;
pub mod scoring;

pub use history::SnapshotHistory;
pub use observer::{MarketObserver, ObserverEvent};
pub use scoring::{score_instrument, ScoreBreakdown, OPPORTUNITY_THRESHOLD};
