// Position lifecycle and dry-run outcome simulation
pub mod position_manager;
pub mod simulator;

pub use position_manager::{PositionEvent, PositionManager, PositionStats};
pub use simulator::{OutcomeSimulator, RandomOutcomeSimulator};
