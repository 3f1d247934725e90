// Signal synthesis, sizing and the generator service
pub mod generator;
pub mod signals;
pub mod sizing;

pub use generator::{GeneratorStats, SignalEvent, SignalGenerator};
pub use signals::SignalDraft;
