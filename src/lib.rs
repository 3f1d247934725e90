// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod inference;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod report;
pub mod strategy;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use config::BotConfig;
pub use error::ConfigError;
pub use models::*;
pub use orchestrator::Orchestrator;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
