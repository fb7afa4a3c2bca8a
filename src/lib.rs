// Library crate - exports the market data model, provider client and signal engine

pub mod api;
pub mod config;
pub mod dhan;
pub mod store;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use trading_core::{CycleOutcome, Engine, EngineSnapshot};
pub use types::*;
