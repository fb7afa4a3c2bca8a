//! Trading Core - Signal fusion and the single-trade lifecycle
//!
//! This module contains the engine components, in the order a cycle runs them:
//! - Structural levels (CPR, OI walls, VIX range, liquidity targets)
//! - Reference price (VWAP tiers)
//! - Options-flow classifiers (gamma, god mode, dealer intent, traps)
//! - Leg structures (floating pivots, institutional selector) and EMA panels
//! - Radars and regime trackers
//! - Decision cascade and smart scalp
//! - Trade lifecycle
//! - Cycle orchestration

pub mod cascade;
pub mod context;
pub mod ema;
pub mod engine;
pub mod flow;
pub mod levels;
pub mod pivot;
pub mod radar;
pub mod regime;
pub mod trader;
pub mod vwap;

// Re-export commonly used types
pub use cascade::{Decision, FilteredSniper, ScalpPlan, SniperLabel};
pub use context::{EngineContext, IndicatorState};
pub use engine::{CycleOutcome, Engine, EngineSnapshot};
pub use levels::{OiLevels, StructuralLevels, VixRange};
pub use pivot::LegStructure;
pub use trader::{PerformanceSummary, Trade, TradeAction, TradeLevels, TradeLifecycle};
pub use vwap::{ReferencePrice, VwapTier};
