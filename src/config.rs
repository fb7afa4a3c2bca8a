//! Engine configuration
//!
//! Every threshold the indicators use lives here as a named field. Most of
//! them are empirically tuned values with no documented derivation; they are
//! kept as configuration points rather than re-derived.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::Instrument;

/// CPR width classification bands (points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidthBands {
    pub ultra_narrow: f64,
    pub narrow: f64,
    pub normal: f64,
}

impl Default for WidthBands {
    fn default() -> Self {
        Self { ultra_narrow: 40.0, narrow: 70.0, normal: 120.0 }
    }
}

/// Velocity thresholds (points or premium per second)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityThresholds {
    /// Flow velocity for "ULTRA FLOW"
    pub ultra_flow: f64,
    /// Flow velocity for "PROBABLE FLOW"
    pub probable_flow: f64,
    /// Index velocity for an institutional breakout
    pub breakout: f64,
    /// Average premium velocity that upgrades pressure to ignition
    pub ignition: f64,
    /// Premium velocity that turns a two-sided build into true gamma
    pub gamma_true_up: f64,
}

impl Default for VelocityThresholds {
    fn default() -> Self {
        Self {
            ultra_flow: 0.6,
            probable_flow: 0.25,
            breakout: 0.7,
            ignition: 0.8,
            gamma_true_up: 0.5,
        }
    }
}

/// Open-interest classifier thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowThresholds {
    /// Builds on both sides that mark a two-sided gamma build
    pub gamma_build_count: u32,
    /// Unwinds on one side for a god-mode vacuum
    pub god_unwind_count: u32,
    /// Maximum builds allowed on the opposite side for god mode
    pub god_max_opposite_build: u32,
    /// Builds required for dealer intent
    pub intent_build_count: u32,
    /// Opposite-side unwinds required for dealer intent
    pub intent_unwind_count: u32,
    /// OI pressure imbalance ratio for early pressure
    pub pressure_ratio: f64,
    /// Half-width of the gamma classifier window (points)
    pub gamma_span: f64,
    /// Half-width of the god / intent / predictive windows (points)
    pub core_span: f64,
    /// Half-width of the support/resistance scan (points)
    pub oi_levels_span: f64,
}

impl Default for FlowThresholds {
    fn default() -> Self {
        Self {
            gamma_build_count: 3,
            god_unwind_count: 3,
            god_max_opposite_build: 1,
            intent_build_count: 3,
            intent_unwind_count: 2,
            pressure_ratio: 1.5,
            gamma_span: 150.0,
            core_span: 100.0,
            oi_levels_span: 500.0,
        }
    }
}

/// Radar and proximity thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarThresholds {
    /// Minimum index move since the previous cycle for a vacuum
    pub vacuum_acceleration: f64,
    /// Premium / previous close ratio that counts as a jump (vacuum radar)
    pub vacuum_premium_jump: f64,
    /// |ΔOI| below which OI is flat (vacuum radar)
    pub vacuum_oi_flat: f64,
    /// |put ΔOI| cap for the dark-pool detector
    pub dark_pool_oi_cap: f64,
    /// Distance to an OI wall for dealer traps
    pub wall_proximity: f64,
    /// Distance to TC/BC/pivot inside the CPR
    pub cpr_proximity: f64,
    /// Distance to prior-day high/low for liquidity targets
    pub pdh_pdl_proximity: f64,
    /// Distance to max pain that pins price
    pub max_pain_proximity: f64,
}

impl Default for RadarThresholds {
    fn default() -> Self {
        Self {
            vacuum_acceleration: 25.0,
            vacuum_premium_jump: 1.05,
            vacuum_oi_flat: 1500.0,
            dark_pool_oi_cap: 2000.0,
            wall_proximity: 30.0,
            cpr_proximity: 20.0,
            pdh_pdl_proximity: 50.0,
            max_pain_proximity: 30.0,
        }
    }
}

/// Smart scalp thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalpThresholds {
    /// Premium growth over the previous cycle for gamma acceleration
    pub premium_acceleration: f64,
    /// Premium / previous close ratio for a vacuum jump
    pub premium_jump: f64,
    /// |ΔOI| below which OI is flat
    pub oi_flat: f64,
}

impl Default for ScalpThresholds {
    fn default() -> Self {
        Self { premium_acceleration: 1.05, premium_jump: 1.03, oi_flat: 1000.0 }
    }
}

/// EMA sub-panel parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    /// Closes required before a cross is reported
    pub scalp_min_samples: usize,
    /// Closes required before compression is reported
    pub compression_min_samples: usize,
    pub compression_distance: f64,
    pub tight_distance: f64,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            scalp_min_samples: 30,
            compression_min_samples: 40,
            compression_distance: 0.5,
            tight_distance: 0.3,
        }
    }
}

/// Fixed multipliers applied to the entry leg price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeMultipliers {
    pub weak_pivot: f64,
    pub entry: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
}

impl Default for TradeMultipliers {
    fn default() -> Self {
        Self { weak_pivot: 0.75, entry: 0.5, target1: 1.3, target2: 1.6, target3: 2.1 }
    }
}

/// Institutional strike score weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectorWeights {
    pub open_interest: f64,
    pub gamma_proxy: f64,
    pub iv_edge: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self { open_interest: 0.5, gamma_proxy: 0.3, iv_edge: 0.2 }
    }
}

/// Configuration for the signal engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tracked index (NIFTY 50 = security 13 on IDX_I)
    pub underlying: Instrument,
    /// Strike grid step (points)
    pub strike_step: f64,
    /// Pause between cycles (seconds)
    pub poll_interval_secs: u64,
    /// Index move between cycles that switches news mode on
    pub news_mode_threshold: f64,
    /// Days of daily history requested for the CPR
    pub history_days: i64,
    /// Half-width of the option-chain VWAP window (points)
    pub vwap_span: f64,
    /// Session open (IST)
    pub session_open: NaiveTime,
    /// Volatility index value used when it cannot be fetched
    pub default_volatility: f64,
    pub width_bands: WidthBands,
    pub velocity: VelocityThresholds,
    pub flow: FlowThresholds,
    pub radar: RadarThresholds,
    pub scalp: ScalpThresholds,
    pub ema: EmaConfig,
    pub trade: TradeMultipliers,
    pub selector: SelectorWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            underlying: Instrument::index("13"),
            strike_step: 50.0,
            poll_interval_secs: 8,
            news_mode_threshold: 80.0,
            history_days: 10,
            vwap_span: 200.0,
            session_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or(NaiveTime::MIN),
            default_volatility: 15.0,
            width_bands: WidthBands::default(),
            velocity: VelocityThresholds::default(),
            flow: FlowThresholds::default(),
            radar: RadarThresholds::default(),
            scalp: ScalpThresholds::default(),
            ema: EmaConfig::default(),
            trade: TradeMultipliers::default(),
            selector: SelectorWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Load overrides from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
