//! Engine Context
//!
//! Everything that outlives a single cycle lives here:
//! - `IndicatorState`: the last published value of every indicator
//! - `Momentum`: previous-cycle scalars used by velocity and memory rules
//! - `RangeMemory`: per-leg session/micro bounds for floating pivots
//! - `CandleCache`: intraday closes, shared within one cycle only
//!
//! Each `IndicatorState` field has exactly one writer (noted on the field).
//! Stages run in a fixed order so readers always see values written earlier
//! in the same cycle, or in a prior one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::debug;

use crate::types::{Direction, Relation};

use super::cascade::{
    AutoExecution, Decision, FilteredSniper, GammaAccel, OpeningSniper, ScalpPlan, SniperLabel,
};
use super::ema::EmaPanel;
use super::flow::{DealerIntent, DealerTrap, GammaState, GodSignal, InsideCpr, PredictiveSignal};
use super::levels::{LiquidityTarget, OiLevels, StructuralLevels, VixRange};
use super::pivot::LegStructure;
use super::radar::{Absorption, Breakout, DarkPool, FlowLabel, Vacuum};
use super::regime::{TrendRegime, TrendSignal};
use super::vwap::ReferencePrice;

/// An indicator could not produce a fresh value this cycle; the previously
/// published one stays in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Stale<T> {
    pub reason: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> Stale<T> {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), _value: PhantomData }
    }
}

/// Result of an indicator whose failure mode is "keep the last good value"
pub type Fresh<T> = Result<T, Stale<T>>;

/// Overwrite `slot` with a fresh value, or log and keep it
pub fn settle<T, S: From<T>>(slot: &mut S, fresh: Fresh<T>, what: &str) {
    match fresh {
        Ok(value) => *slot = S::from(value),
        Err(stale) => debug!("{} stale, keeping previous: {}", what, stale.reason),
    }
}

/// Relation and reference price for the current cycle, bundled because
/// almost every rule gates on "ABOVE with price over VWAP" or the reverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate {
    pub ltp: f64,
    pub relation: Option<Relation>,
    pub vwap: Option<f64>,
}

impl Gate {
    pub fn aligned(&self) -> Option<Direction> {
        self.relation?.aligned(self.ltp, self.vwap?)
    }

    pub fn is(&self, relation: Relation) -> bool {
        self.relation == Some(relation)
    }
}

/// A value observed at a point in time, for per-second velocities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: f64, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }

    /// |Δvalue| per second since this sample; 0 when no time has passed
    pub fn velocity_to(&self, value: f64, at: DateTime<Utc>) -> f64 {
        let dt = (at - self.at).num_milliseconds() as f64 / 1000.0;
        if dt > 0.0 {
            (value - self.value).abs() / dt
        } else {
            0.0
        }
    }
}

/// Velocity since `memory`, then replace `memory` with the new observation
pub fn advance(memory: &mut Option<Sample>, value: f64, at: DateTime<Utc>) -> f64 {
    let velocity = memory.map_or(0.0, |prev| prev.velocity_to(value, at));
    *memory = Some(Sample::new(value, at));
    velocity
}

/// Previous-cycle scalars. Each memory belongs to one indicator.
#[derive(Debug, Clone, Default)]
pub struct Momentum {
    /// News mode
    pub news_ltp: Option<f64>,
    /// Institutional flow confirmation
    pub flow_ltp: Option<Sample>,
    /// Breakout radar
    pub breakout_ltp: Option<Sample>,
    /// Predictive gamma (average premium across the window)
    pub premium_avg: Option<Sample>,
    /// Liquidity vacuum radar
    pub vacuum_ltp: Option<f64>,
    /// Trend continuation
    pub trend_ltp: Option<f64>,
    /// Dark pool detector (ATM put premium)
    pub dark_pool_premium: Option<f64>,
    /// Smart scalp
    pub scalp_ltp: Option<f64>,
    pub scalp_call_premium: Option<f64>,
    pub scalp_put_premium: Option<f64>,
    /// Opening sniper has fired
    pub opening_done: bool,
}

/// Session and micro bounds for one leg
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeBounds {
    pub session_high: f64,
    pub session_low: f64,
    pub micro_high: f64,
    pub micro_low: f64,
}

impl RangeBounds {
    pub fn high(&self) -> f64 {
        self.session_high.max(self.micro_high)
    }

    pub fn low(&self) -> f64 {
        self.session_low.min(self.micro_low)
    }
}

/// Per strike+side range memory. Bounds only ever widen.
#[derive(Debug, Clone, Default)]
pub struct RangeMemory {
    ranges: HashMap<String, RangeBounds>,
}

impl RangeMemory {
    pub fn contains(&self, key: &str) -> bool {
        self.ranges.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RangeBounds> {
        self.ranges.get(key)
    }

    /// Seed the key on first sight (session range if known, else `price`),
    /// widen the micro bounds with `price`, and return `(high, low)`.
    pub fn update(&mut self, key: &str, seed: Option<(f64, f64)>, price: f64) -> (f64, f64) {
        let bounds = self.ranges.entry(key.to_string()).or_insert_with(|| {
            let (session_high, session_low) = seed.unwrap_or((price, price));
            RangeBounds { session_high, session_low, micro_high: price, micro_low: price }
        });

        bounds.micro_high = bounds.micro_high.max(price);
        bounds.micro_low = bounds.micro_low.min(price);

        (bounds.high(), bounds.low())
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Intraday closes per security id; cleared at the start of every cycle
#[derive(Debug, Clone, Default)]
pub struct CandleCache {
    closes: HashMap<String, Vec<f64>>,
}

impl CandleCache {
    pub fn clear(&mut self) {
        self.closes.clear();
    }

    pub fn get(&self, security_id: &str) -> Option<&Vec<f64>> {
        self.closes.get(security_id)
    }

    pub fn insert(&mut self, security_id: &str, closes: Vec<f64>) {
        self.closes.insert(security_id.to_string(), closes);
    }
}

/// Last published value of every indicator
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorState {
    /// news mode
    pub news_mode: bool,
    /// structural levels (kept on stale history)
    pub levels: Option<StructuralLevels>,
    /// structural levels
    pub relation: Option<Relation>,
    /// dealer trend regime (written after it reads the previous value)
    pub prev_relation: Option<Relation>,
    /// VIX range
    pub vix_range: Option<VixRange>,
    /// OI levels (each field keeps its last known strike)
    pub oi_levels: OiLevels,
    /// reference price
    pub vwap: Option<ReferencePrice>,
    /// gamma classifier
    pub gamma: GammaState,
    /// predictive gamma
    pub predictive: PredictiveSignal,
    /// predictive gamma; read by the gamma classifier one cycle later
    pub premium_velocity: f64,
    /// god mode
    pub god: GodSignal,
    /// dealer intent radar
    pub dealer_intent: DealerIntent,
    /// auto ATM leg structure
    pub auto_leg: Option<LegStructure>,
    /// EMA scalp panel (ATM CE, ATM PE)
    pub ema_scalp: Vec<EmaPanel>,
    /// EMA compression panel (ATM CE, ATM PE)
    pub ema_compression: Vec<EmaPanel>,
    /// manual leg structure
    pub manual_leg: Option<LegStructure>,
    /// institutional selector
    pub institutional_call: Option<LegStructure>,
    pub institutional_put: Option<LegStructure>,
    /// institutional flow confirmation
    pub flow: FlowLabel,
    /// breakout radar
    pub breakout: Breakout,
    /// dealer trap
    pub dealer_trap: DealerTrap,
    /// inside-CPR pro
    pub inside_cpr: InsideCpr,
    /// liquidity target
    pub liquidity_target: LiquidityTarget,
    /// dealer trend regime
    pub dealer_trend: TrendRegime,
    /// trend continuation
    pub trend: TrendSignal,
    /// dark pool detector
    pub dark_pool: DarkPool,
    /// absorption radar
    pub absorption: Absorption,
    /// liquidity vacuum radar
    pub vacuum: Vacuum,
    /// opening sniper (set once per process)
    pub opening: Option<OpeningSniper>,
    /// sniper cascade
    pub sniper: SniperLabel,
    /// anti-trap filter
    pub filtered: FilteredSniper,
    /// auto execution
    pub execution: AutoExecution,
    /// gamma acceleration
    pub gamma_accel: GammaAccel,
    /// final decision
    pub decision: Decision,
    /// smart scalp
    pub scalp: Option<ScalpPlan>,
}

impl IndicatorState {
    pub fn gate(&self, ltp: f64) -> Gate {
        Gate { ltp, relation: self.relation, vwap: self.vwap.map(|v| v.value) }
    }

    /// Auto leg floating status is Strong or Super Strong
    pub fn structure_strong(&self) -> bool {
        self.auto_leg.as_ref().is_some_and(|leg| leg.pivot.status.is_strong())
    }

    pub fn structure_weakening(&self) -> bool {
        self.auto_leg.as_ref().is_some_and(|leg| leg.pivot.status.is_weakening())
    }
}

/// Cross-cycle engine state, passed by reference through every stage
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub state: IndicatorState,
    pub momentum: Momentum,
    pub ranges: RangeMemory,
    pub candles: CandleCache,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }
}
