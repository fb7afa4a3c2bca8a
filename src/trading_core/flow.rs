//! Options-Flow Indicators
//!
//! Majority votes over open-interest changes in a strike window around the
//! money. Missing strikes and missing legs are skipped, never counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EngineConfig;
use crate::types::{atm_strike, offsets, Direction, OptionChain, Relation};

use super::context::{advance, Fresh, Gate, Sample, Stale};
use super::levels::{OiLevels, StructuralLevels};

/// How an unchanged open interest is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatOi {
    /// `oi >= prev` is a build, `oi < prev` an unwind (god mode)
    Build,
    /// `oi > prev` is a build, `oi <= prev` an unwind (everything else)
    Unwind,
}

/// Build/unwind counts per side over a strike window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OiTally {
    pub call_build: u32,
    pub call_unwind: u32,
    pub put_build: u32,
    pub put_unwind: u32,
}

impl OiTally {
    pub fn scan(chain: &OptionChain, ltp: f64, step: f64, span: f64, flat: FlatOi) -> Self {
        let atm = atm_strike(ltp, step);
        let offs = offsets(span, step);
        let mut tally = OiTally::default();

        for (_, row) in chain.window(atm, &offs) {
            if let Some(ce) = &row.call {
                if builds(ce.open_interest, ce.previous_open_interest, flat) {
                    tally.call_build += 1;
                } else {
                    tally.call_unwind += 1;
                }
            }
            if let Some(pe) = &row.put {
                if builds(pe.open_interest, pe.previous_open_interest, flat) {
                    tally.put_build += 1;
                } else {
                    tally.put_unwind += 1;
                }
            }
        }

        tally
    }
}

fn builds(oi: f64, prev: f64, flat: FlatOi) -> bool {
    match flat {
        FlatOi::Build => oi >= prev,
        FlatOi::Unwind => oi > prev,
    }
}

// ============================================================================
// Gamma classifier
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GammaState {
    #[default]
    Neutral,
    TrueGammaUp,
    TrueGammaDown,
    /// Both sides building without premium velocity
    PremiumTrap,
}

impl GammaState {
    pub fn direction(self) -> Option<Direction> {
        match self {
            GammaState::TrueGammaUp => Some(Direction::Long),
            GammaState::TrueGammaDown => Some(Direction::Short),
            _ => None,
        }
    }

    pub fn is_trap(self) -> bool {
        self == GammaState::PremiumTrap
    }
}

impl fmt::Display for GammaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GammaState::Neutral => write!(f, "NEUTRAL"),
            GammaState::TrueGammaUp => write!(f, "TRUE GAMMA UP"),
            GammaState::TrueGammaDown => write!(f, "TRUE GAMMA DOWN"),
            GammaState::PremiumTrap => write!(f, "PREMIUM TRAP"),
        }
    }
}

/// `premium_velocity` is the value published by predictive gamma on the
/// previous cycle.
pub fn gamma_state(ltp: f64, chain: &OptionChain, config: &EngineConfig, premium_velocity: f64) -> GammaState {
    let t = OiTally::scan(chain, ltp, config.strike_step, config.flow.gamma_span, FlatOi::Unwind);
    let min = config.flow.gamma_build_count;

    if t.call_build >= min && t.put_build >= min {
        if premium_velocity > config.velocity.gamma_true_up {
            GammaState::TrueGammaUp
        } else {
            GammaState::PremiumTrap
        }
    } else if t.call_build > t.put_build {
        GammaState::TrueGammaUp
    } else if t.put_build > t.call_build {
        GammaState::TrueGammaDown
    } else {
        GammaState::Neutral
    }
}

// ============================================================================
// God mode
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GodSignal {
    #[default]
    None,
    Long,
    Short,
}

impl GodSignal {
    pub fn direction(self) -> Option<Direction> {
        match self {
            GodSignal::None => None,
            GodSignal::Long => Some(Direction::Long),
            GodSignal::Short => Some(Direction::Short),
        }
    }
}

impl fmt::Display for GodSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GodSignal::None => write!(f, "NO GOD SIGNAL"),
            GodSignal::Long => write!(f, "GOD MODE LONG"),
            GodSignal::Short => write!(f, "GOD MODE SHORT"),
        }
    }
}

/// Liquidity vacuum: one side unwinding while the other is not building
pub fn god_mode(ltp: f64, chain: &OptionChain, config: &EngineConfig) -> GodSignal {
    let t = OiTally::scan(chain, ltp, config.strike_step, config.flow.core_span, FlatOi::Build);
    let unwinds = config.flow.god_unwind_count;
    let max_opposite = config.flow.god_max_opposite_build;

    if t.call_unwind >= unwinds && t.put_build <= max_opposite {
        GodSignal::Long
    } else if t.put_unwind >= unwinds && t.call_build <= max_opposite {
        GodSignal::Short
    } else {
        GodSignal::None
    }
}

// ============================================================================
// Dealer intent
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealerIntent {
    #[default]
    Neutral,
    PrepareLong,
    PrepareShort,
}

impl fmt::Display for DealerIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealerIntent::Neutral => write!(f, "NEUTRAL"),
            DealerIntent::PrepareLong => write!(f, "DEALER PREPARE LONG"),
            DealerIntent::PrepareShort => write!(f, "DEALER PREPARE SHORT"),
        }
    }
}

pub fn dealer_intent(ltp: f64, chain: &OptionChain, config: &EngineConfig) -> DealerIntent {
    let t = OiTally::scan(chain, ltp, config.strike_step, config.flow.core_span, FlatOi::Unwind);
    let builds = config.flow.intent_build_count;
    let unwinds = config.flow.intent_unwind_count;

    if t.put_build >= builds && t.call_unwind >= unwinds {
        DealerIntent::PrepareLong
    } else if t.call_build >= builds && t.put_unwind >= unwinds {
        DealerIntent::PrepareShort
    } else {
        DealerIntent::Neutral
    }
}

// ============================================================================
// Predictive gamma
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictiveSignal {
    #[default]
    None,
    EarlyUp,
    EarlyDown,
    Ignition,
}

impl PredictiveSignal {
    fn is_pressure(self) -> bool {
        matches!(self, PredictiveSignal::EarlyUp | PredictiveSignal::EarlyDown)
    }
}

impl fmt::Display for PredictiveSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictiveSignal::None => write!(f, "NONE"),
            PredictiveSignal::EarlyUp => write!(f, "EARLY UP PRESSURE"),
            PredictiveSignal::EarlyDown => write!(f, "EARLY DOWN PRESSURE"),
            PredictiveSignal::Ignition => write!(f, "PREDICTIVE GAMMA IGNITION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictiveReading {
    pub signal: PredictiveSignal,
    /// `None` when no leg was found (the published velocity is left alone)
    pub premium_velocity: Option<f64>,
}

/// OI pressure imbalance plus average-premium velocity.
///
/// `memory` holds the previous average premium; a zero average does not
/// count as a prior observation.
pub fn predictive_gamma(
    ltp: f64,
    chain: &OptionChain,
    config: &EngineConfig,
    now: DateTime<Utc>,
    memory: &mut Option<Sample>,
) -> PredictiveReading {
    let atm = atm_strike(ltp, config.strike_step);
    let offs = offsets(config.flow.core_span, config.strike_step);

    let mut call_pressure = 0.0;
    let mut put_pressure = 0.0;
    let mut premium_sum = 0.0;
    let mut count = 0u32;

    for (_, row) in chain.window(atm, &offs) {
        if let Some(ce) = &row.call {
            call_pressure += ce.oi_change();
            premium_sum += ce.last_price;
            count += 1;
        }
        if let Some(pe) = &row.put {
            put_pressure += pe.oi_change();
            premium_sum += pe.last_price;
            count += 1;
        }
    }

    let ratio = config.flow.pressure_ratio;
    let mut signal = if call_pressure > put_pressure.abs() * ratio {
        PredictiveSignal::EarlyUp
    } else if put_pressure > call_pressure.abs() * ratio {
        PredictiveSignal::EarlyDown
    } else {
        PredictiveSignal::None
    };

    if count == 0 {
        return PredictiveReading { signal, premium_velocity: None };
    }

    let avg = premium_sum / count as f64;
    if memory.is_some_and(|prev| prev.value == 0.0) {
        *memory = None;
    }
    let velocity = advance(memory, avg, now);

    if velocity > config.velocity.ignition && signal.is_pressure() {
        signal = PredictiveSignal::Ignition;
    }

    PredictiveReading { signal, premium_velocity: Some(velocity) }
}

// ============================================================================
// Dealer trap
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealerTrap {
    #[default]
    NoTrap,
    BullTrap,
    BearTrap,
}

impl fmt::Display for DealerTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealerTrap::NoTrap => write!(f, "NO TRAP"),
            DealerTrap::BullTrap => write!(f, "DEALER BULL TRAP PRO"),
            DealerTrap::BearTrap => write!(f, "DEALER BEAR TRAP PRO"),
        }
    }
}

/// Price pressing into an OI wall with the crowd building on the same side
pub fn dealer_trap(
    chain: &OptionChain,
    config: &EngineConfig,
    gate: Gate,
    walls: &OiLevels,
    gamma: GammaState,
) -> DealerTrap {
    let (Some(resistance), Some(support)) = (walls.resistance, walls.support) else {
        return DealerTrap::NoTrap;
    };
    let Some(direction) = gate.aligned() else {
        return DealerTrap::NoTrap;
    };

    let ltp = gate.ltp;
    let t = OiTally::scan(chain, ltp, config.strike_step, config.flow.core_span, FlatOi::Unwind);
    let band = config.radar.wall_proximity;

    match direction {
        Direction::Long
            if (ltp - resistance).abs() <= band
                && t.call_build > t.put_build
                && gamma == GammaState::TrueGammaUp =>
        {
            DealerTrap::BullTrap
        }
        Direction::Short
            if (ltp - support).abs() <= band
                && t.put_build > t.call_build
                && gamma == GammaState::TrueGammaDown =>
        {
            DealerTrap::BearTrap
        }
        _ => DealerTrap::NoTrap,
    }
}

// ============================================================================
// Inside CPR
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsideCpr {
    #[default]
    Outside,
    Wait,
    /// Puts defending BC: CE bias
    BcDefence,
    /// Calls capping TC: PE bias
    TcRejection,
    PivotFlipUp,
    PivotFlipDown,
    Compression,
}

impl fmt::Display for InsideCpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsideCpr::Outside => write!(f, "OUTSIDE CPR"),
            InsideCpr::Wait => write!(f, "INSIDE CPR — WAIT"),
            InsideCpr::BcDefence => write!(f, "BC DEFENSE → CE BIAS"),
            InsideCpr::TcRejection => write!(f, "TC REJECTION → PE BIAS"),
            InsideCpr::PivotFlipUp => write!(f, "PIVOT GAMMA FLIP UP"),
            InsideCpr::PivotFlipDown => write!(f, "PIVOT GAMMA FLIP DOWN"),
            InsideCpr::Compression => write!(f, "CPR COMPRESSION — GAMMA BUILD"),
        }
    }
}

/// Dealer behaviour at the CPR edges while price is inside the range
pub fn inside_cpr(
    ltp: f64,
    chain: &OptionChain,
    config: &EngineConfig,
    relation: Option<Relation>,
    levels: Option<&StructuralLevels>,
) -> Fresh<InsideCpr> {
    if relation != Some(Relation::Inside) {
        return Ok(InsideCpr::Outside);
    }
    let Some(levels) = levels else {
        return Err(Stale::new("no CPR levels"));
    };

    let t = OiTally::scan(chain, ltp, config.strike_step, config.flow.core_span, FlatOi::Unwind);
    let band = config.radar.cpr_proximity;
    let min = config.flow.gamma_build_count;

    let signal = if (ltp - levels.bottom_central).abs() <= band && t.put_build > t.call_build {
        InsideCpr::BcDefence
    } else if (ltp - levels.top_central).abs() <= band && t.call_build > t.put_build {
        InsideCpr::TcRejection
    } else if (ltp - levels.pivot).abs() <= band {
        if t.call_unwind > t.put_unwind {
            InsideCpr::PivotFlipUp
        } else if t.put_unwind > t.call_unwind {
            InsideCpr::PivotFlipDown
        } else {
            InsideCpr::Wait
        }
    } else if t.call_build >= min && t.put_build >= min {
        InsideCpr::Compression
    } else {
        InsideCpr::Wait
    };

    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WidthBands;
    use crate::types::{OptionLeg, StrikeRow};
    use chrono::Duration;

    fn leg(oi: f64, prev: f64, price: f64) -> Option<OptionLeg> {
        Some(OptionLeg {
            open_interest: oi,
            previous_open_interest: prev,
            last_price: price,
            ..Default::default()
        })
    }

    /// Chain with one row per (offset, call (oi, prev), put (oi, prev)) around 25000
    fn chain(rows: &[(f64, (f64, f64), (f64, f64))]) -> OptionChain {
        let mut chain = OptionChain::new();
        for (off, ce, pe) in rows {
            chain.insert(
                25000.0 + off,
                StrikeRow { call: leg(ce.0, ce.1, 100.0), put: leg(pe.0, pe.1, 100.0) },
            );
        }
        chain
    }

    const UP: (f64, f64) = (120000.0, 100000.0);
    const DOWN: (f64, f64) = (90000.0, 100000.0);
    const FLAT: (f64, f64) = (100000.0, 100000.0);

    #[test]
    fn test_asymmetric_build_is_true_gamma_up() {
        // 3 calls build, 1 put builds across 5 offsets
        let c = chain(&[
            (-100.0, UP, DOWN),
            (-50.0, UP, DOWN),
            (0.0, UP, DOWN),
            (50.0, DOWN, UP),
            (100.0, DOWN, DOWN),
        ]);
        let config = EngineConfig::default();
        assert_eq!(gamma_state(25010.0, &c, &config, 0.0), GammaState::TrueGammaUp);
    }

    #[test]
    fn test_two_sided_build_is_trap_without_velocity() {
        let c = chain(&[(-100.0, UP, UP), (0.0, UP, UP), (100.0, UP, UP)]);
        let config = EngineConfig::default();
        assert_eq!(gamma_state(25000.0, &c, &config, 0.2), GammaState::PremiumTrap);
        assert_eq!(gamma_state(25000.0, &c, &config, 0.9), GammaState::TrueGammaUp);
    }

    #[test]
    fn test_gamma_neutral_on_empty_chain() {
        let config = EngineConfig::default();
        assert_eq!(gamma_state(25000.0, &OptionChain::new(), &config, 5.0), GammaState::Neutral);
    }

    #[test]
    fn test_god_mode_counts_flat_as_build() {
        let config = EngineConfig::default();
        let c = chain(&[(-100.0, DOWN, DOWN), (-50.0, DOWN, DOWN), (0.0, DOWN, FLAT)]);
        assert_eq!(god_mode(25000.0, &c, &config), GodSignal::Long);

        // two flat puts count as builds and block the vacuum
        let c = chain(&[(-100.0, DOWN, FLAT), (-50.0, DOWN, FLAT), (0.0, DOWN, DOWN)]);
        assert_eq!(god_mode(25000.0, &c, &config), GodSignal::None);

        let c = chain(&[(-100.0, UP, DOWN), (-50.0, DOWN, DOWN), (0.0, DOWN, DOWN)]);
        assert_eq!(god_mode(25000.0, &c, &config), GodSignal::Short);
    }

    #[test]
    fn test_dealer_intent() {
        let config = EngineConfig::default();
        let c = chain(&[(-100.0, FLAT, UP), (-50.0, DOWN, UP), (0.0, UP, UP)]);
        assert_eq!(dealer_intent(25000.0, &c, &config), DealerIntent::PrepareLong);

        let c = chain(&[(-100.0, UP, FLAT), (-50.0, UP, DOWN), (0.0, UP, UP)]);
        assert_eq!(dealer_intent(25000.0, &c, &config), DealerIntent::PrepareShort);
    }

    #[test]
    fn test_predictive_pressure_and_ignition() {
        let config = EngineConfig::default();
        let t0 = Utc::now();
        let mut memory = None;

        let mut c = OptionChain::new();
        c.insert(25000.0, StrikeRow { call: leg(3000.0, 1000.0, 100.0), put: leg(1000.0, 500.0, 100.0) });

        let first = predictive_gamma(25000.0, &c, &config, t0, &mut memory);
        assert_eq!(first.signal, PredictiveSignal::EarlyUp);
        assert_eq!(first.premium_velocity, Some(0.0));

        // average premium 100 -> 120 in 8s = 2.5/s
        let mut c2 = OptionChain::new();
        c2.insert(25000.0, StrikeRow { call: leg(3000.0, 1000.0, 140.0), put: leg(1000.0, 500.0, 100.0) });
        let second = predictive_gamma(25000.0, &c2, &config, t0 + Duration::seconds(8), &mut memory);
        assert_eq!(second.signal, PredictiveSignal::Ignition);
        assert_eq!(second.premium_velocity, Some(2.5));
    }

    #[test]
    fn test_predictive_without_legs_leaves_velocity() {
        let config = EngineConfig::default();
        let mut memory = Some(Sample::new(100.0, Utc::now()));
        let r = predictive_gamma(25000.0, &OptionChain::new(), &config, Utc::now(), &mut memory);
        assert_eq!(r, PredictiveReading { signal: PredictiveSignal::None, premium_velocity: None });
        assert_eq!(memory.unwrap().value, 100.0);
    }

    #[test]
    fn test_dealer_trap_needs_walls() {
        let config = EngineConfig::default();
        let c = chain(&[(0.0, UP, DOWN), (50.0, UP, DOWN)]);
        let gate = Gate { ltp: 25010.0, relation: Some(Relation::Above), vwap: Some(24990.0) };

        let walls = OiLevels { resistance: Some(25030.0), support: Some(24800.0), max_pain: None };
        assert_eq!(dealer_trap(&c, &config, gate, &walls, GammaState::TrueGammaUp), DealerTrap::BullTrap);
        assert_eq!(dealer_trap(&c, &config, gate, &walls, GammaState::PremiumTrap), DealerTrap::NoTrap);

        let missing = OiLevels { support: None, ..walls };
        assert_eq!(dealer_trap(&c, &config, gate, &missing, GammaState::TrueGammaUp), DealerTrap::NoTrap);
    }

    #[test]
    fn test_inside_cpr_edges() {
        let config = EngineConfig::default();
        // tc 25050, pivot 25000, bc 24950
        let levels = StructuralLevels::from_hlc(25150.0, 24950.0, 24900.0, &WidthBands::default());

        let c = chain(&[(-50.0, FLAT, UP), (0.0, FLAT, UP)]);
        let r = inside_cpr(24960.0, &c, &config, Some(Relation::Inside), Some(&levels));
        assert_eq!(r.unwrap(), InsideCpr::BcDefence);

        let c = chain(&[(0.0, DOWN, UP), (50.0, DOWN, FLAT)]);
        let r = inside_cpr(25005.0, &c, &config, Some(Relation::Inside), Some(&levels));
        assert_eq!(r.unwrap(), InsideCpr::PivotFlipUp);

        let r = inside_cpr(25200.0, &c, &config, Some(Relation::Above), Some(&levels));
        assert_eq!(r.unwrap(), InsideCpr::Outside);

        assert!(inside_cpr(25000.0, &c, &config, Some(Relation::Inside), None).is_err());
    }
}
