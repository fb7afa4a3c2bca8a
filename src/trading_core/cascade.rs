//! Decision Cascade
//!
//! Stage order within a cycle:
//! 1. Opening sniper (once per process)
//! 2. Sniper: god > news > predictive ignition > early > full > wait
//! 3. Anti-trap filter: premium trap > magnet zone > no flow > weak structure
//! 4. Auto execution: full confirmation, then trend / dealer trend / dark pool
//! 5. Gamma acceleration
//! 6. Final decision (the BUY-class label the trader acts on)
//! 7. Smart scalp plan
//!
//! Every stage reads what earlier stages published in `IndicatorState`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EngineConfig;
use crate::types::{atm_strike, Direction, OptionChain, OptionLeg, OptionSide, Relation};

use super::context::{Fresh, Gate, IndicatorState, Momentum, Stale};
use super::flow::PredictiveSignal;
use super::radar::{DarkPool, FlowLabel};
use super::regime::TrendSignal;
use super::trader::TradeLevels;

fn long_short(d: Direction) -> &'static str {
    match d {
        Direction::Long => "LONG",
        Direction::Short => "SHORT",
    }
}

// ============================================================================
// Opening sniper
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpeningSniper {
    Wait,
    Long,
    Short,
}

impl fmt::Display for OpeningSniper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpeningSniper::Wait => write!(f, "WAIT"),
            OpeningSniper::Long => write!(f, "OPENING LONG SNIPER"),
            OpeningSniper::Short => write!(f, "OPENING SHORT SNIPER"),
        }
    }
}

/// Fires on the first cycle with a reference price, then never again
pub fn opening_sniper(gate: Gate, done: &mut bool) -> Option<OpeningSniper> {
    if *done || gate.vwap.is_none() {
        return None;
    }
    *done = true;

    Some(match gate.aligned() {
        Some(Direction::Long) => OpeningSniper::Long,
        Some(Direction::Short) => OpeningSniper::Short,
        None => OpeningSniper::Wait,
    })
}

// ============================================================================
// Sniper
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SniperLabel {
    #[default]
    Wait,
    God(Direction),
    News(Direction),
    Predictive(Direction),
    Early(Direction),
    /// Early conditions plus gamma confirming the direction
    Full(Direction),
}

impl fmt::Display for SniperLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SniperLabel::Wait => write!(f, "WAIT"),
            SniperLabel::God(d) => write!(f, "GOD EARLY {}", long_short(*d)),
            SniperLabel::News(d) => write!(f, "NEWS SNIPER {}", long_short(*d)),
            SniperLabel::Predictive(d) => write!(f, "V2 PREDICTIVE {}", long_short(*d)),
            SniperLabel::Early(d) => write!(f, "EARLY SNIPER {}", long_short(*d)),
            SniperLabel::Full(d) => write!(f, "TRUE SNIPER {} READY", long_short(*d)),
        }
    }
}

/// Strict priority chain; the first matching rule wins
pub fn sniper(state: &IndicatorState, ltp: f64) -> SniperLabel {
    let gate = state.gate(ltp);
    if gate.vwap.is_none() {
        return SniperLabel::Wait;
    }
    let aligned = gate.aligned();

    if let Some(d) = state.god.direction() {
        return SniperLabel::God(d);
    }

    if state.news_mode {
        if let Some(d) = aligned {
            return SniperLabel::News(d);
        }
    }

    if state.predictive == PredictiveSignal::Ignition {
        return aligned.map_or(SniperLabel::Wait, SniperLabel::Predictive);
    }

    let Some(d) = aligned else {
        return SniperLabel::Wait;
    };
    if !state.structure_strong() || !state.flow.is_present() {
        return SniperLabel::Wait;
    }

    let confirmed = state.gamma.direction() == Some(d);
    if !state.gamma.is_trap() && !confirmed {
        SniperLabel::Early(d)
    } else if confirmed {
        SniperLabel::Full(d)
    } else {
        SniperLabel::Wait
    }
}

// ============================================================================
// Anti-trap filter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    PremiumTrap,
    MagnetZone,
    NoFlow,
    WeakStructure,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::PremiumTrap => write!(f, "PREMIUM TRAP"),
            BlockReason::MagnetZone => write!(f, "MAGNET ZONE"),
            BlockReason::NoFlow => write!(f, "NO FLOW"),
            BlockReason::WeakStructure => write!(f, "WEAK STRUCTURE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilteredSniper {
    Pass(SniperLabel),
    Blocked(BlockReason),
}

impl Default for FilteredSniper {
    fn default() -> Self {
        FilteredSniper::Pass(SniperLabel::Wait)
    }
}

impl FilteredSniper {
    pub fn is_blocked(&self) -> bool {
        matches!(self, FilteredSniper::Blocked(_))
    }
}

impl fmt::Display for FilteredSniper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilteredSniper::Pass(label) => write!(f, "{}", label),
            FilteredSniper::Blocked(reason) => write!(f, "SNIPER BLOCKED — {}", reason),
        }
    }
}

/// Applies to every sniper label, WAIT included
pub fn anti_trap(state: &IndicatorState) -> FilteredSniper {
    let blocked = if state.gamma.is_trap() {
        Some(BlockReason::PremiumTrap)
    } else if state.liquidity_target.is_max_pain() {
        Some(BlockReason::MagnetZone)
    } else if state.flow == FlowLabel::NoFlow {
        Some(BlockReason::NoFlow)
    } else if state.structure_weakening() {
        Some(BlockReason::WeakStructure)
    } else {
        None
    };

    blocked.map_or(FilteredSniper::Pass(state.sniper), FilteredSniper::Blocked)
}

// ============================================================================
// Auto execution
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoExecution {
    #[default]
    Wait,
    AutoCe,
    AutoPe,
    TrendCe,
    TrendPe,
    DealerTrendCe,
    DealerTrendPe,
    DarkPe,
}

impl fmt::Display for AutoExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoExecution::Wait => write!(f, "WAIT"),
            AutoExecution::AutoCe => write!(f, "AUTO EXECUTE CE"),
            AutoExecution::AutoPe => write!(f, "AUTO EXECUTE PE"),
            AutoExecution::TrendCe => write!(f, "TREND AUTO CE"),
            AutoExecution::TrendPe => write!(f, "TREND AUTO PE"),
            AutoExecution::DealerTrendCe => write!(f, "DEALER TREND CE"),
            AutoExecution::DealerTrendPe => write!(f, "DEALER TREND PE"),
            AutoExecution::DarkPe => write!(f, "EARLY DARK PE ENTRY"),
        }
    }
}

pub fn auto_execution(state: &IndicatorState, ltp: f64) -> AutoExecution {
    let gate = state.gate(ltp);
    if gate.vwap.is_none() || state.filtered.is_blocked() {
        return AutoExecution::Wait;
    }
    let Some(d) = gate.aligned() else {
        return AutoExecution::Wait;
    };

    if state.sniper == SniperLabel::Full(d) && state.gamma.direction() == Some(d) && state.flow.is_present() {
        return match d {
            Direction::Long => AutoExecution::AutoCe,
            Direction::Short => AutoExecution::AutoPe,
        };
    }

    match (d, state.trend) {
        (Direction::Short, TrendSignal::ContinuationShort) => return AutoExecution::TrendPe,
        (Direction::Long, TrendSignal::ContinuationLong) => return AutoExecution::TrendCe,
        _ => {}
    }

    if state.dealer_trend.flip() == Some(d) {
        return match d {
            Direction::Long => AutoExecution::DealerTrendCe,
            Direction::Short => AutoExecution::DealerTrendPe,
        };
    }

    if d == Direction::Short && state.dark_pool == DarkPool::ShortBuild {
        return AutoExecution::DarkPe;
    }

    AutoExecution::Wait
}

// ============================================================================
// Gamma acceleration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GammaAccel {
    #[default]
    None,
    Up,
    Down,
}

impl fmt::Display for GammaAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GammaAccel::None => write!(f, "NO ACCELERATION"),
            GammaAccel::Up => write!(f, "GAMMA ACCELERATION UP"),
            GammaAccel::Down => write!(f, "GAMMA ACCELERATION DOWN"),
        }
    }
}

pub fn gamma_acceleration(state: &IndicatorState) -> GammaAccel {
    if !state.structure_strong() || !state.flow.is_present() || state.gamma.is_trap() {
        return GammaAccel::None;
    }
    match state.sniper {
        SniperLabel::Full(Direction::Long) => GammaAccel::Up,
        SniperLabel::Full(Direction::Short) => GammaAccel::Down,
        _ => GammaAccel::None,
    }
}

// ============================================================================
// Final decision
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[default]
    WaitConflict,
    CeBuy,
    PeBuy,
}

impl Decision {
    /// BUY-class labels open a trade
    pub fn buy_side(self) -> Option<OptionSide> {
        match self {
            Decision::CeBuy => Some(OptionSide::Ce),
            Decision::PeBuy => Some(OptionSide::Pe),
            Decision::WaitConflict => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::WaitConflict => write!(f, "WAIT / CONFLICT"),
            Decision::CeBuy => write!(f, "CE BUY"),
            Decision::PeBuy => write!(f, "PE BUY"),
        }
    }
}

/// Auto leg and institutional leg must point the same way
pub fn decision(state: &IndicatorState) -> Decision {
    if state.gamma.is_trap() {
        return Decision::WaitConflict;
    }
    match state.auto_leg.as_ref().map(|leg| leg.side) {
        Some(OptionSide::Ce) if state.institutional_call.is_some() => Decision::CeBuy,
        Some(OptionSide::Pe) if state.institutional_put.is_some() => Decision::PeBuy,
        _ => Decision::WaitConflict,
    }
}

// ============================================================================
// Smart scalp
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalpSignal {
    CeSmart,
    PeSmart,
    /// Bounce off BC inside the CPR
    CeDefence,
    /// Rejection at TC inside the CPR
    PeDefence,
}

impl fmt::Display for ScalpSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalpSignal::CeSmart => write!(f, "CE SMART SCALP"),
            ScalpSignal::PeSmart => write!(f, "PE SMART SCALP"),
            ScalpSignal::CeDefence => write!(f, "CE DEFENSE SCALP"),
            ScalpSignal::PeDefence => write!(f, "PE DEFENSE SCALP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalpPlan {
    pub signal: ScalpSignal,
    pub strike: f64,
    pub side: OptionSide,
    pub price: f64,
    pub levels: TradeLevels,
}

/// Short-horizon scalp on the ATM legs.
///
/// Needs a reference price and CPR levels, otherwise the plan is cleared.
/// The first observation only records the index price. The plan levels are
/// the trade multipliers applied to the chosen leg's premium.
pub fn smart_scalp(
    state: &IndicatorState,
    ltp: f64,
    chain: &OptionChain,
    config: &EngineConfig,
    memory: &mut Momentum,
) -> Fresh<Option<ScalpPlan>> {
    let gate = state.gate(ltp);
    let (Some(_), Some(levels)) = (gate.vwap, state.levels.as_ref()) else {
        return Ok(None);
    };

    let Some(prev_ltp) = memory.scalp_ltp.replace(ltp) else {
        return Err(Stale::new("scalp memory warming up"));
    };

    let atm = atm_strike(ltp, config.strike_step);
    let row = chain.row(atm);
    let ce = row.and_then(|r| r.call.as_ref());
    let pe = row.and_then(|r| r.put.as_ref());
    let th = &config.scalp;

    let mut signal = None;

    if row.is_some() {
        let accel_up = matches!((ce, memory.scalp_call_premium), (Some(c), Some(p)) if p != 0.0 && c.last_price > p * th.premium_acceleration);
        let accel_down = matches!((pe, memory.scalp_put_premium), (Some(l), Some(p)) if p != 0.0 && l.last_price > p * th.premium_acceleration);

        let vacuum = |leg: Option<&OptionLeg>| {
            leg.is_some_and(|l| {
                l.last_price > l.previous_close_price * th.premium_jump && l.oi_change().abs() < th.oi_flat
            })
        };
        let vacuum_up = vacuum(ce);
        let vacuum_down = vacuum(pe);

        match (gate.aligned(), ce, pe) {
            (Some(Direction::Short), Some(ce), Some(pe)) if ltp < prev_ltp => {
                let positioning = pe.is_building() || ce.is_unwinding();
                let expanding = pe.last_price > pe.previous_close_price;
                if positioning && (expanding || accel_down || vacuum_down) {
                    signal = Some(ScalpSignal::PeSmart);
                }
            }
            (Some(Direction::Long), Some(ce), Some(pe)) if ltp > prev_ltp => {
                let positioning = ce.is_building() || pe.is_unwinding();
                let expanding = ce.last_price > ce.previous_close_price;
                if positioning && (expanding || accel_up || vacuum_up) {
                    signal = Some(ScalpSignal::CeSmart);
                }
            }
            _ => {}
        }

        if let Some(c) = ce {
            memory.scalp_call_premium = Some(c.last_price);
        }
        if let Some(p) = pe {
            memory.scalp_put_premium = Some(p.last_price);
        }
    }

    if gate.is(Relation::Inside) {
        let band = config.radar.cpr_proximity;
        if (ltp - levels.bottom_central).abs() <= band && ltp > prev_ltp {
            signal = Some(ScalpSignal::CeDefence);
        } else if (ltp - levels.top_central).abs() <= band && ltp < prev_ltp {
            signal = Some(ScalpSignal::PeDefence);
        }
    }

    let Some(signal) = signal else {
        return Ok(None);
    };
    let side = match signal {
        ScalpSignal::CeSmart | ScalpSignal::CeDefence => OptionSide::Ce,
        ScalpSignal::PeSmart | ScalpSignal::PeDefence => OptionSide::Pe,
    };
    let Some(leg) = chain.leg(atm, side) else {
        return Ok(None);
    };

    Ok(Some(ScalpPlan {
        signal,
        strike: atm,
        side,
        price: leg.last_price,
        levels: TradeLevels::from_price(leg.last_price, &config.trade),
    }))
}
