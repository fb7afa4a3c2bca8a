//! Radars
//!
//! Velocity radars on the index (institutional flow, breakout) and
//! single-strike radars on the ATM legs (absorption, liquidity vacuum, dark
//! pool). All of them need a reference price; without one they publish their
//! neutral label and leave their memory untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EngineConfig;
use crate::types::{atm_strike, Direction, OptionChain, OptionLeg, Relation};

use super::context::{advance, Gate, Sample};
use super::flow::GammaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStrength {
    Ultra,
    Probable,
}

/// Institutional flow confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowLabel {
    #[default]
    NoFlow,
    Flow {
        direction: Direction,
        strength: FlowStrength,
        /// Gamma was directional while flow was present
        gamma_accel: bool,
    },
}

impl FlowLabel {
    pub fn is_present(&self) -> bool {
        matches!(self, FlowLabel::Flow { .. })
    }
}

impl fmt::Display for FlowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowLabel::NoFlow => write!(f, "NO FLOW"),
            FlowLabel::Flow { direction, strength, gamma_accel } => {
                match (strength, direction) {
                    (FlowStrength::Ultra, Direction::Long) => write!(f, "ULTRA FLOW UP")?,
                    (FlowStrength::Ultra, Direction::Short) => write!(f, "ULTRA FLOW DOWN")?,
                    (FlowStrength::Probable, _) => write!(f, "PROBABLE FLOW")?,
                }
                if *gamma_accel {
                    write!(f, " + GAMMA ACCEL")?;
                }
                Ok(())
            }
        }
    }
}

/// Index velocity in the aligned direction
pub fn institutional_flow(
    gate: Gate,
    gamma: GammaState,
    config: &EngineConfig,
    now: DateTime<Utc>,
    memory: &mut Option<Sample>,
) -> FlowLabel {
    if gate.vwap.is_none() {
        return FlowLabel::NoFlow;
    }

    let velocity = advance(memory, gate.ltp, now);
    let Some(direction) = gate.aligned() else {
        return FlowLabel::NoFlow;
    };

    let strength = if velocity > config.velocity.ultra_flow {
        FlowStrength::Ultra
    } else if velocity > config.velocity.probable_flow {
        FlowStrength::Probable
    } else {
        return FlowLabel::NoFlow;
    };

    FlowLabel::Flow { direction, strength, gamma_accel: gamma.direction().is_some() }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Breakout {
    #[default]
    None,
    Up,
    Down,
}

impl fmt::Display for Breakout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakout::None => write!(f, "NO BREAKOUT"),
            Breakout::Up => write!(f, "INSTITUTIONAL BREAKOUT UP"),
            Breakout::Down => write!(f, "INSTITUTIONAL BREAKOUT DOWN"),
        }
    }
}

pub fn breakout(gate: Gate, config: &EngineConfig, now: DateTime<Utc>, memory: &mut Option<Sample>) -> Breakout {
    if gate.vwap.is_none() {
        return Breakout::None;
    }

    let velocity = advance(memory, gate.ltp, now);
    if velocity <= config.velocity.breakout {
        return Breakout::None;
    }

    match gate.aligned() {
        Some(Direction::Long) => Breakout::Up,
        Some(Direction::Short) => Breakout::Down,
        None => Breakout::None,
    }
}

/// Both legs of the ATM strike, when the reference price and both legs exist
fn atm_pair<'a>(gate: &Gate, chain: &'a OptionChain, step: f64) -> Option<(&'a OptionLeg, &'a OptionLeg)> {
    gate.vwap?;
    chain.row(atm_strike(gate.ltp, step))?.pair()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Absorption {
    #[default]
    None,
    /// Puts written below the CPR without the premium expanding
    Downside,
    Upside,
}

impl fmt::Display for Absorption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Absorption::None => write!(f, "NO ABSORPTION"),
            Absorption::Downside => write!(f, "DOWNSIDE ABSORPTION"),
            Absorption::Upside => write!(f, "UPSIDE ABSORPTION"),
        }
    }
}

pub fn absorption(gate: Gate, chain: &OptionChain, config: &EngineConfig) -> Absorption {
    let Some((ce, pe)) = atm_pair(&gate, chain, config.strike_step) else {
        return Absorption::None;
    };

    if gate.is(Relation::Below) && pe.is_building() && pe.last_price <= pe.previous_close_price {
        Absorption::Downside
    } else if gate.is(Relation::Above) && ce.is_building() && ce.last_price <= ce.previous_close_price {
        Absorption::Upside
    } else {
        Absorption::None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vacuum {
    #[default]
    None,
    Up,
    Down,
}

impl fmt::Display for Vacuum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vacuum::None => write!(f, "NO VACUUM"),
            Vacuum::Up => write!(f, "LIQUIDITY VACUUM UP"),
            Vacuum::Down => write!(f, "LIQUIDITY VACUUM DOWN"),
        }
    }
}

/// Premium jumps while OI stays flat and the index accelerates.
/// The memory only advances once both ATM legs are present.
pub fn liquidity_vacuum(
    gate: Gate,
    chain: &OptionChain,
    config: &EngineConfig,
    memory: &mut Option<f64>,
) -> Vacuum {
    let Some((ce, pe)) = atm_pair(&gate, chain, config.strike_step) else {
        return Vacuum::None;
    };

    let accel = memory.map_or(0.0, |prev| (gate.ltp - prev).abs());
    *memory = Some(gate.ltp);

    let radar = &config.radar;
    let jumped = |leg: &OptionLeg| {
        leg.last_price > leg.previous_close_price * radar.vacuum_premium_jump
            && leg.oi_change().abs() < radar.vacuum_oi_flat
    };
    let accelerating = accel > radar.vacuum_acceleration;

    let mut signal = Vacuum::None;
    if accelerating && gate.aligned() == Some(Direction::Short) && jumped(pe) {
        signal = Vacuum::Down;
    }
    // evaluated last; wins if both hold
    if accelerating && gate.aligned() == Some(Direction::Long) && jumped(ce) {
        signal = Vacuum::Up;
    }
    signal
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DarkPool {
    #[default]
    None,
    ShortBuild,
}

impl fmt::Display for DarkPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DarkPool::None => write!(f, "NO DARK SIGNAL"),
            DarkPool::ShortBuild => write!(f, "DARK POOL SHORT BUILD"),
        }
    }
}

/// Put premium rising on quiet put OI while calls are not unwinding.
/// The first observation only records the put premium.
pub fn dark_pool(
    gate: Gate,
    chain: &OptionChain,
    config: &EngineConfig,
    gamma: GammaState,
    memory: &mut Option<f64>,
) -> DarkPool {
    let Some((ce, pe)) = atm_pair(&gate, chain, config.strike_step) else {
        return DarkPool::None;
    };

    let Some(prev_premium) = memory.replace(pe.last_price) else {
        return DarkPool::None;
    };

    let premium_rising = pe.last_price > prev_premium;
    let calls_holding = ce.open_interest >= ce.previous_open_interest;
    let puts_quiet = pe.oi_change().abs() < config.radar.dark_pool_oi_cap;

    if gate.aligned() == Some(Direction::Short)
        && premium_rising
        && calls_holding
        && puts_quiet
        && !gamma.is_trap()
    {
        DarkPool::ShortBuild
    } else {
        DarkPool::None
    }
}
