//! Regime & Trend Trackers
//!
//! - Dealer trend regime: CPR relation flips, with a continuation fallback
//! - Trend continuation: price against its previous-cycle memory
//! - News mode: large index move since the previous cycle

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Direction, Relation};

use super::context::Gate;
use super::flow::GammaState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendRegime {
    #[default]
    None,
    /// ABOVE → BELOW flip
    DealerTrendShort,
    /// BELOW → ABOVE flip
    DealerTrendLong,
    ContinuationShort,
    ContinuationLong,
}

impl TrendRegime {
    /// Direction of a relation flip; continuation does not count
    pub fn flip(self) -> Option<Direction> {
        match self {
            TrendRegime::DealerTrendLong => Some(Direction::Long),
            TrendRegime::DealerTrendShort => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for TrendRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendRegime::None => write!(f, "NONE"),
            TrendRegime::DealerTrendShort => write!(f, "DEALER TREND SHORT"),
            TrendRegime::DealerTrendLong => write!(f, "DEALER TREND LONG"),
            TrendRegime::ContinuationShort => write!(f, "TREND CONTINUATION DOWN"),
            TrendRegime::ContinuationLong => write!(f, "TREND CONTINUATION UP"),
        }
    }
}

/// Relation flip detector.
///
/// An ABOVE/BELOW flip against the stored relation wins; otherwise the
/// continuation gate runs. `prev_relation` is replaced with the current
/// relation whenever a reference price exists.
pub fn dealer_trend(
    gate: Gate,
    structure_strong: bool,
    gamma: GammaState,
    prev_relation: &mut Option<Relation>,
) -> TrendRegime {
    if gate.vwap.is_none() {
        return TrendRegime::None;
    }

    let regime = match (*prev_relation, gate.relation) {
        (Some(Relation::Above), Some(Relation::Below)) => TrendRegime::DealerTrendShort,
        (Some(Relation::Below), Some(Relation::Above)) => TrendRegime::DealerTrendLong,
        _ if structure_strong && !gamma.is_trap() => match gate.aligned() {
            Some(Direction::Short) => TrendRegime::ContinuationShort,
            Some(Direction::Long) => TrendRegime::ContinuationLong,
            None => TrendRegime::None,
        },
        _ => TrendRegime::None,
    };

    *prev_relation = gate.relation;
    regime
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendSignal {
    #[default]
    NoTrend,
    ContinuationShort,
    ContinuationLong,
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendSignal::NoTrend => write!(f, "NO TREND"),
            TrendSignal::ContinuationShort => write!(f, "TREND CONTINUATION SHORT"),
            TrendSignal::ContinuationLong => write!(f, "TREND CONTINUATION LONG"),
        }
    }
}

/// Cold start: the first observation only records the price
pub fn trend_continuation(
    gate: Gate,
    structure_strong: bool,
    gamma: GammaState,
    memory: &mut Option<f64>,
) -> TrendSignal {
    if gate.vwap.is_none() {
        return TrendSignal::NoTrend;
    }

    let Some(prev) = memory.replace(gate.ltp) else {
        return TrendSignal::NoTrend;
    };

    if !structure_strong || gamma.is_trap() {
        return TrendSignal::NoTrend;
    }

    match gate.aligned() {
        Some(Direction::Short) if gate.ltp < prev => TrendSignal::ContinuationShort,
        Some(Direction::Long) if gate.ltp > prev => TrendSignal::ContinuationLong,
        _ => TrendSignal::NoTrend,
    }
}

/// `|ltp - previous| >= threshold`. The first observation only records.
pub fn news_mode(ltp: f64, threshold: f64, memory: &mut Option<f64>) -> bool {
    match memory.replace(ltp) {
        Some(prev) => (ltp - prev).abs() >= threshold,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(ltp: f64, relation: Relation, vwap: f64) -> Gate {
        Gate { ltp, relation: Some(relation), vwap: Some(vwap) }
    }

    #[test]
    fn test_flip_detection() {
        let mut prev = Some(Relation::Above);
        let r = dealer_trend(gate(24900.0, Relation::Below, 25000.0), false, GammaState::Neutral, &mut prev);
        assert_eq!(r, TrendRegime::DealerTrendShort);
        assert_eq!(prev, Some(Relation::Below));

        let r = dealer_trend(gate(25200.0, Relation::Above, 25000.0), false, GammaState::Neutral, &mut prev);
        assert_eq!(r, TrendRegime::DealerTrendLong);
        assert_eq!(r.flip(), Some(Direction::Long));
    }

    #[test]
    fn test_continuation_with_stored_relation() {
        let mut prev = Some(Relation::Above);
        let r = dealer_trend(gate(25100.0, Relation::Above, 25050.0), true, GammaState::TrueGammaUp, &mut prev);
        assert_eq!(r, TrendRegime::ContinuationLong);
        assert_eq!(prev, Some(Relation::Above));

        // weak structure or a trap leaves no regime
        let r = dealer_trend(gate(25100.0, Relation::Above, 25050.0), false, GammaState::TrueGammaUp, &mut prev);
        assert_eq!(r, TrendRegime::None);
        let r = dealer_trend(gate(25100.0, Relation::Above, 25050.0), true, GammaState::PremiumTrap, &mut prev);
        assert_eq!(r, TrendRegime::None);

        // a flip still wins over continuation
        let r = dealer_trend(gate(24900.0, Relation::Below, 25000.0), true, GammaState::TrueGammaDown, &mut prev);
        assert_eq!(r, TrendRegime::DealerTrendShort);
    }

    #[test]
    fn test_continuation_without_history() {
        let mut prev = None;
        let r = dealer_trend(gate(24900.0, Relation::Below, 25000.0), true, GammaState::Neutral, &mut prev);
        assert_eq!(r, TrendRegime::ContinuationShort);
        assert_eq!(r.flip(), None);

        let mut prev = None;
        let r = dealer_trend(gate(24900.0, Relation::Below, 25000.0), true, GammaState::PremiumTrap, &mut prev);
        assert_eq!(r, TrendRegime::None);
    }

    #[test]
    fn test_missing_vwap_leaves_prev_relation() {
        let mut prev = Some(Relation::Above);
        let g = Gate { ltp: 24900.0, relation: Some(Relation::Below), vwap: None };
        assert_eq!(dealer_trend(g, true, GammaState::Neutral, &mut prev), TrendRegime::None);
        assert_eq!(prev, Some(Relation::Above));
    }

    #[test]
    fn test_trend_continuation_cold_start() {
        let mut memory = None;
        let g = gate(24900.0, Relation::Below, 25000.0);
        assert_eq!(trend_continuation(g, true, GammaState::Neutral, &mut memory), TrendSignal::NoTrend);
        assert_eq!(memory, Some(24900.0));

        let g = gate(24880.0, Relation::Below, 25000.0);
        assert_eq!(trend_continuation(g, true, GammaState::Neutral, &mut memory), TrendSignal::ContinuationShort);

        // memory updates even when gated out
        let g = gate(24870.0, Relation::Below, 25000.0);
        assert_eq!(trend_continuation(g, false, GammaState::Neutral, &mut memory), TrendSignal::NoTrend);
        assert_eq!(memory, Some(24870.0));
    }

    #[test]
    fn test_news_mode() {
        let mut memory = None;
        assert!(!news_mode(25000.0, 80.0, &mut memory));
        assert!(news_mode(25080.0, 80.0, &mut memory));
        assert!(!news_mode(25100.0, 80.0, &mut memory));
        assert!(news_mode(25000.0, 80.0, &mut memory));
    }
}
