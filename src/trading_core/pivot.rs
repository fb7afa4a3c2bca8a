//! Strike Selection & Local Structure
//!
//! The floating pivot is the one primitive behind every leg panel: the auto
//! ATM leg, a manually chosen leg, and the institutionally scored legs. Each
//! leg's high/low comes from `RangeMemory`, so its bands stabilise over the
//! session instead of jumping around.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SelectorWeights;
use crate::types::{atm_strike, offsets, Candles, OptionChain, OptionSide};

use super::context::RangeMemory;

/// Where price sits against its floating pivot bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotStatus {
    /// Above T1
    SuperStrong,
    /// Between the weak pivot and T1
    Strong,
    /// Between the pivot and the weak pivot
    Weakening,
    Invalidated,
}

impl PivotStatus {
    pub fn is_strong(self) -> bool {
        matches!(self, PivotStatus::SuperStrong | PivotStatus::Strong)
    }

    pub fn is_weakening(self) -> bool {
        self == PivotStatus::Weakening
    }
}

impl fmt::Display for PivotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotStatus::SuperStrong => write!(f, "SUPER STRONG"),
            PivotStatus::Strong => write!(f, "STRONG"),
            PivotStatus::Weakening => write!(f, "WEAKENING"),
            PivotStatus::Invalidated => write!(f, "INVALIDATED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatingPivot {
    pub pivot: f64,
    pub weak_pivot: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
    pub status: PivotStatus,
}

pub fn floating_pivot(high: f64, low: f64, price: f64) -> FloatingPivot {
    let pivot = (high + low + price) / 3.0;
    let range = high - low;

    let weak_pivot = 2.0 * pivot - high;
    let target1 = 2.0 * pivot - low;
    let target2 = pivot + range;
    let target3 = high + 2.0 * (pivot - low);

    let status = if price > target1 {
        PivotStatus::SuperStrong
    } else if price > weak_pivot {
        PivotStatus::Strong
    } else if price > pivot {
        PivotStatus::Weakening
    } else {
        PivotStatus::Invalidated
    };

    FloatingPivot { pivot, weak_pivot, target1, target2, target3, status }
}

/// Premium speed against OI change on the strikes around the ATM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GammaFilter {
    /// Premium rising on falling OI
    Blast,
    /// Premium rising on rising OI
    DealerTrap,
    Neutral,
    /// ATM strike not in the chain
    Unknown,
}

impl fmt::Display for GammaFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GammaFilter::Blast => write!(f, "GAMMA BLAST"),
            GammaFilter::DealerTrap => write!(f, "DEALER TRAP"),
            GammaFilter::Neutral => write!(f, "NEUTRAL FLOW"),
            GammaFilter::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Two strikes either side of `atm` in chain order (fewer at the edges)
pub fn gamma_filter(chain: &OptionChain, atm: f64, side: OptionSide) -> GammaFilter {
    let strikes = chain.strikes();
    let Some(idx) = strikes.iter().position(|s| (s - atm).abs() < 0.005) else {
        return GammaFilter::Unknown;
    };

    let nearby = &strikes[idx.saturating_sub(2)..(idx + 3).min(strikes.len())];

    let mut oi_change = 0.0;
    let mut premium_speed = 0.0;
    for strike in nearby {
        if let Some(leg) = chain.leg(*strike, side) {
            oi_change += leg.oi_change();
            premium_speed += leg.last_price - leg.previous_close_price;
        }
    }

    if premium_speed > 0.0 && oi_change < 0.0 {
        GammaFilter::Blast
    } else if premium_speed > 0.0 && oi_change > 0.0 {
        GammaFilter::DealerTrap
    } else {
        GammaFilter::Neutral
    }
}

/// Floating structure of one option leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegStructure {
    pub strike: f64,
    pub side: OptionSide,
    pub price: f64,
    pub security_id: Option<String>,
    pub high: f64,
    pub low: f64,
    pub pivot: FloatingPivot,
    pub gamma_filter: Option<GammaFilter>,
}

impl LegStructure {
    /// "25000 CE"
    pub fn label(&self) -> String {
        format!("{} {}", self.strike as i64, self.side)
    }
}

/// Range memory key for the auto and manual panels
pub fn range_key(strike: f64, side: OptionSide) -> String {
    format!("{}_{}", strike as i64, side)
}

/// Institutional legs keep their own ranges
pub fn institutional_range_key(strike: f64, side: OptionSide) -> String {
    format!("{}_{}_INST", strike as i64, side)
}

/// Session high/low from a leg's intraday candles
pub fn session_range(candles: &Candles) -> Option<(f64, f64)> {
    let high = candles.highs.iter().copied().reduce(f64::max)?;
    let low = candles.lows.iter().copied().reduce(f64::min)?;
    Some((high, low))
}

/// Build the panel for a leg. `None` when the leg is not in the chain.
/// `seed` is only consulted when `key` is new to the range memory.
pub fn leg_structure(
    chain: &OptionChain,
    strike: f64,
    side: OptionSide,
    ranges: &mut RangeMemory,
    key: &str,
    seed: Option<(f64, f64)>,
    with_filter: bool,
) -> Option<LegStructure> {
    let leg = chain.leg(strike, side)?;
    let price = leg.last_price;
    let (high, low) = ranges.update(key, seed, price);

    Some(LegStructure {
        strike,
        side,
        price,
        security_id: leg.security_id.clone(),
        high,
        low,
        pivot: floating_pivot(high, low, price),
        gamma_filter: with_filter.then(|| gamma_filter(chain, strike, side)),
    })
}

/// Parse a manual leg such as "25000 CE"
pub fn parse_leg_spec(raw: &str) -> Option<(f64, OptionSide)> {
    let mut parts = raw.split_whitespace();
    let strike = parts.next()?.parse::<i64>().ok()?;
    let side = OptionSide::parse(parts.next()?)?;
    Some((strike as f64, side))
}

/// Best call and put strike by institutional score within `atm ± span`.
/// Ties keep the first strike scanned (ascending).
pub fn institutional_selector(
    ltp: f64,
    chain: &OptionChain,
    step: f64,
    span: f64,
    weights: &SelectorWeights,
) -> (Option<f64>, Option<f64>) {
    let atm = atm_strike(ltp, step);
    let atm_iv = chain.leg(atm, OptionSide::Ce).map_or(0.0, |l| l.implied_volatility);
    let offs = offsets(span, step);

    let mut best_call: Option<(f64, f64)> = None;
    let mut best_put: Option<(f64, f64)> = None;

    for (strike, row) in chain.window(atm, &offs) {
        for (slot, leg) in [(&mut best_call, row.call.as_ref()), (&mut best_put, row.put.as_ref())] {
            let Some(leg) = leg else { continue };
            let score = weights.open_interest * leg.open_interest
                + weights.gamma_proxy * (leg.oi_change() * leg.delta.abs())
                + weights.iv_edge * (leg.implied_volatility - atm_iv);

            if slot.map_or(true, |(best, _)| score > best) {
                *slot = Some((score, strike));
            }
        }
    }

    (best_call.map(|(_, s)| s), best_put.map(|(_, s)| s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionLeg, StrikeRow};

    #[test]
    fn test_floating_pivot_bands() {
        // H=120, L=80, price=110 -> p=103.33, wp=86.67, t1=126.67
        let fp = floating_pivot(120.0, 80.0, 110.0);
        assert!((fp.pivot - 103.333).abs() < 0.01);
        assert!((fp.weak_pivot - 86.667).abs() < 0.01);
        assert!((fp.target1 - 126.667).abs() < 0.01);
        assert!((fp.target2 - 143.333).abs() < 0.01);
        assert!((fp.target3 - 166.667).abs() < 0.01);
        assert_eq!(fp.status, PivotStatus::Strong);
    }

    #[test]
    fn test_degenerate_range_is_invalidated() {
        let fp = floating_pivot(100.0, 100.0, 100.0);
        assert_eq!(fp.pivot, 100.0);
        assert_eq!(fp.status, PivotStatus::Invalidated);
    }

    #[test]
    fn test_status_ordering() {
        assert_eq!(floating_pivot(100.0, 90.0, 120.0).status, PivotStatus::SuperStrong);
        assert_eq!(floating_pivot(130.0, 70.0, 100.0).status, PivotStatus::Strong);
        // price at or below 2L - H
        assert_eq!(floating_pivot(130.0, 70.0, 5.0).status, PivotStatus::Invalidated);
        assert!(PivotStatus::SuperStrong.is_strong());
        assert!(!PivotStatus::Weakening.is_strong());
    }

    #[test]
    fn test_gamma_filter() {
        let mut chain = OptionChain::new();
        for (i, strike) in [24900.0, 24950.0, 25000.0, 25050.0, 25100.0, 25150.0].iter().enumerate() {
            let leg = OptionLeg {
                last_price: 110.0,
                previous_close_price: 100.0,
                open_interest: 1000.0,
                previous_open_interest: if i == 5 { 0.0 } else { 1200.0 },
                ..Default::default()
            };
            chain.insert(*strike, StrikeRow { call: Some(leg), put: None });
        }
        assert_eq!(gamma_filter(&chain, 25000.0, OptionSide::Ce), GammaFilter::Blast);
        // no puts listed
        assert_eq!(gamma_filter(&chain, 25000.0, OptionSide::Pe), GammaFilter::Neutral);
        assert_eq!(gamma_filter(&chain, 26000.0, OptionSide::Ce), GammaFilter::Unknown);
    }

    #[test]
    fn test_leg_structure_uses_range_memory() {
        let mut chain = OptionChain::new();
        let leg = OptionLeg { last_price: 120.0, security_id: Some("45001".into()), ..Default::default() };
        chain.insert(25000.0, StrikeRow { call: Some(leg), put: None });

        let mut ranges = RangeMemory::default();
        let key = range_key(25000.0, OptionSide::Ce);
        let s = leg_structure(&chain, 25000.0, OptionSide::Ce, &mut ranges, &key, Some((150.0, 90.0)), true)
            .unwrap();
        assert_eq!((s.high, s.low), (150.0, 90.0));
        assert_eq!(s.label(), "25000 CE");
        assert_eq!(s.security_id.as_deref(), Some("45001"));
        assert!(s.gamma_filter.is_some());

        assert!(leg_structure(&chain, 25000.0, OptionSide::Pe, &mut ranges, "x", None, false).is_none());
    }

    #[test]
    fn test_parse_leg_spec() {
        assert_eq!(parse_leg_spec("25000 CE"), Some((25000.0, OptionSide::Ce)));
        assert_eq!(parse_leg_spec(" 24800  pe "), Some((24800.0, OptionSide::Pe)));
        assert_eq!(parse_leg_spec("25000"), None);
        assert_eq!(parse_leg_spec("CE 25000"), None);
        assert_eq!(parse_leg_spec(""), None);
    }

    #[test]
    fn test_session_range() {
        let candles = Candles { highs: vec![10.0, 14.0, 12.0], lows: vec![9.0, 7.0, 8.0], ..Default::default() };
        assert_eq!(session_range(&candles), Some((14.0, 7.0)));
        assert_eq!(session_range(&Candles::default()), None);
    }

    #[test]
    fn test_selector_ties_keep_first_strike() {
        let mut chain = OptionChain::new();
        let flat = OptionLeg { open_interest: 1000.0, ..Default::default() };
        for strike in [24900.0, 24950.0, 25000.0, 25050.0, 25100.0] {
            chain.insert(strike, StrikeRow { call: Some(flat.clone()), put: Some(flat.clone()) });
        }
        let weights = SelectorWeights::default();
        assert_eq!(
            institutional_selector(25000.0, &chain, 50.0, 100.0, &weights),
            (Some(24900.0), Some(24900.0))
        );

        let heavy_put = OptionLeg { open_interest: 5000.0, ..Default::default() };
        chain.insert(25050.0, StrikeRow { call: Some(flat.clone()), put: Some(heavy_put) });
        assert_eq!(
            institutional_selector(25000.0, &chain, 50.0, 100.0, &weights),
            (Some(24900.0), Some(25050.0))
        );
    }
}
