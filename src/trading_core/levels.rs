//! Structural Levels
//!
//! Computes the daily reference structure for the index:
//! - CPR: central pivot range (TC / Pivot / BC) from the prior session's H/L/C
//! - PDH/PDL: prior-day high and low, kept with the CPR
//! - OI walls: resistance, support and max pain from the option chain
//! - VIX range: one-day sigma band implied by the volatility index
//! - Liquidity target: where price is likely drawn next

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{RadarThresholds, WidthBands};
use crate::types::{atm_strike, DailyHistory, OptionChain, Relation};

use super::context::{Fresh, Stale};

/// CPR width classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidthBand {
    UltraNarrow,
    Narrow,
    Normal,
    Wide,
}

impl WidthBand {
    pub fn classify(width: f64, bands: &WidthBands) -> Self {
        if width <= bands.ultra_narrow {
            WidthBand::UltraNarrow
        } else if width <= bands.narrow {
            WidthBand::Narrow
        } else if width <= bands.normal {
            WidthBand::Normal
        } else {
            WidthBand::Wide
        }
    }
}

impl fmt::Display for WidthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidthBand::UltraNarrow => write!(f, "ULTRA NARROW"),
            WidthBand::Narrow => write!(f, "NARROW"),
            WidthBand::Normal => write!(f, "NORMAL"),
            WidthBand::Wide => write!(f, "WIDE"),
        }
    }
}

/// Central pivot range for the session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralLevels {
    pub top_central: f64,
    pub pivot: f64,
    pub bottom_central: f64,
    pub width: f64,
    pub band: WidthBand,
    /// Prior-day high (PDH)
    pub prior_high: f64,
    /// Prior-day low (PDL)
    pub prior_low: f64,
}

impl StructuralLevels {
    /// Classic pivot arithmetic. TC and BC are swapped when the close sits
    /// below the midpoint so that `bottom_central <= pivot <= top_central`.
    pub fn from_hlc(high: f64, low: f64, close: f64, bands: &WidthBands) -> Self {
        let pivot = (high + low + close) / 3.0;
        let bc = (high + low) / 2.0;
        let tc = 2.0 * pivot - bc;
        let (top_central, bottom_central) = (tc.max(bc), tc.min(bc));
        let width = (top_central - bottom_central).abs();

        Self {
            top_central,
            pivot,
            bottom_central,
            width,
            band: WidthBand::classify(width, bands),
            prior_high: high,
            prior_low: low,
        }
    }

    pub fn relation(&self, ltp: f64) -> Relation {
        if ltp > self.top_central {
            Relation::Above
        } else if ltp < self.bottom_central {
            Relation::Below
        } else {
            Relation::Inside
        }
    }
}

/// CPR from a trailing daily history window.
///
/// Uses the second-to-last entry (the last one is the running session).
/// Short or ragged history is stale: the previous levels stay published.
pub fn cpr_levels(history: &DailyHistory, bands: &WidthBands) -> Fresh<StructuralLevels> {
    let n = history.highs.len().min(history.lows.len()).min(history.closes.len());
    if n < 2 {
        return Err(Stale::new(format!("CPR insufficient history ({} sessions)", n)));
    }

    let h = history.highs[history.highs.len() - 2];
    let l = history.lows[history.lows.len() - 2];
    let c = history.closes[history.closes.len() - 2];

    if !(h.is_finite() && l.is_finite() && c.is_finite()) {
        return Err(Stale::new("CPR history contains non-numeric values"));
    }

    Ok(StructuralLevels::from_hlc(h, l, c, bands))
}

/// Open-interest walls around the money
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OiLevels {
    /// Strike above price with the largest call OI
    pub resistance: Option<f64>,
    /// Strike below price with the largest put OI
    pub support: Option<f64>,
    /// Strike where call and put OI are closest
    pub max_pain: Option<f64>,
}

impl OiLevels {
    /// Fields missing from `fresh` keep their previous value
    pub fn merge(self, fresh: OiLevels) -> OiLevels {
        OiLevels {
            resistance: fresh.resistance.or(self.resistance),
            support: fresh.support.or(self.support),
            max_pain: fresh.max_pain.or(self.max_pain),
        }
    }
}

pub fn oi_levels(ltp: f64, chain: &OptionChain, step: f64, span: f64) -> OiLevels {
    let atm = atm_strike(ltp, step);

    let mut max_ce_oi = 0.0;
    let mut max_pe_oi = 0.0;
    let mut levels = OiLevels::default();
    let mut min_pain: Option<(f64, f64)> = None;

    for (strike, row) in chain.iter() {
        if (strike - atm).abs() > span {
            continue;
        }

        let ce_oi = row.call.as_ref().map_or(0.0, |l| l.open_interest);
        let pe_oi = row.put.as_ref().map_or(0.0, |l| l.open_interest);

        if strike > ltp && ce_oi > max_ce_oi {
            max_ce_oi = ce_oi;
            levels.resistance = Some(strike);
        }
        if strike < ltp && pe_oi > max_pe_oi {
            max_pe_oi = pe_oi;
            levels.support = Some(strike);
        }

        let pain = (ce_oi - pe_oi).abs();
        if min_pain.map_or(true, |(_, best)| pain < best) {
            min_pain = Some((strike, pain));
        }
    }

    levels.max_pain = min_pain.map(|(strike, _)| strike);
    levels
}

/// One-day sigma band implied by the volatility index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VixRange {
    pub high: f64,
    pub low: f64,
}

pub fn vix_range(ltp: f64, vix: f64) -> VixRange {
    let pct = vix / 365f64.sqrt();
    let pts = pct / 100.0 * ltp;
    VixRange { high: (ltp + pts).round(), low: (ltp - pts).round() }
}

/// Where price is likely drawn next
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum LiquidityTarget {
    #[default]
    NoClearTarget,
    PivotMagnet,
    /// Inside the CPR below the pivot: TC is the upper magnet
    TopCentral,
    /// Inside the CPR above the pivot: BC is the lower magnet
    BottomCentral,
    PdhLiquidity,
    Resistance(f64),
    PdlLiquidity,
    Support(f64),
    MaxPainPin,
}

impl LiquidityTarget {
    pub fn is_max_pain(&self) -> bool {
        matches!(self, LiquidityTarget::MaxPainPin)
    }
}

impl fmt::Display for LiquidityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiquidityTarget::NoClearTarget => write!(f, "NO CLEAR TARGET"),
            LiquidityTarget::PivotMagnet => write!(f, "CPR PIVOT MAGNET"),
            LiquidityTarget::TopCentral => write!(f, "TARGET → TC (upper magnet)"),
            LiquidityTarget::BottomCentral => write!(f, "TARGET → BC (lower magnet)"),
            LiquidityTarget::PdhLiquidity => write!(f, "TARGET → PDH LIQUIDITY"),
            LiquidityTarget::Resistance(s) => write!(f, "TARGET → RESIST {}", *s as i64),
            LiquidityTarget::PdlLiquidity => write!(f, "TARGET → PDL LIQUIDITY"),
            LiquidityTarget::Support(s) => write!(f, "TARGET → SUPPORT {}", *s as i64),
            LiquidityTarget::MaxPainPin => write!(f, "MAX PAIN PIN ZONE"),
        }
    }
}

/// Liquidity target from structure and OI walls.
/// Needs the CPR and all three OI levels; otherwise there is no clear target.
pub fn liquidity_target(
    ltp: f64,
    relation: Relation,
    levels: Option<&StructuralLevels>,
    walls: &OiLevels,
    radar: &RadarThresholds,
) -> LiquidityTarget {
    let (Some(levels), Some(resistance), Some(support), Some(max_pain)) =
        (levels, walls.resistance, walls.support, walls.max_pain)
    else {
        return LiquidityTarget::NoClearTarget;
    };

    let mut target = match relation {
        Relation::Inside => {
            if (ltp - levels.pivot).abs() <= radar.cpr_proximity {
                LiquidityTarget::PivotMagnet
            } else if ltp < levels.pivot {
                LiquidityTarget::TopCentral
            } else {
                LiquidityTarget::BottomCentral
            }
        }
        Relation::Above => {
            if (ltp - levels.prior_high).abs() <= radar.pdh_pdl_proximity {
                LiquidityTarget::PdhLiquidity
            } else {
                LiquidityTarget::Resistance(resistance)
            }
        }
        Relation::Below => {
            if (ltp - levels.prior_low).abs() <= radar.pdh_pdl_proximity {
                LiquidityTarget::PdlLiquidity
            } else {
                LiquidityTarget::Support(support)
            }
        }
    };

    // max pain pins override everything else
    if (ltp - max_pain).abs() <= radar.max_pain_proximity {
        target = LiquidityTarget::MaxPainPin;
    }

    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionLeg, StrikeRow};

    fn bands() -> WidthBands {
        WidthBands::default()
    }

    #[test]
    fn test_flat_day_is_degenerate_ultra_narrow() {
        let levels = StructuralLevels::from_hlc(25200.0, 25000.0, 25100.0, &bands());
        assert_eq!(levels.pivot, 25100.0);
        assert_eq!(levels.bottom_central, 25100.0);
        assert_eq!(levels.top_central, 25100.0);
        assert_eq!(levels.width, 0.0);
        assert_eq!(levels.band, WidthBand::UltraNarrow);
        assert_eq!(levels.band.to_string(), "ULTRA NARROW");
    }

    #[test]
    fn test_ordering_holds_for_any_close() {
        let grid = [(25200.0, 25000.0), (24800.0, 24100.0), (100.0, 99.0), (500.0, 500.0)];
        for (h, l) in grid {
            for step in 0..=10 {
                let c = l + (h - l) * step as f64 / 10.0;
                let lv = StructuralLevels::from_hlc(h, l, c, &bands());
                assert!(lv.bottom_central <= lv.pivot, "bc > pivot for {h}/{l}/{c}");
                assert!(lv.pivot <= lv.top_central, "pivot > tc for {h}/{l}/{c}");
            }
        }
    }

    #[test]
    fn test_close_below_midpoint_swaps() {
        // pivot = 25000, bc = 25050, tc = 24950 before the swap
        let lv = StructuralLevels::from_hlc(25150.0, 24950.0, 24900.0, &bands());
        assert_eq!(lv.top_central, 25050.0);
        assert_eq!(lv.bottom_central, 24950.0);
        assert_eq!(lv.width, 100.0);
        assert_eq!(lv.band, WidthBand::Normal);
    }

    #[test]
    fn test_width_bands() {
        let b = bands();
        assert_eq!(WidthBand::classify(40.0, &b), WidthBand::UltraNarrow);
        assert_eq!(WidthBand::classify(70.0, &b), WidthBand::Narrow);
        assert_eq!(WidthBand::classify(120.0, &b), WidthBand::Normal);
        assert_eq!(WidthBand::classify(120.5, &b), WidthBand::Wide);
    }

    #[test]
    fn test_relation() {
        let lv = StructuralLevels::from_hlc(25150.0, 24950.0, 24900.0, &bands());
        assert_eq!(lv.relation(25060.0), Relation::Above);
        assert_eq!(lv.relation(24940.0), Relation::Below);
        assert_eq!(lv.relation(25050.0), Relation::Inside);
        assert_eq!(lv.relation(24950.0), Relation::Inside);
    }

    #[test]
    fn test_history_uses_second_to_last_session() {
        let history = DailyHistory {
            highs: vec![1.0, 25200.0, 9.0],
            lows: vec![1.0, 25000.0, 9.0],
            closes: vec![1.0, 25100.0, 9.0],
        };
        let lv = cpr_levels(&history, &bands()).unwrap();
        assert_eq!(lv.pivot, 25100.0);
        assert_eq!(lv.prior_high, 25200.0);
        assert_eq!(lv.prior_low, 25000.0);
    }

    #[test]
    fn test_short_history_is_stale() {
        let history = DailyHistory { highs: vec![1.0], lows: vec![1.0], closes: vec![1.0] };
        assert!(cpr_levels(&history, &bands()).is_err());
        assert!(cpr_levels(&DailyHistory::default(), &bands()).is_err());
    }

    fn leg_oi(oi: f64) -> Option<OptionLeg> {
        Some(OptionLeg { open_interest: oi, ..Default::default() })
    }

    #[test]
    fn test_oi_walls_and_max_pain() {
        let mut chain = OptionChain::new();
        chain.insert(24900.0, StrikeRow { call: leg_oi(10.0), put: leg_oi(900.0) });
        chain.insert(24950.0, StrikeRow { call: leg_oi(50.0), put: leg_oi(400.0) });
        chain.insert(25000.0, StrikeRow { call: leg_oi(300.0), put: leg_oi(310.0) });
        chain.insert(25050.0, StrikeRow { call: leg_oi(700.0), put: leg_oi(20.0) });
        chain.insert(25100.0, StrikeRow { call: leg_oi(500.0), put: None });
        // far strike ignored
        chain.insert(26000.0, StrikeRow { call: leg_oi(99999.0), put: None });

        let walls = oi_levels(25010.0, &chain, 50.0, 500.0);
        assert_eq!(walls.resistance, Some(25050.0));
        assert_eq!(walls.support, Some(24900.0));
        assert_eq!(walls.max_pain, Some(25000.0));
    }

    #[test]
    fn test_oi_merge_keeps_last_known() {
        let prev = OiLevels { resistance: Some(25100.0), support: Some(24900.0), max_pain: Some(25000.0) };
        let fresh = OiLevels { resistance: None, support: Some(24850.0), max_pain: None };
        let merged = prev.merge(fresh);
        assert_eq!(merged.resistance, Some(25100.0));
        assert_eq!(merged.support, Some(24850.0));
        assert_eq!(merged.max_pain, Some(25000.0));
    }

    #[test]
    fn test_vix_range() {
        let r = vix_range(25000.0, 14.0);
        // 14 / sqrt(365) = 0.7328% -> 183.2 pts
        assert_eq!(r.high, 25183.0);
        assert_eq!(r.low, 24817.0);
    }

    #[test]
    fn test_liquidity_target_max_pain_overrides() {
        let lv = StructuralLevels::from_hlc(25150.0, 24950.0, 24900.0, &bands());
        let walls = OiLevels { resistance: Some(25300.0), support: Some(24800.0), max_pain: Some(25080.0) };
        let radar = RadarThresholds::default();

        let t = liquidity_target(25100.0, Relation::Above, Some(&lv), &walls, &radar);
        assert_eq!(t, LiquidityTarget::MaxPainPin);

        let t = liquidity_target(25200.0, Relation::Above, Some(&lv), &walls, &radar);
        assert_eq!(t, LiquidityTarget::PdhLiquidity);

        let t = liquidity_target(25260.0, Relation::Above, Some(&lv), &walls, &radar);
        assert_eq!(t, LiquidityTarget::Resistance(25300.0));
        assert_eq!(t.to_string(), "TARGET → RESIST 25300");

        let t = liquidity_target(25000.0, Relation::Inside, Some(&lv), &walls, &radar);
        assert_eq!(t, LiquidityTarget::PivotMagnet);

        let t = liquidity_target(25000.0, Relation::Inside, None, &walls, &radar);
        assert_eq!(t, LiquidityTarget::NoClearTarget);
    }
}
