//! Volume-weighted reference price with tiered fallback
//!
//! 1. Index 1-minute candles for the session
//! 2. Option-chain premiums around the money, weighted by leg volume
//! 3. Previous reference value, or the current LTP when there is none
//!
//! The first tier with positive volume wins. The reference is never unset.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::types::{atm_strike, offsets, Candles, OptionChain};

/// Which tier produced the reference price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VwapTier {
    Intraday,
    OptionChain,
    Emergency,
}

impl fmt::Display for VwapTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VwapTier::Intraday => write!(f, "LIVE"),
            VwapTier::OptionChain => write!(f, "OPTIONCHAIN FALLBACK"),
            VwapTier::Emergency => write!(f, "EMERGENCY (LTP)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePrice {
    pub value: f64,
    pub tier: VwapTier,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Σ(close·volume) / Σvolume over the candles, if any volume traded
pub fn candle_vwap(candles: &Candles) -> Option<f64> {
    let (num, den) = candles
        .closes
        .iter()
        .zip(&candles.volumes)
        .filter(|(p, v)| p.is_finite() && v.is_finite())
        .fold((0.0, 0.0), |(num, den), (p, v)| (num + p * v, den + v));

    (den > 0.0).then(|| num / den)
}

/// Premium VWAP over `atm - span ..= atm + span`, counting only legs that traded
pub fn chain_vwap(ltp: f64, chain: &OptionChain, step: f64, span: f64) -> Option<f64> {
    let atm = atm_strike(ltp, step);
    let offs = offsets(span, step);

    let mut weighted = 0.0;
    let mut weight = 0.0;
    for (_, row) in chain.window(atm, &offs) {
        for leg in [row.call.as_ref(), row.put.as_ref()].into_iter().flatten() {
            if leg.volume > 0.0 {
                weighted += leg.last_price * leg.volume;
                weight += leg.volume;
            }
        }
    }

    (weight > 0.0).then(|| weighted / weight)
}

/// Evaluate the tiers in order. `candles` carries the intraday fetch result;
/// a failed fetch drops straight to the chain tier.
pub fn reference_price(
    ltp: f64,
    candles: anyhow::Result<Candles>,
    chain: &OptionChain,
    previous: Option<f64>,
    step: f64,
    span: f64,
) -> ReferencePrice {
    match candles {
        Ok(candles) => {
            if let Some(v) = candle_vwap(&candles) {
                return ReferencePrice { value: round2(v), tier: VwapTier::Intraday };
            }
            debug!("VWAP: no intraday volume, trying option chain");
        }
        Err(e) => warn!("VWAP intraday fetch failed: {:#}", e),
    }

    if let Some(v) = chain_vwap(ltp, chain, step, span) {
        return ReferencePrice { value: round2(v), tier: VwapTier::OptionChain };
    }

    ReferencePrice { value: previous.unwrap_or(ltp), tier: VwapTier::Emergency }
}
