//! EMA sub-panels on the ATM legs
//!
//! Scalp panel: EMA fast/slow cross on the last two 1-minute closes.
//! Compression panel: fast/slow distance shrinking toward zero.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EmaConfig;
use crate::types::OptionSide;

/// Exponential moving average seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out: Vec<f64> = Vec::with_capacity(values.len());

    for &v in values {
        let next = match out.last() {
            Some(prev) => v * k + prev * (1.0 - k),
            None => v,
        };
        out.push(next);
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmaSignal {
    /// Too few closes, or the fetch failed
    NoData,
    CrossUp,
    CrossDown,
    Neutral,
    NoCompression,
    CompressionBuilding,
    TightCompression,
}

impl fmt::Display for EmaSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmaSignal::NoData => write!(f, "NO INTRADAY DATA"),
            EmaSignal::CrossUp => write!(f, "EMA CROSS UP"),
            EmaSignal::CrossDown => write!(f, "EMA CROSS DOWN"),
            EmaSignal::Neutral => write!(f, "EMA NEUTRAL"),
            EmaSignal::NoCompression => write!(f, "NO COMPRESSION"),
            EmaSignal::CompressionBuilding => write!(f, "EMA COMPRESSION BUILDING"),
            EmaSignal::TightCompression => write!(f, "TIGHT COMPRESSION"),
        }
    }
}

/// Last two points of the fast and slow EMAs
fn tails(closes: &[f64], config: &EmaConfig) -> Option<((f64, f64), (f64, f64))> {
    let fast = ema(closes, config.fast_period);
    let slow = ema(closes, config.slow_period);
    let n = closes.len();
    if n < 2 {
        return None;
    }
    Some(((fast[n - 2], fast[n - 1]), (slow[n - 2], slow[n - 1])))
}

pub fn scalp_signal(closes: &[f64], config: &EmaConfig) -> EmaSignal {
    if closes.len() < config.scalp_min_samples.max(2) {
        return EmaSignal::NoData;
    }
    let Some(((fast_prev, fast_now), (slow_prev, slow_now))) = tails(closes, config) else {
        return EmaSignal::NoData;
    };

    if fast_now > slow_now && fast_prev <= slow_prev {
        EmaSignal::CrossUp
    } else if fast_now < slow_now && fast_prev >= slow_prev {
        EmaSignal::CrossDown
    } else {
        EmaSignal::Neutral
    }
}

pub fn compression_signal(closes: &[f64], config: &EmaConfig) -> EmaSignal {
    if closes.len() < config.compression_min_samples.max(2) {
        return EmaSignal::NoData;
    }
    let Some(((fast_prev, fast_now), (slow_prev, slow_now))) = tails(closes, config) else {
        return EmaSignal::NoData;
    };

    let dist_now = (fast_now - slow_now).abs();
    let dist_prev = (fast_prev - slow_prev).abs();

    if dist_now < config.compression_distance && dist_now < dist_prev {
        EmaSignal::CompressionBuilding
    } else if dist_now < config.tight_distance {
        EmaSignal::TightCompression
    } else {
        EmaSignal::NoCompression
    }
}

/// One row of an EMA panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaPanel {
    pub strike: f64,
    pub side: OptionSide,
    pub price: f64,
    pub signal: EmaSignal,
}
