//! Market data model shared by the provider client and the trading core

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Option leg side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    Ce,
    Pe,
}

impl OptionSide {
    pub fn direction(self) -> Direction {
        match self {
            OptionSide::Ce => Direction::Long,
            OptionSide::Pe => Direction::Short,
        }
    }

    /// Parse "CE"/"PE" (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" => Some(OptionSide::Ce),
            "PE" => Some(OptionSide::Pe),
            _ => None,
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSide::Ce => write!(f, "CE"),
            OptionSide::Pe => write!(f, "PE"),
        }
    }
}

/// Directional bias of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Where the index trades relative to the central pivot range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Above,
    Below,
    Inside,
}

impl Relation {
    /// Relation plus reference-price alignment: ABOVE with price over VWAP is
    /// long, BELOW with price under VWAP is short.
    pub fn aligned(self, ltp: f64, vwap: f64) -> Option<Direction> {
        match self {
            Relation::Above if ltp > vwap => Some(Direction::Long),
            Relation::Below if ltp < vwap => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Above => write!(f, "ABOVE CPR"),
            Relation::Below => write!(f, "BELOW CPR"),
            Relation::Inside => write!(f, "INSIDE CPR"),
        }
    }
}

/// Exchange segment of a tradable instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// Index segment (IDX_I)
    Index,
    /// NSE futures & options (NSE_FNO)
    NseFno,
}

impl Segment {
    pub fn code(self) -> &'static str {
        match self {
            Segment::Index => "IDX_I",
            Segment::NseFno => "NSE_FNO",
        }
    }

    pub fn instrument_kind(self) -> &'static str {
        match self {
            Segment::Index => "INDEX",
            Segment::NseFno => "OPTIDX",
        }
    }
}

/// Identifies an instrument at the market data provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub security_id: String,
    pub segment: Segment,
}

impl Instrument {
    pub fn index(security_id: impl Into<String>) -> Self {
        Self { security_id: security_id.into(), segment: Segment::Index }
    }

    pub fn option(security_id: impl Into<String>) -> Self {
        Self { security_id: security_id.into(), segment: Segment::NseFno }
    }
}

/// One side (call or put) of a strike in the chain.
/// Every numeric field defaults to zero when the provider omits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    #[serde(default)]
    pub last_price: f64,
    #[serde(default, alias = "previous_close")]
    pub previous_close_price: f64,
    #[serde(default, alias = "oi")]
    pub open_interest: f64,
    #[serde(default, alias = "previous_oi")]
    pub previous_open_interest: f64,
    #[serde(default, alias = "iv")]
    pub implied_volatility: f64,
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub security_id: Option<String>,
}

impl OptionLeg {
    pub fn oi_change(&self) -> f64 {
        self.open_interest - self.previous_open_interest
    }

    pub fn is_building(&self) -> bool {
        self.open_interest > self.previous_open_interest
    }

    pub fn is_unwinding(&self) -> bool {
        self.open_interest < self.previous_open_interest
    }
}

/// Call and put at a single strike; either may be absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    pub call: Option<OptionLeg>,
    pub put: Option<OptionLeg>,
}

impl StrikeRow {
    pub fn leg(&self, side: OptionSide) -> Option<&OptionLeg> {
        match side {
            OptionSide::Ce => self.call.as_ref(),
            OptionSide::Pe => self.put.as_ref(),
        }
    }

    /// Both legs, only when both are present
    pub fn pair(&self) -> Option<(&OptionLeg, &OptionLeg)> {
        Some((self.call.as_ref()?, self.put.as_ref()?))
    }
}

/// Strike normalised to hundredths so float keys compare exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrikeKey(i64);

impl StrikeKey {
    pub fn from_price(strike: f64) -> Self {
        Self((strike * 100.0).round() as i64)
    }

    /// Parse provider keys such as "25000.000000"
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(Self::from_price)
    }

    pub fn price(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

/// Full option chain snapshot for one expiry; replaced wholesale each cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionChain {
    strikes: BTreeMap<StrikeKey, StrikeRow>,
}

impl OptionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, strike: f64, row: StrikeRow) {
        self.strikes.insert(StrikeKey::from_price(strike), row);
    }

    pub fn insert_key(&mut self, key: StrikeKey, row: StrikeRow) {
        self.strikes.insert(key, row);
    }

    pub fn row(&self, strike: f64) -> Option<&StrikeRow> {
        self.strikes.get(&StrikeKey::from_price(strike))
    }

    pub fn leg(&self, strike: f64, side: OptionSide) -> Option<&OptionLeg> {
        self.row(strike)?.leg(side)
    }

    /// Rows in ascending strike order
    pub fn iter(&self) -> impl Iterator<Item = (f64, &StrikeRow)> {
        self.strikes.iter().map(|(k, v)| (k.price(), v))
    }

    /// Strikes in ascending order
    pub fn strikes(&self) -> Vec<f64> {
        self.strikes.keys().map(|k| k.price()).collect()
    }

    /// Rows at `atm + offset` for each offset; missing strikes are skipped
    pub fn window<'a>(
        &'a self,
        atm: f64,
        offsets: &'a [f64],
    ) -> impl Iterator<Item = (f64, &'a StrikeRow)> + 'a {
        offsets
            .iter()
            .filter_map(move |off| self.row(atm + off).map(|row| (atm + off, row)))
    }

    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }
}

/// Daily high/low/close arrays, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyHistory {
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
}

/// Intraday 1-minute candles, oldest first. Arrays the provider did not send
/// are left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candles {
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

/// Nearest strike on the step grid; an exact midpoint goes to the even multiple
pub fn atm_strike(ltp: f64, step: f64) -> f64 {
    (ltp / step).round_ties_even() * step
}

/// Symmetric offsets `-span..=span` in `step` increments
pub fn offsets(span: f64, step: f64) -> Vec<f64> {
    let n = (span / step).round() as i64;
    (-n..=n).map(|i| i as f64 * step).collect()
}
