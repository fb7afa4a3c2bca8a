//! Dhan API Data Models
//!
//! Request bodies and raw response shapes. The provider answers the same
//! endpoint in more than one layout, so responses are read leniently and
//! normalised into the crate's market data types here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{Candles, DailyHistory, OptionChain, OptionLeg, StrikeKey, StrikeRow};

/// Provider error code for an expiry it does not recognise
pub const INVALID_EXPIRY_CODE: &str = "811";

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    pub security_id: String,
    pub exchange_segment: String,
    pub instrument: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub from_date: String,
    pub to_date: String,
}

#[derive(Debug, Serialize)]
pub struct ChainRequest {
    #[serde(rename = "UnderlyingScrip")]
    pub underlying_scrip: i64,
    #[serde(rename = "UnderlyingSeg")]
    pub underlying_seg: String,
    #[serde(rename = "Expiry", skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

// ============================================================================
// Quotes
// ============================================================================

/// `{"data": {"IDX_I": {"13": {"last_price": ...}}}}`
#[derive(Debug, Deserialize)]
pub struct QuoteResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, HashMap<String, QuoteEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteEntry {
    pub last_price: f64,
}

impl QuoteResponse {
    pub fn last_price(&self, segment: &str, security_id: &str) -> Option<f64> {
        self.data.get(segment)?.get(security_id).map(|q| q.last_price)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExpiryListResponse {
    #[serde(default)]
    pub data: Vec<String>,
}

/// NSE index board; the volatility index is the "INDIA VIX" row
#[derive(Debug, Deserialize)]
pub struct AllIndicesResponse {
    #[serde(default)]
    pub data: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub last: Option<f64>,
}

impl AllIndicesResponse {
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.data.iter().find(|e| e.index == name).and_then(|e| e.last)
    }
}

// ============================================================================
// Option chain
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OptionChainResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "errorCode", alias = "error_code")]
    pub error_code: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Outcome of an option chain request
#[derive(Debug, Clone, PartialEq)]
pub enum ChainResponse {
    Chain(OptionChain),
    /// The stored expiry was rejected and must be re-resolved
    InvalidExpiry,
}

#[derive(Debug, Default, Deserialize)]
struct Greeks {
    #[serde(default)]
    delta: f64,
}

#[derive(Debug, Deserialize)]
struct RawLeg {
    #[serde(default)]
    last_price: f64,
    #[serde(default, alias = "previous_close")]
    previous_close_price: f64,
    #[serde(default)]
    oi: f64,
    #[serde(default)]
    previous_oi: f64,
    #[serde(default, alias = "iv")]
    implied_volatility: f64,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    delta: Option<f64>,
    #[serde(default)]
    greeks: Option<Greeks>,
    #[serde(default)]
    security_id: Option<Value>,
}

impl From<RawLeg> for OptionLeg {
    fn from(raw: RawLeg) -> Self {
        let delta = raw.delta.or(raw.greeks.map(|g| g.delta)).unwrap_or(0.0);
        let security_id = match raw.security_id {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        OptionLeg {
            last_price: raw.last_price,
            previous_close_price: raw.previous_close_price,
            open_interest: raw.oi,
            previous_open_interest: raw.previous_oi,
            implied_volatility: raw.implied_volatility,
            delta,
            volume: raw.volume,
            security_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    ce: Option<RawLeg>,
    #[serde(default)]
    pe: Option<RawLeg>,
}

impl OptionChainResponse {
    pub fn is_invalid_expiry(&self) -> bool {
        let code = match &self.error_code {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        self.status.as_deref() == Some("error") && code == INVALID_EXPIRY_CODE
    }

    /// Strikes from `data.oc`, or from `data` itself when the provider sends
    /// rows directly. Anything else is an empty chain.
    pub fn into_chain(self) -> ChainResponse {
        if self.is_invalid_expiry() {
            return ChainResponse::InvalidExpiry;
        }
        if self.status.as_deref() == Some("error") {
            warn!("Option chain error response: {:?}", self.error_code);
            return ChainResponse::Chain(OptionChain::new());
        }

        let rows = match self.data {
            Some(Value::Object(mut data)) => match data.remove("oc") {
                Some(Value::Object(oc)) => oc,
                Some(_) => serde_json::Map::new(),
                None => {
                    debug!("Option chain without 'oc', reading strikes from data");
                    data
                }
            },
            _ => serde_json::Map::new(),
        };

        let mut chain = OptionChain::new();
        for (key, row) in rows {
            let Some(strike) = StrikeKey::parse(&key) else {
                continue;
            };
            match serde_json::from_value::<RawRow>(row) {
                Ok(raw) => chain.insert_key(
                    strike,
                    StrikeRow { call: raw.ce.map(OptionLeg::from), put: raw.pe.map(OptionLeg::from) },
                ),
                Err(e) => debug!("Skipping strike {}: {}", key, e),
            }
        }
        ChainResponse::Chain(chain)
    }
}

// ============================================================================
// Charts
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OhlcArrays {
    #[serde(default)]
    pub high: Vec<f64>,
    #[serde(default)]
    pub low: Vec<f64>,
    #[serde(default)]
    pub close: Vec<f64>,
    #[serde(default)]
    pub volume: Vec<f64>,
    /// `[time, open, high, low, close, volume]` rows
    #[serde(default)]
    pub candles: Vec<Vec<Value>>,
}

/// Arrays at the top level, under `data`, or both
#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    #[serde(flatten)]
    pub top: OhlcArrays,
    #[serde(default)]
    pub data: Option<OhlcArrays>,
}

fn column(rows: &[Vec<Value>], i: usize) -> Vec<f64> {
    rows.iter().filter_map(|r| r.get(i)?.as_f64()).collect()
}

impl ChartResponse {
    pub fn into_history(self) -> DailyHistory {
        let arrays = if !self.top.high.is_empty() { self.top } else { self.data.unwrap_or_default() };
        DailyHistory { highs: arrays.high, lows: arrays.low, closes: arrays.close }
    }

    /// Closes and volumes come from `data` (candle rows first, then arrays);
    /// highs and lows prefer the top level.
    pub fn into_candles(self) -> Candles {
        let data = self.data.unwrap_or_default();

        let (closes, volumes) = if !data.candles.is_empty() {
            (column(&data.candles, 4), column(&data.candles, 5))
        } else {
            (data.close, data.volume)
        };

        let (highs, lows) = if !self.top.high.is_empty() {
            (self.top.high, self.top.low)
        } else if !data.high.is_empty() {
            (data.high, data.low)
        } else {
            (column(&data.candles, 2), column(&data.candles, 3))
        };

        Candles { highs, lows, closes, volumes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionSide;

    #[test]
    fn test_quote_lookup() {
        let raw = r#"{"status":"success","data":{"IDX_I":{"13":{"last_price":25012.35}}}}"#;
        let quote: QuoteResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(quote.last_price("IDX_I", "13"), Some(25012.35));
        assert_eq!(quote.last_price("IDX_I", "25"), None);
    }

    #[test]
    fn test_chain_oc_shape() {
        let raw = r#"{
            "status": "success",
            "data": {
                "last_price": 25010.0,
                "oc": {
                    "25000.000000": {
                        "ce": {"last_price": 120.5, "oi": 5000, "previous_oi": 4000,
                               "previous_close_price": 100.0, "implied_volatility": 12.5,
                               "volume": 900, "greeks": {"delta": 0.52}, "security_id": 45001},
                        "pe": {"last_price": 95.0, "oi": 3000, "previous_oi": 3500}
                    },
                    "25050.000000": {"ce": {"last_price": 90.0}}
                }
            }
        }"#;
        let resp: OptionChainResponse = serde_json::from_str(raw).unwrap();
        let ChainResponse::Chain(chain) = resp.into_chain() else {
            panic!("expected chain");
        };
        assert_eq!(chain.len(), 2);

        let ce = chain.leg(25000.0, OptionSide::Ce).unwrap();
        assert_eq!(ce.open_interest, 5000.0);
        assert_eq!(ce.delta, 0.52);
        assert_eq!(ce.security_id.as_deref(), Some("45001"));
        assert!(chain.leg(25000.0, OptionSide::Pe).unwrap().is_unwinding());
        assert!(chain.leg(25050.0, OptionSide::Pe).is_none());
    }

    #[test]
    fn test_chain_flat_shape() {
        let raw = r#"{"data": {"24950.000000": {"pe": {"last_price": 60.0, "oi": 10}}, "last_price": 24960.0}}"#;
        let resp: OptionChainResponse = serde_json::from_str(raw).unwrap();
        let ChainResponse::Chain(chain) = resp.into_chain() else {
            panic!("expected chain");
        };
        assert_eq!(chain.strikes(), vec![24950.0]);
    }

    #[test]
    fn test_chain_invalid_expiry() {
        let raw = r#"{"status":"error","errorCode":811,"errorMessage":"Invalid Expiry"}"#;
        let resp: OptionChainResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.into_chain(), ChainResponse::InvalidExpiry);

        let raw = r#"{"status":"error","errorCode":"805"}"#;
        let resp: OptionChainResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.into_chain(), ChainResponse::Chain(OptionChain::new()));
    }

    #[test]
    fn test_history_top_level_or_data() {
        let top: ChartResponse = serde_json::from_str(r#"{"high":[1.0,2.0],"low":[0.5,1.5],"close":[0.8,1.9]}"#).unwrap();
        assert_eq!(top.into_history().highs, vec![1.0, 2.0]);

        let nested: ChartResponse =
            serde_json::from_str(r#"{"data":{"high":[3.0],"low":[2.0],"close":[2.5]}}"#).unwrap();
        assert_eq!(nested.into_history().closes, vec![2.5]);

        let unknown: ChartResponse = serde_json::from_str(r#"{"foo":1}"#).unwrap();
        assert_eq!(unknown.into_history(), DailyHistory::default());
    }

    #[test]
    fn test_intraday_candle_rows() {
        let raw = r#"{"data":{"candles":[[1718000000,10,12,9,11,100],[1718000060,11,13,10,12,300]]}}"#;
        let candles = serde_json::from_str::<ChartResponse>(raw).unwrap().into_candles();
        assert_eq!(candles.closes, vec![11.0, 12.0]);
        assert_eq!(candles.volumes, vec![100.0, 300.0]);
        assert_eq!(candles.highs, vec![12.0, 13.0]);
        assert_eq!(candles.lows, vec![9.0, 10.0]);
    }

    #[test]
    fn test_intraday_arrays_with_top_level_range() {
        let raw = r#"{"high":[130.0,140.0],"low":[90.0,95.0],"data":{"close":[120.0],"volume":[5.0]}}"#;
        let candles = serde_json::from_str::<ChartResponse>(raw).unwrap().into_candles();
        assert_eq!(candles.closes, vec![120.0]);
        assert_eq!(candles.highs, vec![130.0, 140.0]);
        assert_eq!(candles.lows, vec![90.0, 95.0]);
    }
}
