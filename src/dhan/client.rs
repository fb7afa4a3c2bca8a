//! Dhan API Client
//!
//! HTTP client for the Dhan v2 REST API with header-based authentication,
//! plus the NSE index board for the volatility index.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::models::*;
use super::MarketDataSource;
use crate::types::{Candles, DailyHistory, Instrument};

/// Production base URL
pub const BASE_URL: &str = "https://api.dhan.co/v2";

/// NSE index board
pub const NSE_ALL_INDICES_URL: &str = "https://www.nseindia.com/api/allIndices";

const VOLATILITY_INDEX: &str = "INDIA VIX";

/// Dhan API client
pub struct DhanClient {
    client: Client,
    base_url: String,
    client_id: String,
    access_token: String,
}

impl DhanClient {
    /// Create a new client with explicit configuration
    pub fn new(client_id: String, access_token: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url, client_id, access_token })
    }

    /// Authenticated POST; returns the status and raw body
    async fn post_raw<T: serde::Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("client-id", &self.client_id)
            .header("access-token", &self.access_token)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send POST request to {}", endpoint))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }

    async fn post<T: serde::Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let (status, text) = self.post_raw(endpoint, body).await?;
        if !status.is_success() {
            return Err(anyhow!("POST {} failed ({}): {}", endpoint, status, text));
        }

        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse response from {}: {}", endpoint, text))
    }

    fn chain_request(underlying: &Instrument, expiry: Option<&str>) -> Result<ChainRequest> {
        let scrip = underlying
            .security_id
            .parse::<i64>()
            .with_context(|| format!("Underlying security id '{}' is not numeric", underlying.security_id))?;
        Ok(ChainRequest {
            underlying_scrip: scrip,
            underlying_seg: underlying.segment.code().to_string(),
            expiry: expiry.map(str::to_string),
        })
    }
}

#[async_trait]
impl MarketDataSource for DhanClient {
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64> {
        let id = instrument
            .security_id
            .parse::<i64>()
            .with_context(|| format!("Security id '{}' is not numeric", instrument.security_id))?;
        let body = HashMap::from([(instrument.segment.code(), vec![id])]);

        let quote: QuoteResponse = self.post("/marketfeed/quote", &body).await?;
        quote
            .last_price(instrument.segment.code(), &instrument.security_id)
            .ok_or_else(|| anyhow!("Quote for {} missing (status {:?})", instrument.security_id, quote.status))
    }

    async fn fetch_volatility(&self) -> Result<f64> {
        let response = self
            .client
            .get(NSE_ALL_INDICES_URL)
            .header("User-Agent", "Mozilla/5.0")
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to reach NSE index board")?;

        let board: AllIndicesResponse = response.json().await.context("Failed to parse NSE index board")?;
        board
            .value_of(VOLATILITY_INDEX)
            .ok_or_else(|| anyhow!("{} not on the NSE index board", VOLATILITY_INDEX))
    }

    async fn fetch_expiries(&self, underlying: &Instrument) -> Result<Vec<String>> {
        let request = Self::chain_request(underlying, None)?;
        let list: ExpiryListResponse = self.post("/optionchain/expirylist", &request).await?;
        debug!("Received {} expiries", list.data.len());
        Ok(list.data)
    }

    async fn fetch_option_chain(&self, underlying: &Instrument, expiry: &str) -> Result<ChainResponse> {
        let request = Self::chain_request(underlying, Some(expiry))?;

        // error bodies carry the invalid-expiry code, so parse regardless of status
        let (status, text) = self.post_raw("/optionchain", &request).await?;
        let response: OptionChainResponse = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse option chain ({}): {}", status, text))?;

        let chain = response.into_chain();
        if let ChainResponse::Chain(ref c) = chain {
            debug!("Option chain {}: {} strikes", expiry, c.len());
        }
        Ok(chain)
    }

    async fn fetch_historical(&self, instrument: &Instrument, from: NaiveDate, to: NaiveDate) -> Result<DailyHistory> {
        let request = ChartRequest {
            security_id: instrument.security_id.clone(),
            exchange_segment: instrument.segment.code().to_string(),
            instrument: instrument.segment.instrument_kind().to_string(),
            interval: None,
            from_date: from.format("%Y-%m-%d").to_string(),
            to_date: to.format("%Y-%m-%d").to_string(),
        };
        let response: ChartResponse = self.post("/charts/historical", &request).await?;
        Ok(response.into_history())
    }

    async fn fetch_intraday(&self, instrument: &Instrument, from: NaiveDateTime, to: NaiveDateTime) -> Result<Candles> {
        let request = ChartRequest {
            security_id: instrument.security_id.clone(),
            exchange_segment: instrument.segment.code().to_string(),
            instrument: instrument.segment.instrument_kind().to_string(),
            interval: Some("1".to_string()),
            from_date: from.format("%Y-%m-%d %H:%M:%S").to_string(),
            to_date: to.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let response: ChartResponse = self.post("/charts/intraday", &request).await?;
        Ok(response.into_candles())
    }
}
