//! Dhan Market Data Integration
//!
//! # Components
//!
//! - [`client`] - HTTP client for the Dhan v2 REST API
//! - [`models`] - Request bodies and raw response shapes
//!
//! # Environment Variables
//!
//! - `DHAN_CLIENT_ID` - Dhan client id
//! - `DHAN_ACCESS_TOKEN` - API access token
//!
//! # API Endpoints Used
//!
//! - `POST /marketfeed/quote` - Index last price
//! - `POST /optionchain/expirylist` - Expiries for the underlying
//! - `POST /optionchain` - Full chain for one expiry
//! - `POST /charts/historical` - Daily high/low/close
//! - `POST /charts/intraday` - 1-minute candles
//! - `GET nseindia.com/api/allIndices` - India VIX

pub mod client;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{Candles, DailyHistory, Instrument};

pub use client::DhanClient;
pub use models::ChainResponse;

/// Everything the engine fetches in a cycle
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last traded price
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64>;

    async fn fetch_volatility(&self) -> Result<f64>;

    /// Nearest expiry first
    async fn fetch_expiries(&self, underlying: &Instrument) -> Result<Vec<String>>;

    async fn fetch_option_chain(&self, underlying: &Instrument, expiry: &str) -> Result<ChainResponse>;

    /// Daily bars between two dates, inclusive
    async fn fetch_historical(&self, instrument: &Instrument, from: NaiveDate, to: NaiveDate) -> Result<DailyHistory>;

    /// 1-minute candles between two IST timestamps
    async fn fetch_intraday(&self, instrument: &Instrument, from: NaiveDateTime, to: NaiveDateTime) -> Result<Candles>;
}
