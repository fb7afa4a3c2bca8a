//! Cycle Orchestration
//!
//! One `run_cycle` call is one polling cycle. Stages run in a fixed order,
//! each reading what earlier stages published in `IndicatorState`:
//!
//! 1. snapshot, news mode, CPR levels and relation
//! 2. expiry and option chain (a cycle without them is skipped)
//! 3. VIX range, OI levels, reference price
//! 4. gamma, predictive gamma, god mode, dealer intent
//! 5. leg structures and EMA panels
//! 6. flow, radars, regime trackers
//! 7. decision cascade, final decision, scalp
//! 8. trade lifecycle, performance, publish

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Asia::Kolkata;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dhan::{ChainResponse, MarketDataSource};
use crate::store::{TradeLog, WorkingStore, EXPIRY_CELL, MANUAL_LEG_CELL};
use crate::types::{atm_strike, Instrument, OptionChain, OptionSide, Relation};

use super::cascade::{
    anti_trap, auto_execution, decision, gamma_acceleration, opening_sniper, smart_scalp, sniper, Decision,
};
use super::context::{settle, EngineContext, IndicatorState, Stale};
use super::ema::{compression_signal, scalp_signal, EmaPanel, EmaSignal};
use super::flow::{dealer_intent, dealer_trap, gamma_state, god_mode, inside_cpr, predictive_gamma};
use super::levels::{cpr_levels, liquidity_target, oi_levels, vix_range, LiquidityTarget};
use super::pivot::{
    institutional_range_key, institutional_selector, leg_structure, parse_leg_spec, range_key, session_range,
    LegStructure,
};
use super::radar::{absorption, breakout, dark_pool, institutional_flow, liquidity_vacuum};
use super::regime::{dealer_trend, news_mode, trend_continuation};
use super::trader::{PerformanceSummary, Trade, TradeAction, TradeLifecycle};
use super::vwap::reference_price;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        ltp: f64,
        decision: Decision,
        action: Option<TradeAction>,
    },
    /// Nothing downstream is computable without a snapshot and a chain
    Skipped(String),
}

/// Read-only view served by the status API
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub updated_at: Option<DateTime<Utc>>,
    pub ltp: Option<f64>,
    pub cells: BTreeMap<String, String>,
    pub state: IndicatorState,
    pub active_trade: Option<Trade>,
    pub performance: PerformanceSummary,
}

pub struct Engine {
    source: Box<dyn MarketDataSource>,
    config: EngineConfig,
    context: EngineContext,
    store: Box<dyn WorkingStore>,
    trade_log: Box<dyn TradeLog>,
    lifecycle: TradeLifecycle,
    performance: PerformanceSummary,
    last_ltp: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

/// IST session open today, and now, as provider timestamps
fn session_window(config: &EngineConfig, now: DateTime<Utc>) -> (NaiveDateTime, NaiveDateTime) {
    let ist = now.with_timezone(&Kolkata);
    (ist.date_naive().and_time(config.session_open), ist.naive_local())
}

/// Session high/low of an option leg, used to seed a new range key
async fn session_seed(
    source: &dyn MarketDataSource,
    config: &EngineConfig,
    security_id: Option<&str>,
    now: DateTime<Utc>,
) -> Option<(f64, f64)> {
    let id = security_id?;
    let (from, to) = session_window(config, now);
    match source.fetch_intraday(&Instrument::option(id), from, to).await {
        Ok(candles) => session_range(&candles),
        Err(e) => {
            debug!("Session range for {} unavailable: {:#}", id, e);
            None
        }
    }
}

/// Leg panel; the session range is only fetched when the range key is new
#[allow(clippy::too_many_arguments)]
async fn build_leg(
    source: &dyn MarketDataSource,
    config: &EngineConfig,
    ctx: &mut EngineContext,
    chain: &OptionChain,
    strike: f64,
    side: OptionSide,
    key: String,
    with_filter: bool,
    now: DateTime<Utc>,
) -> Option<LegStructure> {
    let leg = chain.leg(strike, side)?;
    let seed = if ctx.ranges.contains(&key) {
        None
    } else {
        session_seed(source, config, leg.security_id.as_deref(), now).await
    };
    leg_structure(chain, strike, side, &mut ctx.ranges, &key, seed, with_filter)
}

/// Leg panel or a stale marker that keeps the previous one
fn fresh_leg(leg: Option<LegStructure>, what: &str) -> Result<LegStructure, Stale<LegStructure>> {
    leg.ok_or_else(|| Stale::new(format!("{} not in chain", what)))
}

/// Intraday closes for a leg, through the per-cycle cache
async fn leg_closes(
    source: &dyn MarketDataSource,
    config: &EngineConfig,
    ctx: &mut EngineContext,
    security_id: &str,
    now: DateTime<Utc>,
) -> Vec<f64> {
    if let Some(closes) = ctx.candles.get(security_id) {
        return closes.clone();
    }
    let (from, to) = session_window(config, now);
    let closes = match source.fetch_intraday(&Instrument::option(security_id), from, to).await {
        Ok(candles) => candles.closes,
        Err(e) => {
            debug!("Intraday closes for {} unavailable: {:#}", security_id, e);
            Vec::new()
        }
    };
    ctx.candles.insert(security_id, closes.clone());
    closes
}

impl Engine {
    /// Re-arms an ACTIVE trade found in the log. An unreadable log starts flat.
    pub fn new(
        source: Box<dyn MarketDataSource>,
        config: EngineConfig,
        store: Box<dyn WorkingStore>,
        trade_log: Box<dyn TradeLog>,
    ) -> Result<Self> {
        let records = trade_log.read_all().unwrap_or_else(|e| {
            warn!("Trade log unreadable, starting flat: {:#}", e);
            Vec::new()
        });
        let mut lifecycle = TradeLifecycle::new();
        lifecycle.resume(&records, &config.trade, Utc::now());
        let performance = PerformanceSummary::from_records(&records);

        Ok(Self {
            source,
            config,
            context: EngineContext::new(),
            store,
            trade_log,
            lifecycle,
            performance,
            last_ltp: None,
            updated_at: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &IndicatorState {
        &self.context.state
    }

    pub fn store(&self) -> &dyn WorkingStore {
        self.store.as_ref()
    }

    pub fn active_trade(&self) -> Option<&Trade> {
        self.lifecycle.active()
    }

    pub fn performance(&self) -> PerformanceSummary {
        self.performance
    }

    pub fn trade_records(&self) -> Result<Vec<crate::store::TradeRecord>> {
        self.trade_log.read_all()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            updated_at: self.updated_at,
            ltp: self.last_ltp,
            cells: self.store.cells(),
            state: self.context.state.clone(),
            active_trade: self.lifecycle.active().cloned(),
            performance: self.performance,
        }
    }

    fn skip(&mut self, reason: String) -> Result<CycleOutcome> {
        warn!("Cycle skipped: {}", reason);
        self.store.flush()?;
        Ok(CycleOutcome::Skipped(reason))
    }

    /// Stored expiry, or the nearest one from the provider
    async fn resolve_expiry(&mut self) -> Result<Option<String>> {
        if let Some(expiry) = self.store.get(EXPIRY_CELL) {
            return Ok(Some(expiry.to_string()));
        }
        let expiries = self.source.fetch_expiries(&self.config.underlying).await?;
        let Some(first) = expiries.into_iter().next() else {
            return Ok(None);
        };
        info!("Expiry set: {}", first);
        self.store.set(EXPIRY_CELL, first.clone());
        Ok(Some(first))
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        self.context.candles.clear();
        self.store.refresh()?;

        // ---------- snapshot ----------
        let ltp = match self.source.fetch_quote(&self.config.underlying).await {
            Ok(ltp) => ltp,
            Err(e) => return self.skip(format!("market snapshot failed: {:#}", e)),
        };
        let vix = match self.source.fetch_volatility().await {
            Ok(v) => v,
            Err(e) => {
                debug!("Volatility index unavailable, using {}: {:#}", self.config.default_volatility, e);
                self.config.default_volatility
            }
        };

        let config = &self.config;
        let ctx = &mut self.context;
        ctx.state.news_mode = news_mode(ltp, config.news_mode_threshold, &mut ctx.momentum.news_ltp);

        // ---------- structure ----------
        let today = now.with_timezone(&Kolkata).date_naive();
        let history = self
            .source
            .fetch_historical(&config.underlying, today - Duration::days(config.history_days), today)
            .await;
        let fresh = match history {
            Ok(h) => cpr_levels(&h, &config.width_bands),
            Err(e) => Err(Stale::new(format!("history fetch failed: {:#}", e))),
        };
        settle(&mut ctx.state.levels, fresh, "CPR levels");
        ctx.state.relation = ctx.state.levels.as_ref().map(|l| l.relation(ltp));

        // ---------- option chain ----------
        let expiry = match self.resolve_expiry().await {
            Ok(Some(expiry)) => expiry,
            Ok(None) => return self.skip("no expiry received".to_string()),
            Err(e) => return self.skip(format!("expiry list failed: {:#}", e)),
        };
        let chain = match self.source.fetch_option_chain(&self.config.underlying, &expiry).await {
            Ok(ChainResponse::Chain(chain)) if !chain.is_empty() => chain,
            Ok(ChainResponse::Chain(_)) => return self.skip("empty option chain".to_string()),
            Ok(ChainResponse::InvalidExpiry) => {
                self.store.remove(EXPIRY_CELL);
                return self.skip(format!("invalid expiry {}, cleared", expiry));
            }
            Err(e) => return self.skip(format!("option chain failed: {:#}", e)),
        };

        let config = &self.config;
        let source = self.source.as_ref();
        let ctx = &mut self.context;
        let step = config.strike_step;

        ctx.state.vix_range = Some(vix_range(ltp, vix));
        ctx.state.oi_levels = ctx.state.oi_levels.merge(oi_levels(ltp, &chain, step, config.flow.oi_levels_span));

        // ---------- reference price ----------
        let (open, until) = session_window(config, now);
        let candles = source.fetch_intraday(&config.underlying, open, until).await;
        let previous = ctx.state.vwap.map(|v| v.value);
        ctx.state.vwap = Some(reference_price(ltp, candles, &chain, previous, step, config.vwap_span));

        // ---------- gamma core ----------
        ctx.state.gamma = gamma_state(ltp, &chain, config, ctx.state.premium_velocity);
        let reading = predictive_gamma(ltp, &chain, config, now, &mut ctx.momentum.premium_avg);
        ctx.state.predictive = reading.signal;
        if let Some(v) = reading.premium_velocity {
            ctx.state.premium_velocity = v;
        }
        ctx.state.god = god_mode(ltp, &chain, config);
        ctx.state.dealer_intent = dealer_intent(ltp, &chain, config);

        // ---------- leg structures ----------
        let atm = atm_strike(ltp, step);
        match ctx.state.relation {
            Some(Relation::Above) | Some(Relation::Below) => {
                let side = if ctx.state.relation == Some(Relation::Above) { OptionSide::Ce } else { OptionSide::Pe };
                let leg = build_leg(source, config, ctx, &chain, atm, side, range_key(atm, side), true, now).await;
                settle(&mut ctx.state.auto_leg, fresh_leg(leg, "auto leg"), "auto leg");
            }
            _ => ctx.state.auto_leg = None,
        }

        let mut ema_scalp = Vec::new();
        let mut ema_compression = Vec::new();
        for side in [OptionSide::Ce, OptionSide::Pe] {
            let Some(leg) = chain.leg(atm, side) else {
                continue;
            };
            let closes = match leg.security_id.as_deref() {
                Some(id) => leg_closes(source, config, ctx, id, now).await,
                None => Vec::new(),
            };
            let (scalp, compression) = if closes.is_empty() {
                (EmaSignal::NoData, EmaSignal::NoData)
            } else {
                (scalp_signal(&closes, &config.ema), compression_signal(&closes, &config.ema))
            };
            ema_scalp.push(EmaPanel { strike: atm, side, price: leg.last_price, signal: scalp });
            ema_compression.push(EmaPanel { strike: atm, side, price: leg.last_price, signal: compression });
        }
        ctx.state.ema_scalp = ema_scalp;
        ctx.state.ema_compression = ema_compression;

        match self.store.get(MANUAL_LEG_CELL).map(|raw| (raw.to_string(), parse_leg_spec(raw))) {
            Some((_, Some((strike, side)))) => {
                let leg = build_leg(source, config, ctx, &chain, strike, side, range_key(strike, side), true, now).await;
                settle(&mut ctx.state.manual_leg, fresh_leg(leg, "manual leg"), "manual leg");
            }
            Some((raw, None)) => {
                warn!("Manual leg '{}' is not '<strike> <CE|PE>'", raw);
                ctx.state.manual_leg = None;
            }
            None => ctx.state.manual_leg = None,
        }

        let (inst_ce, inst_pe) = institutional_selector(ltp, &chain, step, config.flow.core_span, &config.selector);
        if let Some(strike) = inst_ce {
            let key = institutional_range_key(strike, OptionSide::Ce);
            let leg = build_leg(source, config, ctx, &chain, strike, OptionSide::Ce, key, false, now).await;
            settle(&mut ctx.state.institutional_call, fresh_leg(leg, "institutional call"), "institutional call");
        }
        if let Some(strike) = inst_pe {
            let key = institutional_range_key(strike, OptionSide::Pe);
            let leg = build_leg(source, config, ctx, &chain, strike, OptionSide::Pe, key, false, now).await;
            settle(&mut ctx.state.institutional_put, fresh_leg(leg, "institutional put"), "institutional put");
        }

        // ---------- flow, radars, regime ----------
        let state = &mut ctx.state;
        let momentum = &mut ctx.momentum;
        let gate = state.gate(ltp);
        let gamma = state.gamma;

        state.flow = institutional_flow(gate, gamma, config, now, &mut momentum.flow_ltp);
        state.breakout = breakout(gate, config, now, &mut momentum.breakout_ltp);
        state.dealer_trap = dealer_trap(&chain, config, gate, &state.oi_levels, gamma);
        let fresh = inside_cpr(ltp, &chain, config, state.relation, state.levels.as_ref());
        settle(&mut state.inside_cpr, fresh, "inside-CPR");
        state.liquidity_target = match state.relation {
            Some(relation) => {
                liquidity_target(ltp, relation, state.levels.as_ref(), &state.oi_levels, &config.radar)
            }
            None => LiquidityTarget::NoClearTarget,
        };
        let strong = state.structure_strong();
        state.dealer_trend = dealer_trend(gate, strong, gamma, &mut state.prev_relation);
        state.trend = trend_continuation(gate, strong, gamma, &mut momentum.trend_ltp);
        state.dark_pool = dark_pool(gate, &chain, config, gamma, &mut momentum.dark_pool_premium);
        state.absorption = absorption(gate, &chain, config);
        state.vacuum = liquidity_vacuum(gate, &chain, config, &mut momentum.vacuum_ltp);

        // ---------- decision cascade ----------
        if let Some(label) = opening_sniper(gate, &mut momentum.opening_done) {
            info!("OPENING: {}", label);
            state.opening = Some(label);
        }
        state.sniper = sniper(state, ltp);
        state.filtered = anti_trap(state);
        state.execution = auto_execution(state, ltp);
        state.gamma_accel = gamma_acceleration(state);
        state.decision = decision(state);

        let fresh = smart_scalp(state, ltp, &chain, config, momentum);
        settle(&mut state.scalp, fresh, "smart scalp");

        info!(
            "CYCLE: LTP {:.2} | {} | VWAP {} | {} | {} | {}",
            ltp,
            state.relation.map_or_else(|| "NO CPR".to_string(), |r| r.to_string()),
            state.vwap.map_or_else(|| "-".to_string(), |v| format!("{:.2} ({})", v.value, v.tier)),
            state.gamma,
            state.filtered,
            state.decision
        );

        // ---------- trade lifecycle ----------
        let decision_label = state.decision;
        let action = match self.lifecycle.on_cycle(
            decision_label,
            self.context.state.auto_leg.as_ref(),
            &chain,
            &self.config.trade,
            now,
            self.trade_log.as_mut(),
        ) {
            Ok(action) => action,
            Err(e) => {
                warn!("Trade lifecycle skipped: {:#}", e);
                None
            }
        };
        match self.trade_log.read_all() {
            Ok(records) => self.performance = PerformanceSummary::from_records(&records),
            Err(e) => warn!("Trade log unreadable, keeping previous performance: {:#}", e),
        }

        self.last_ltp = Some(ltp);
        self.updated_at = Some(now);
        self.publish(ltp, vix, now);
        self.store.flush()?;

        Ok(CycleOutcome::Completed { ltp, decision: decision_label, action })
    }

    /// Write every published label to the working store
    fn publish(&mut self, ltp: f64, vix: f64, now: DateTime<Utc>) {
        let state = &self.context.state;
        let mut cells: Vec<(&str, String)> = vec![
            ("ltp", format!("{:.2}", ltp)),
            ("vix", format!("{:.2}", vix)),
            ("news_mode", if state.news_mode { "NEWS MODE".to_string() } else { "NORMAL".to_string() }),
            ("gamma", state.gamma.to_string()),
            ("predictive_gamma", state.predictive.to_string()),
            ("premium_velocity", format!("{:.4}", state.premium_velocity)),
            ("god_mode", state.god.to_string()),
            ("dealer_intent", state.dealer_intent.to_string()),
            ("flow", state.flow.to_string()),
            ("breakout", state.breakout.to_string()),
            ("dealer_trap", state.dealer_trap.to_string()),
            ("inside_cpr", state.inside_cpr.to_string()),
            ("liquidity_target", state.liquidity_target.to_string()),
            ("dealer_trend", state.dealer_trend.to_string()),
            ("trend", state.trend.to_string()),
            ("dark_pool", state.dark_pool.to_string()),
            ("absorption", state.absorption.to_string()),
            ("vacuum", state.vacuum.to_string()),
            ("sniper", state.sniper.to_string()),
            ("sniper_filtered", state.filtered.to_string()),
            ("auto_execution", state.execution.to_string()),
            ("gamma_acceleration", state.gamma_accel.to_string()),
            ("decision", state.decision.to_string()),
            ("total_trades", self.performance.total.to_string()),
            ("wins", self.performance.wins.to_string()),
            ("losses", self.performance.losses.to_string()),
            ("win_rate", format!("{:.2}%", self.performance.win_rate)),
            ("updated_at", now.with_timezone(&Kolkata).format("%H:%M:%S").to_string()),
        ];

        if let Some(levels) = &state.levels {
            cells.push(("top_central", format!("{:.2}", levels.top_central)));
            cells.push(("pivot", format!("{:.2}", levels.pivot)));
            cells.push(("bottom_central", format!("{:.2}", levels.bottom_central)));
            cells.push(("cpr_width", format!("{:.2}", levels.width)));
            cells.push(("cpr_band", levels.band.to_string()));
        }
        if let Some(relation) = state.relation {
            cells.push(("relation", relation.to_string()));
        }
        if let Some(range) = state.vix_range {
            cells.push(("vix_high", format!("{:.0}", range.high)));
            cells.push(("vix_low", format!("{:.0}", range.low)));
        }
        for (key, value) in [
            ("resistance", state.oi_levels.resistance),
            ("support", state.oi_levels.support),
            ("max_pain", state.oi_levels.max_pain),
        ] {
            if let Some(v) = value {
                cells.push((key, format!("{:.0}", v)));
            }
        }
        if let Some(vwap) = state.vwap {
            cells.push(("vwap", format!("{:.2}", vwap.value)));
            cells.push(("vwap_tier", vwap.tier.to_string()));
        }
        if let Some(opening) = state.opening {
            cells.push(("opening_sniper", opening.to_string()));
        }
        if let Some(leg) = &state.auto_leg {
            cells.push(("auto_leg", format!("{} @ {:.2} | {}", leg.label(), leg.price, leg.pivot.status)));
        }
        if let Some(leg) = &state.institutional_call {
            cells.push(("institutional_call", format!("{} @ {:.2} | {}", leg.label(), leg.price, leg.pivot.status)));
        }
        if let Some(leg) = &state.institutional_put {
            cells.push(("institutional_put", format!("{} @ {:.2} | {}", leg.label(), leg.price, leg.pivot.status)));
        }
        match &state.scalp {
            Some(plan) => cells.push((
                "scalp",
                format!(
                    "{} | {} {} @ {:.2} | T1 {:.2} T3 {:.2}",
                    plan.signal, plan.strike as i64, plan.side, plan.price, plan.levels.target1, plan.levels.target3
                ),
            )),
            None => cells.push(("scalp", String::new())),
        }

        for (key, value) in cells {
            self.store.set(key, value);
        }
    }
}
