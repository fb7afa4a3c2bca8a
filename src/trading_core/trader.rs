//! Trade Lifecycle
//!
//! Single-slot state machine driven by the final decision:
//! - NONE → ACTIVE when no trade is open and the decision is BUY-class
//! - ACTIVE → EXITED when the entry leg reaches T3 or breaks down
//!
//! Levels are fixed multiples of the entry leg price. Every transition is
//! archived in the trade log, and the performance summary is recomputed from
//! the full log rather than kept as running counters.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TradeMultipliers;
use crate::store::{ExitReason, TradeField, TradeLog, TradeRecord, TradeStatus};
use crate::types::{OptionChain, OptionSide};

use super::cascade::Decision;
use super::pivot::{parse_leg_spec, LegStructure};

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn ist_clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Kolkata).format("%H:%M:%S").to_string()
}

/// Thresholds derived from the entry leg price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub weak_pivot: f64,
    pub entry: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
}

impl TradeLevels {
    pub fn from_price(price: f64, m: &TradeMultipliers) -> Self {
        Self {
            weak_pivot: round2(price * m.weak_pivot),
            entry: round2(price * m.entry),
            target1: round2(price * m.target1),
            target2: round2(price * m.target2),
            target3: round2(price * m.target3),
        }
    }

    /// Fixed priority: T3, then the weak pivot, then T1
    pub fn exit_reason(&self, price: f64) -> Option<ExitReason> {
        if price >= self.target3 {
            Some(ExitReason::TargetThree)
        } else if price < self.weak_pivot {
            Some(ExitReason::PivotBreak)
        } else if price < self.target1 {
            Some(ExitReason::BelowTargetOne)
        } else {
            None
        }
    }
}

/// The one open trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: Uuid,
    pub strike: f64,
    pub side: OptionSide,
    pub entry_price: f64,
    pub levels: TradeLevels,
    pub entry_time: DateTime<Utc>,
    /// Row in the trade log
    pub row: usize,
}

impl Trade {
    pub fn label(&self) -> String {
        format!("{} {}", self.strike as i64, self.side)
    }

    /// Price of the traded leg in this cycle's chain
    pub fn mark(&self, chain: &OptionChain) -> Option<f64> {
        chain.leg(self.strike, self.side).map(|leg| leg.last_price)
    }
}

/// What the lifecycle did this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    Enter(Trade),
    Exit {
        trade: Trade,
        price: f64,
        reason: ExitReason,
        status: TradeStatus,
    },
}

/// Holds at most one active trade
#[derive(Debug, Default)]
pub struct TradeLifecycle {
    current: Option<Trade>,
}

impl TradeLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Trade> {
        self.current.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.current.is_none()
    }

    /// Re-arm the slot from the last ACTIVE row of the log, if any
    pub fn resume(&mut self, records: &[TradeRecord], m: &TradeMultipliers, now: DateTime<Utc>) {
        let Some((row, record)) = records
            .iter()
            .enumerate()
            .rev()
            .find(|(_, r)| r.status == TradeStatus::Active)
        else {
            return;
        };
        let Some((strike, side)) = parse_leg_spec(&record.leg) else {
            warn!("Trade log row {} has unreadable leg '{}', not resuming", row, record.leg);
            return;
        };

        let trade = Trade {
            id: Uuid::parse_str(&record.id).unwrap_or_else(|_| Uuid::new_v4()),
            strike,
            side,
            entry_price: record.price,
            levels: TradeLevels::from_price(record.price, m),
            entry_time: now,
            row,
        };
        info!("Resuming active trade {} @ {:.2} (row {})", trade.label(), trade.entry_price, row);
        self.current = Some(trade);
    }

    /// Open a trade on a BUY-class decision when the slot is free
    pub fn try_enter(
        &mut self,
        decision: Decision,
        leg: Option<&LegStructure>,
        m: &TradeMultipliers,
        now: DateTime<Utc>,
        log: &mut dyn TradeLog,
    ) -> Result<Option<TradeAction>> {
        if self.current.is_some() {
            return Ok(None);
        }
        let Some(side) = decision.buy_side() else {
            return Ok(None);
        };
        let Some(leg) = leg.filter(|l| l.side == side) else {
            warn!("{} without a matching {} leg, no entry", decision, side);
            return Ok(None);
        };

        let levels = TradeLevels::from_price(leg.price, m);
        let id = Uuid::new_v4();
        let record = TradeRecord {
            id: id.to_string(),
            leg: leg.label(),
            price: leg.price,
            weak_pivot: levels.weak_pivot,
            entry: levels.entry,
            target1: levels.target1,
            target2: levels.target2,
            target3: levels.target3,
            structure: leg.pivot.status.to_string(),
            gamma_filter: leg.gamma_filter.map(|g| g.to_string()).unwrap_or_default(),
            exit_reason: None,
            entry_time: ist_clock(now),
            exit_time: None,
            status: TradeStatus::Active,
        };
        let row = log.append(record)?;

        let trade = Trade {
            id,
            strike: leg.strike,
            side,
            entry_price: leg.price,
            levels,
            entry_time: now,
            row,
        };
        info!(
            "ENTRY: {} @ {:.2} | WP {:.2} | T1 {:.2} | T2 {:.2} | T3 {:.2}",
            trade.label(),
            trade.entry_price,
            levels.weak_pivot,
            levels.target1,
            levels.target2,
            levels.target3
        );

        self.current = Some(trade.clone());
        Ok(Some(TradeAction::Enter(trade)))
    }

    /// Check the active trade against the leg's current price
    pub fn evaluate_exit(
        &mut self,
        price: Option<f64>,
        now: DateTime<Utc>,
        log: &mut dyn TradeLog,
    ) -> Result<Option<TradeAction>> {
        let Some(trade) = self.current.as_ref() else {
            return Ok(None);
        };
        let Some(price) = price else {
            debug!("{} not in chain, exit check skipped", trade.label());
            return Ok(None);
        };
        let Some(reason) = trade.levels.exit_reason(price) else {
            return Ok(None);
        };

        let status = if reason.is_win() { TradeStatus::Win } else { TradeStatus::Loss };
        log.update_field_at(trade.row, TradeField::ExitReason(reason))?;
        log.update_field_at(trade.row, TradeField::ExitTime(ist_clock(now)))?;
        log.update_field_at(trade.row, TradeField::Status(status))?;

        info!(
            "{}: {} @ {:.2} (entry {:.2}) | {}",
            reason,
            trade.label(),
            price,
            trade.entry_price,
            status
        );

        let Some(trade) = self.current.take() else {
            return Ok(None);
        };
        Ok(Some(TradeAction::Exit { trade, price, reason, status }))
    }

    /// Entry, then exit. A trade opened this cycle is not exit-checked until
    /// the next one.
    pub fn on_cycle(
        &mut self,
        decision: Decision,
        leg: Option<&LegStructure>,
        chain: &OptionChain,
        m: &TradeMultipliers,
        now: DateTime<Utc>,
        log: &mut dyn TradeLog,
    ) -> Result<Option<TradeAction>> {
        if let Some(action) = self.try_enter(decision, leg, m, now, log)? {
            return Ok(Some(action));
        }
        let mark = self.current.as_ref().and_then(|t| t.mark(chain));
        self.evaluate_exit(mark, now, log)
    }
}

/// Aggregate outcome counts over closed trades
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    /// Percent, two decimals
    pub win_rate: f64,
}

impl PerformanceSummary {
    /// Rows without an exit reason are still open and not counted
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let (wins, losses) = records
            .iter()
            .filter_map(|r| r.exit_reason)
            .fold((0u32, 0u32), |(w, l), reason| if reason.is_win() { (w + 1, l) } else { (w, l + 1) });
        let total = wins + losses;
        let win_rate = if total > 0 { round2(wins as f64 / total as f64 * 100.0) } else { 0.0 };

        Self { total, wins, losses, win_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTradeLog;
    use crate::trading_core::pivot::floating_pivot;
    use crate::types::{OptionLeg, StrikeRow};
    use chrono::Duration;

    fn ce_leg(price: f64) -> LegStructure {
        LegStructure {
            strike: 25000.0,
            side: OptionSide::Ce,
            price,
            security_id: Some("45001".to_string()),
            high: price,
            low: price,
            pivot: floating_pivot(price, price, price),
            gamma_filter: None,
        }
    }

    fn chain_with(price: f64) -> OptionChain {
        let mut chain = OptionChain::new();
        let call = OptionLeg { last_price: price, ..Default::default() };
        chain.insert(25000.0, StrikeRow { call: Some(call), put: None });
        chain
    }

    #[test]
    fn test_entry_levels_from_leg_price() {
        let levels = TradeLevels::from_price(120.0, &TradeMultipliers::default());
        assert_eq!(
            levels,
            TradeLevels { weak_pivot: 90.0, entry: 60.0, target1: 156.0, target2: 192.0, target3: 252.0 }
        );
    }

    #[test]
    fn test_exit_priority() {
        let levels = TradeLevels::from_price(120.0, &TradeMultipliers::default());
        assert_eq!(levels.exit_reason(260.0), Some(ExitReason::TargetThree));
        assert_eq!(levels.exit_reason(252.0), Some(ExitReason::TargetThree));
        assert_eq!(levels.exit_reason(80.0), Some(ExitReason::PivotBreak));
        assert_eq!(levels.exit_reason(120.0), Some(ExitReason::BelowTargetOne));
        assert_eq!(levels.exit_reason(200.0), None);
    }

    #[test]
    fn test_ce_buy_then_t3_win() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut lifecycle = TradeLifecycle::new();
        let t0 = Utc::now();
        let leg = ce_leg(120.0);

        let action = lifecycle
            .on_cycle(Decision::CeBuy, Some(&leg), &chain_with(120.0), &m, t0, &mut log)
            .unwrap();
        let Some(TradeAction::Enter(trade)) = action else {
            panic!("expected entry, got {:?}", action);
        };
        assert_eq!(trade.levels.target3, 252.0);
        assert_eq!(trade.row, 0);

        // entry leg at 120 is below T1 but the entry cycle is never exit-checked
        assert!(lifecycle.active().is_some());

        let action = lifecycle
            .on_cycle(Decision::CeBuy, Some(&leg), &chain_with(260.0), &m, t0 + Duration::seconds(8), &mut log)
            .unwrap();
        match action {
            Some(TradeAction::Exit { reason, status, price, .. }) => {
                assert_eq!(reason, ExitReason::TargetThree);
                assert_eq!(status, TradeStatus::Win);
                assert_eq!(price, 260.0);
            }
            other => panic!("expected exit, got {:?}", other),
        }
        assert!(lifecycle.is_flat());

        let rows = log.read_all().unwrap();
        assert_eq!(rows[0].exit_reason, Some(ExitReason::TargetThree));
        assert_eq!(rows[0].status, TradeStatus::Win);
        assert!(rows[0].exit_time.is_some());

        let perf = PerformanceSummary::from_records(&rows);
        assert_eq!(perf, PerformanceSummary { total: 1, wins: 1, losses: 0, win_rate: 100.0 });
    }

    #[test]
    fn test_at_most_one_active_trade() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut lifecycle = TradeLifecycle::new();
        let t0 = Utc::now();

        for i in 0..20 {
            let price = 150.0 + i as f64 * 10.0;
            let leg = ce_leg(price);
            lifecycle
                .on_cycle(Decision::CeBuy, Some(&leg), &chain_with(price), &m, t0 + Duration::seconds(8 * i), &mut log)
                .unwrap();
            let open = log.read_all().unwrap().iter().filter(|r| r.status == TradeStatus::Active).count();
            assert!(open <= 1);
        }
    }

    #[test]
    fn test_no_entry_without_buy_or_leg() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut lifecycle = TradeLifecycle::new();
        let leg = ce_leg(120.0);

        assert!(lifecycle.try_enter(Decision::WaitConflict, Some(&leg), &m, Utc::now(), &mut log).unwrap().is_none());
        assert!(lifecycle.try_enter(Decision::CeBuy, None, &m, Utc::now(), &mut log).unwrap().is_none());
        // PE BUY with a CE leg selected
        assert!(lifecycle.try_enter(Decision::PeBuy, Some(&leg), &m, Utc::now(), &mut log).unwrap().is_none());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_missing_leg_skips_exit() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut lifecycle = TradeLifecycle::new();
        lifecycle.try_enter(Decision::CeBuy, Some(&ce_leg(120.0)), &m, Utc::now(), &mut log).unwrap();

        let action = lifecycle
            .on_cycle(Decision::WaitConflict, None, &OptionChain::new(), &m, Utc::now(), &mut log)
            .unwrap();
        assert!(action.is_none());
        assert!(lifecycle.active().is_some());
    }

    #[test]
    fn test_performance_recomputed_from_log() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut lifecycle = TradeLifecycle::new();
        let t0 = Utc::now();

        for exit_price in [260.0, 80.0, 130.0] {
            lifecycle.try_enter(Decision::CeBuy, Some(&ce_leg(120.0)), &m, t0, &mut log).unwrap();
            lifecycle.evaluate_exit(Some(exit_price), t0, &mut log).unwrap();
        }
        lifecycle.try_enter(Decision::CeBuy, Some(&ce_leg(120.0)), &m, t0, &mut log).unwrap();

        let perf = PerformanceSummary::from_records(&log.read_all().unwrap());
        assert_eq!(perf.total, 3);
        assert_eq!(perf.wins, 1);
        assert_eq!(perf.losses, 2);
        assert_eq!(perf.win_rate, 33.33);
    }

    #[test]
    fn test_resume_last_active_row() {
        let m = TradeMultipliers::default();
        let mut log = MemoryTradeLog::new();
        let mut first = TradeLifecycle::new();
        first.try_enter(Decision::CeBuy, Some(&ce_leg(120.0)), &m, Utc::now(), &mut log).unwrap();

        let mut restarted = TradeLifecycle::new();
        restarted.resume(&log.read_all().unwrap(), &m, Utc::now());
        let trade = restarted.active().unwrap();
        assert_eq!(trade.label(), "25000 CE");
        assert_eq!(trade.row, 0);
        assert_eq!(trade.levels.weak_pivot, 90.0);
    }
}
