//! Persistence
//!
//! Two collaborators the engine reads and writes every cycle:
//! - `WorkingStore`: labeled scalar cells (inputs such as the expiry and the
//!   manual leg, outputs such as every published label)
//! - `TradeLog`: append-only trade archive with in-place amendment of the
//!   exit fields

pub mod cells;
pub mod trade_log;

pub use cells::{JsonFileStore, MemoryStore, WorkingStore, EXPIRY_CELL, MANUAL_LEG_CELL};
pub use trade_log::{
    CsvTradeLog, ExitReason, MemoryTradeLog, TradeField, TradeLog, TradeRecord, TradeStatus,
};
