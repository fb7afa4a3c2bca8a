//! Trade log archive
//!
//! One row per trade, appended at entry. Exit fields are amended in place on
//! the row returned by `append`. Rows that do not parse are skipped on read
//! and dropped by the next amendment rewrite; row indices count parsed rows.

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "EXIT DUE T3")]
    TargetThree,
    #[serde(rename = "EXIT PIVOT BREAK")]
    PivotBreak,
    #[serde(rename = "EXIT BELOW T1")]
    BelowTargetOne,
}

impl ExitReason {
    /// Only a T3 exit counts as a win
    pub fn is_win(self) -> bool {
        self == ExitReason::TargetThree
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TargetThree => write!(f, "EXIT DUE T3"),
            ExitReason::PivotBreak => write!(f, "EXIT PIVOT BREAK"),
            ExitReason::BelowTargetOne => write!(f, "EXIT BELOW T1"),
        }
    }
}

/// Last column of a row: ACTIVE until the exit writes the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Active,
    Win,
    Loss,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Active => write!(f, "ACTIVE"),
            TradeStatus::Win => write!(f, "WIN"),
            TradeStatus::Loss => write!(f, "LOSS"),
        }
    }
}

/// Archived trade row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    /// e.g. "25000 CE"
    pub leg: String,
    pub price: f64,
    pub weak_pivot: f64,
    pub entry: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
    /// Floating-pivot status of the leg at entry
    pub structure: String,
    pub gamma_filter: String,
    pub exit_reason: Option<ExitReason>,
    /// HH:MM:SS IST
    pub entry_time: String,
    pub exit_time: Option<String>,
    pub status: TradeStatus,
}

/// Fields the lifecycle amends after entry
#[derive(Debug, Clone, PartialEq)]
pub enum TradeField {
    ExitReason(ExitReason),
    ExitTime(String),
    Status(TradeStatus),
}

impl TradeField {
    fn apply(self, record: &mut TradeRecord) {
        match self {
            TradeField::ExitReason(reason) => record.exit_reason = Some(reason),
            TradeField::ExitTime(time) => record.exit_time = Some(time),
            TradeField::Status(status) => record.status = status,
        }
    }
}

pub trait TradeLog: Send {
    /// Append a row and return its index
    fn append(&mut self, record: TradeRecord) -> Result<usize>;

    fn read_all(&self) -> Result<Vec<TradeRecord>>;

    fn update_field_at(&mut self, row: usize, field: TradeField) -> Result<()>;
}

/// CSV file with a header row
#[derive(Debug)]
pub struct CsvTradeLog {
    path: PathBuf,
}

impl CsvTradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_rows(&self) -> bool {
        std::fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn rewrite(&self, records: &[TradeRecord]) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        let mut writer = WriterBuilder::new()
            .has_headers(true)
            .from_path(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        drop(writer);

        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace trade log {}", self.path.display()))?;
        Ok(())
    }
}

impl TradeLog for CsvTradeLog {
    fn append(&mut self, record: TradeRecord) -> Result<usize> {
        let existing = self.read_all()?.len();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade log {}", self.path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(existing == 0 && !self.has_rows()).from_writer(file);
        writer.serialize(&record)?;
        writer.flush()?;

        Ok(existing)
    }

    fn read_all(&self) -> Result<Vec<TradeRecord>> {
        if !self.has_rows() {
            return Ok(Vec::new());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open trade log {}", self.path.display()))?;

        let mut records = Vec::new();
        for (i, row) in reader.deserialize::<TradeRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed trade log row {}: {}", i + 1, e),
            }
        }
        Ok(records)
    }

    fn update_field_at(&mut self, row: usize, field: TradeField) -> Result<()> {
        let mut records = self.read_all()?;
        let Some(record) = records.get_mut(row) else {
            bail!("Trade log has no row {} ({} rows)", row, records.len());
        };
        field.apply(record);
        self.rewrite(&records)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTradeLog {
    records: Vec<TradeRecord>,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeLog for MemoryTradeLog {
    fn append(&mut self, record: TradeRecord) -> Result<usize> {
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    fn read_all(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.records.clone())
    }

    fn update_field_at(&mut self, row: usize, field: TradeField) -> Result<()> {
        let len = self.records.len();
        let Some(record) = self.records.get_mut(row) else {
            bail!("Trade log has no row {} ({} rows)", row, len);
        };
        field.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(leg: &str) -> TradeRecord {
        TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            leg: leg.to_string(),
            price: 120.0,
            weak_pivot: 90.0,
            entry: 60.0,
            target1: 156.0,
            target2: 192.0,
            target3: 252.0,
            structure: "STRONG".to_string(),
            gamma_filter: "NEUTRAL FLOW".to_string(),
            exit_reason: None,
            entry_time: "10:15:00".to_string(),
            exit_time: None,
            status: TradeStatus::Active,
        }
    }

    #[test]
    fn test_csv_append_and_amend() {
        let path = std::env::temp_dir().join(format!("sniper-trades-{}.csv", uuid::Uuid::new_v4()));
        let mut log = CsvTradeLog::new(&path);
        assert!(log.read_all().unwrap().is_empty());

        assert_eq!(log.append(record("25000 CE")).unwrap(), 0);
        assert_eq!(log.append(record("24950 PE")).unwrap(), 1);

        log.update_field_at(1, TradeField::ExitReason(ExitReason::TargetThree)).unwrap();
        log.update_field_at(1, TradeField::ExitTime("10:40:00".to_string())).unwrap();
        log.update_field_at(1, TradeField::Status(TradeStatus::Win)).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].exit_reason, None);
        assert_eq!(rows[0].status, TradeStatus::Active);
        assert_eq!(rows[1].exit_reason, Some(ExitReason::TargetThree));
        assert_eq!(rows[1].exit_time.as_deref(), Some("10:40:00"));
        assert_eq!(rows[1].status, TradeStatus::Win);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("id,leg,price"));
        assert!(raw.contains("EXIT DUE T3"));
        assert_eq!(raw.lines().filter(|l| l.starts_with("id,")).count(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_row_is_skipped() {
        let path = std::env::temp_dir().join(format!("sniper-trades-{}.csv", uuid::Uuid::new_v4()));
        let mut log = CsvTradeLog::new(&path);
        log.append(record("25000 CE")).unwrap();

        // a torn append followed by an unrelated line
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("abc,25050 CE,12\nnot,a,trade,row\n");
        std::fs::write(&path, raw).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].leg, "25000 CE");

        // appends and amendments keep working; indices count parsed rows
        assert_eq!(log.append(record("24950 PE")).unwrap(), 1);
        log.update_field_at(1, TradeField::Status(TradeStatus::Loss)).unwrap();
        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].leg, "24950 PE");
        assert_eq!(rows[1].status, TradeStatus::Loss);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("not,a,trade"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_update_missing_row_fails() {
        let mut log = MemoryTradeLog::new();
        assert!(log.update_field_at(0, TradeField::Status(TradeStatus::Loss)).is_err());
        log.append(record("25000 CE")).unwrap();
        assert!(log.update_field_at(0, TradeField::Status(TradeStatus::Loss)).is_ok());
    }

    #[test]
    fn test_exit_reason_labels() {
        assert_eq!(ExitReason::PivotBreak.to_string(), "EXIT PIVOT BREAK");
        assert!(ExitReason::TargetThree.is_win());
        assert!(!ExitReason::BelowTargetOne.is_win());
    }
}
