//! Working store: key/value cells with read-before-write and batched write-back

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Option expiry in use (YYYY-MM-DD). Cleared when the provider rejects it.
pub const EXPIRY_CELL: &str = "expiry";
/// Operator-entered leg, e.g. "25000 CE"
pub const MANUAL_LEG_CELL: &str = "manual_leg";

pub trait WorkingStore: Send {
    /// Reload cells from the backing medium, dropping unflushed writes
    fn refresh(&mut self) -> Result<()>;

    fn get(&self, key: &str) -> Option<&str>;

    /// Buffered until `flush`
    fn set(&mut self, key: &str, value: String);

    fn remove(&mut self, key: &str);

    fn flush(&mut self) -> Result<()>;

    /// Snapshot of every cell
    fn cells(&self) -> BTreeMap<String, String>;
}

/// Cells persisted as a flat JSON object
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self { path: path.into(), values: BTreeMap::new(), dirty: false };
        store.refresh()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkingStore for JsonFileStore {
    fn refresh(&mut self) -> Result<()> {
        self.dirty = false;
        if !self.path.exists() {
            self.values.clear();
            return Ok(());
        }

        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        self.values = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse state file {}", self.path.display()))?
        };
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    fn set(&mut self, key: &str, value: String) {
        if self.values.get(key) != Some(&value) {
            self.values.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.dirty = true;
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        debug!("Flushed {} cells to {}", self.values.len(), self.path.display());
        self.dirty = false;
        Ok(())
    }

    fn cells(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}

/// In-process store; `refresh` keeps what was flushed
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: BTreeMap<String, String>,
    values: BTreeMap<String, String>,
    pub flushes: usize,
}

impl MemoryStore {
    pub fn with_cells<'a>(cells: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let committed: BTreeMap<String, String> =
            cells.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Self { values: committed.clone(), committed, flushes: 0 }
    }
}

impl WorkingStore for MemoryStore {
    fn refresh(&mut self) -> Result<()> {
        self.values = self.committed.clone();
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn flush(&mut self) -> Result<()> {
        self.committed = self.values.clone();
        self.flushes += 1;
        Ok(())
    }

    fn cells(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sniper-engine-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = JsonFileStore::open(temp_path("missing")).unwrap();
        assert!(store.get(EXPIRY_CELL).is_none());
        assert!(store.cells().is_empty());
    }

    #[test]
    fn test_flush_then_reopen() {
        let path = temp_path("roundtrip");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.set(EXPIRY_CELL, "2026-10-20".to_string());
        store.set(MANUAL_LEG_CELL, "25000 CE".to_string());
        store.flush().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(EXPIRY_CELL), Some("2026-10-20"));
        assert_eq!(reopened.get(MANUAL_LEG_CELL), Some("25000 CE"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_refresh_drops_unflushed_writes() {
        let path = temp_path("refresh");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.set(EXPIRY_CELL, "2026-10-20".to_string());
        store.flush().unwrap();

        store.set(EXPIRY_CELL, "2026-10-27".to_string());
        store.refresh().unwrap();
        assert_eq!(store.get(EXPIRY_CELL), Some("2026-10-20"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_blank_cell_reads_as_missing() {
        let mut store = MemoryStore::with_cells([(MANUAL_LEG_CELL, "  ")]);
        assert!(store.get(MANUAL_LEG_CELL).is_none());

        store.set(EXPIRY_CELL, "2026-10-20".to_string());
        store.refresh().unwrap();
        assert!(store.get(EXPIRY_CELL).is_none());

        store.set(EXPIRY_CELL, "2026-10-20".to_string());
        store.flush().unwrap();
        store.refresh().unwrap();
        assert_eq!(store.get(EXPIRY_CELL), Some("2026-10-20"));
        assert_eq!(store.flushes, 1);
    }
}
