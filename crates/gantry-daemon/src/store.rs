//! Durable printer configuration storage

use anyhow::{Context, Result};
use gantry_core::PrinterConfig;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Keyed store of printer configuration records.
///
/// The registry mirrors the store into its own cache; the store only
/// has to be durable, not fast.
pub trait ConfigStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<PrinterConfig>>;
    fn insert(&self, config: &PrinterConfig) -> Result<()>;
    /// Returns false when the record does not exist
    fn update(&self, config: &PrinterConfig) -> Result<bool>;
    /// Returns false when the record does not exist
    fn remove(&self, id: &str) -> Result<bool>;
}

/// JSON-file-backed store. The whole record set is rewritten through a
/// temp file on every mutation, so a crash never leaves a half-written
/// file behind.
pub struct JsonStore {
    path: PathBuf,
    records: Mutex<HashMap<String, PrinterConfig>>,
}

impl JsonStore {
    /// Open the store, loading existing records if the file exists.
    ///
    /// An unreadable file is logged and treated as empty rather than
    /// refusing to start.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<Vec<PrinterConfig>>(&content) {
                Ok(list) => {
                    info!(path = %path.display(), count = list.len(), "loaded printer records");
                    list.into_iter().map(|c| (c.id.clone(), c)).collect()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable printer store, starting empty");
                    HashMap::new()
                }
            }
        } else {
            info!(path = %path.display(), "printer store not found, starting empty");
            HashMap::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &HashMap<String, PrinterConfig>) -> Result<()> {
        let mut list: Vec<&PrinterConfig> = records.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let content = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl ConfigStore for JsonStore {
    fn load_all(&self) -> Result<Vec<PrinterConfig>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn insert(&self, config: &PrinterConfig) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(config.id.clone(), config.clone());
        self.persist(&records)
    }

    fn update(&self, config: &PrinterConfig) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if !records.contains_key(&config.id) {
            return Ok(false);
        }
        records.insert(config.id.clone(), config.clone());
        self.persist(&records)?;
        Ok(true)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, PrinterConfig>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = PrinterConfig>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, id: &str) -> Option<PrinterConfig> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

#[cfg(test)]
impl ConfigStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<PrinterConfig>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    fn insert(&self, config: &PrinterConfig) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    fn update(&self, config: &PrinterConfig) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(&config.id) {
            return Ok(false);
        }
        records.insert(config.id.clone(), config.clone());
        Ok(true)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> PrinterConfig {
        PrinterConfig::new(
            name.to_string(),
            "192.168.1.40".to_string(),
            "12345678".to_string(),
            "01P00A123456789".to_string(),
            true,
        )
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printers.json");

        let store = JsonStore::open(&path).unwrap();
        let record = config("left");
        store.insert(&record).unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        let loaded = reopened.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[test]
    fn test_json_store_update_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printers.json");
        let store = JsonStore::open(&path).unwrap();

        let mut record = config("left");
        store.insert(&record).unwrap();

        record.name = "renamed".to_string();
        assert!(store.update(&record).unwrap());
        assert!(store.remove(&record.id).unwrap());
        assert!(!store.remove(&record.id).unwrap());

        let unknown = config("unknown");
        assert!(!store.update(&unknown).unwrap());
    }

    #[test]
    fn test_json_store_tolerates_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printers.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonStore::open(&path).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
