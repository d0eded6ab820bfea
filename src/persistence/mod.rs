// 💾 Persistence Port - load/save the whole ledger as one unit
//
// The ledger is small (a handful of members, a few years of months), so every
// save writes the full snapshot. Implementations must make a save atomic:
// either the new snapshot is fully visible or the old one still is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::PersistenceError;
use crate::ledger::LedgerSnapshot;

pub mod json;
pub mod sqlite;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

// ============================================================================
// PORT
// ============================================================================

pub trait PersistencePort: Send {
    /// `Ok(None)` when nothing has been saved yet
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, PersistenceError>;

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError>;

    /// Append to the audit trail, if the medium keeps one
    fn record_event(&mut self, _event: &LedgerEvent) -> Result<(), PersistenceError> {
        Ok(())
    }

    /// Short label for logs
    fn describe(&self) -> String;

    /// Rows the last load skipped because they could not be parsed
    fn quarantined_rows(&self) -> usize {
        0
    }
}

// ============================================================================
// AUDIT EVENT ("every change is an event")
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LedgerEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    /// Billing identity (or "config") the change applies to
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl LedgerEvent {
    pub fn new(event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Volatile store. Cloning shares the same backing data, so a test can keep
/// a handle to inspect what was saved or to flip the fail switch.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<LedgerSnapshot>,
    events: Vec<LedgerEvent>,
    fail_saves: bool,
    fail_loads: bool,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        let store = Self::default();
        store.lock().snapshot = Some(snapshot);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// Replace the stored snapshot, as an out-of-process edit would
    pub fn overwrite(&self, snapshot: LedgerSnapshot) {
        self.lock().snapshot = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<LedgerSnapshot> {
        self.lock().snapshot.clone()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.lock().events.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }
}

impl PersistencePort for MemoryStore {
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        let inner = self.lock();
        if inner.fail_loads {
            return Err(PersistenceError::Unavailable("load disabled".to_string()));
        }
        Ok(inner.snapshot.clone())
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        if inner.fail_saves {
            return Err(PersistenceError::Unavailable("save disabled".to_string()));
        }
        inner.snapshot = Some(snapshot.clone());
        inner.saves += 1;
        Ok(())
    }

    fn record_event(&mut self, event: &LedgerEvent) -> Result<(), PersistenceError> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_shares_state_between_clones() {
        let store = MemoryStore::new();
        let mut port = store.clone();

        assert!(port.load().unwrap().is_none());
        port.save(&LedgerSnapshot::default()).unwrap();

        assert_eq!(store.save_count(), 1);
        assert!(store.snapshot().is_some());
    }

    #[test]
    fn test_memory_store_fail_switch() {
        let store = MemoryStore::new();
        let mut port = store.clone();
        store.set_fail_saves(true);

        assert!(port.save(&LedgerSnapshot::default()).is_err());
        assert!(store.snapshot().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_event_has_unique_id() {
        let a = LedgerEvent::new("payment_registered", "1", serde_json::json!({}), "1");
        let b = LedgerEvent::new("payment_registered", "1", serde_json::json!({}), "1");
        assert_ne!(a.event_id, b.event_id);
    }
}
