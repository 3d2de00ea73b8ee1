// 🗄️ Storage contract - the only I/O boundary of the import pipeline
//
// Key-value per client: the pipeline loads a client's whole dataset, mutates
// it in memory and hands every resulting write to the store in one
// `apply_changes` call. A store applies the whole slice or nothing, so a
// failed import or undo never leaves rows without the batch that reverses them.

use crate::deduplication::ProcessedFileLedger;
use crate::entities::ClientAccount;
use crate::merge::ImportBatch;
use crate::records::ClientDataset;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

/// Event for the audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryChange {
    Unchanged,
    Append(ImportBatch),
    Remove(String),
}

/// Every write one import or undo makes for one client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientChange {
    pub client_id: String,
    /// `None` when the merge left the dataset untouched
    pub dataset: Option<ClientDataset>,
    pub ledger: ProcessedFileLedger,
    pub history: HistoryChange,
    pub event: Option<Event>,
}

pub trait Store: Send + Sync {
    /// Empty dataset for a client nothing was imported for yet
    fn load_dataset(&self, client_id: &str) -> Result<ClientDataset>;

    fn processed_hashes(&self, client_id: &str) -> Result<ProcessedFileLedger>;

    /// Every batch of every client, oldest first
    fn import_history(&self) -> Result<Vec<ImportBatch>>;

    fn clients(&self) -> Result<Vec<ClientAccount>>;

    fn save_client(&self, client: &ClientAccount) -> Result<()>;

    /// Apply all changes atomically: on `Err` nothing was written
    fn apply_changes(&self, changes: &[ClientChange]) -> Result<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
struct MemoryState {
    datasets: BTreeMap<String, ClientDataset>,
    hashes: BTreeMap<String, BTreeSet<String>>,
    history: Vec<ImportBatch>,
    clients: BTreeMap<String, ClientAccount>,
    events: Vec<Event>,
}

/// Store kept entirely in memory, for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: impl IntoIterator<Item = ClientAccount>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().unwrap_or_else(|e| e.into_inner());
            for client in clients {
                state.clients.insert(client.id.clone(), client);
            }
        }
        store
    }

    /// Audit events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.read().events.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn load_dataset(&self, client_id: &str) -> Result<ClientDataset> {
        Ok(self.read().datasets.get(client_id).cloned().unwrap_or_default())
    }

    fn processed_hashes(&self, client_id: &str) -> Result<ProcessedFileLedger> {
        let hashes = self.read().hashes.get(client_id).cloned().unwrap_or_default();
        Ok(ProcessedFileLedger::from_hashes(client_id, hashes))
    }

    fn import_history(&self) -> Result<Vec<ImportBatch>> {
        Ok(self.read().history.clone())
    }

    fn clients(&self) -> Result<Vec<ClientAccount>> {
        Ok(self.read().clients.values().cloned().collect())
    }

    fn save_client(&self, client: &ClientAccount) -> Result<()> {
        self.write()
            .clients
            .insert(client.id.clone(), client.clone());
        Ok(())
    }

    fn apply_changes(&self, changes: &[ClientChange]) -> Result<()> {
        let mut state = self.write();
        for change in changes {
            if let Some(dataset) = &change.dataset {
                state
                    .datasets
                    .insert(change.client_id.clone(), dataset.clone());
            }
            state
                .hashes
                .insert(change.client_id.clone(), change.ledger.hashes().clone());
            match &change.history {
                HistoryChange::Unchanged => {}
                HistoryChange::Append(batch) => state.history.push(batch.clone()),
                HistoryChange::Remove(batch_id) => state.history.retain(|b| &b.id != batch_id),
            }
            if let Some(event) = &change.event {
                state.events.push(event.clone());
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SourceKind;
    use crate::records::PerformanceRecord;

    fn create_test_change(client_id: &str, hash: &str, batch: Option<ImportBatch>) -> ClientChange {
        let mut dataset = ClientDataset::new();
        let record = PerformanceRecord::new(client_id, "Cuenta", "2024-05-01", "Camp", "Ad", "", "");
        dataset.records.insert(record.unique_id.clone(), record);

        let mut ledger = ProcessedFileLedger::new(client_id);
        ledger.record(hash);

        ClientChange {
            client_id: client_id.to_string(),
            dataset: Some(dataset),
            ledger,
            history: batch.map_or(HistoryChange::Unchanged, HistoryChange::Append),
            event: None,
        }
    }

    #[test]
    fn test_missing_client_loads_empty() {
        let store = MemoryStore::new();
        assert!(store.load_dataset("nobody").unwrap().is_empty());
        assert!(store.processed_hashes("nobody").unwrap().is_empty());
        assert!(store.import_history().unwrap().is_empty());
    }

    #[test]
    fn test_apply_changes_per_client() {
        let store = MemoryStore::new();
        let change = create_test_change("c1", "abc", None);
        store.apply_changes(&[change.clone()]).unwrap();

        assert_eq!(Some(store.load_dataset("c1").unwrap()), change.dataset);
        assert!(store.load_dataset("c2").unwrap().is_empty());
        assert!(store.processed_hashes("c1").unwrap().contains("abc"));
        assert!(!store.processed_hashes("c2").unwrap().contains("abc"));
        assert!(store.import_history().unwrap().is_empty());
    }

    #[test]
    fn test_history_append_remove_and_events() {
        let store = MemoryStore::new();
        let batch = ImportBatch::new(SourceKind::AdsSpreadsheet, "h", "c1", "f.csv", vec![]);
        let event = Event::new("import_applied", "import_batch", &batch.id, serde_json::json!({}), "test");

        let mut change = create_test_change("c1", "h", Some(batch.clone()));
        change.event = Some(event.clone());
        store.apply_changes(&[change]).unwrap();
        assert_eq!(store.import_history().unwrap(), vec![batch.clone()]);
        assert_eq!(store.events(), vec![event]);

        let removal = ClientChange {
            client_id: "c1".to_string(),
            dataset: None,
            ledger: ProcessedFileLedger::new("c1"),
            history: HistoryChange::Remove(batch.id.clone()),
            event: None,
        };
        store.apply_changes(&[removal]).unwrap();
        assert!(store.import_history().unwrap().is_empty());
        assert!(store.processed_hashes("c1").unwrap().is_empty());
        // dataset: None leaves the rows alone
        assert_eq!(store.load_dataset("c1").unwrap().record_count(), 1);
    }

    #[test]
    fn test_with_clients() {
        let client = ClientAccount::new("Tienda Sol", "EUR");
        let store = MemoryStore::with_clients([client.clone()]);
        assert_eq!(store.clients().unwrap(), vec![client]);
    }
}
