// 🔍 Deduplication - content addressing at file and row granularity
//
// File level: SHA-256 of the raw bytes, recorded per client once merged.
// Row level: identity key `day|campaign|ad|age|gender`, skipped (not errored)
// when already present, since re-exports overlap date ranges.

use crate::records::PerformanceRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ============================================================================
// HASHING
// ============================================================================

/// Content address of an uploaded file (64 hex chars)
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Identity key of one performance slice
///
/// NOTE: ad set is not part of the key. Two campaigns can only collide when
/// their names are identical as well.
pub fn record_key(day: &str, campaign: &str, ad_name: &str, age: &str, gender: &str) -> String {
    format!("{}|{}|{}|{}|{}", day, campaign, ad_name, age, gender)
}

// ============================================================================
// PROCESSED FILE LEDGER
// ============================================================================

/// Hashes of files already merged for one client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFileLedger {
    client_id: String,
    hashes: BTreeSet<String>,
}

impl ProcessedFileLedger {
    pub fn new(client_id: impl Into<String>) -> Self {
        ProcessedFileLedger {
            client_id: client_id.into(),
            hashes: BTreeSet::new(),
        }
    }

    pub fn from_hashes(client_id: impl Into<String>, hashes: BTreeSet<String>) -> Self {
        ProcessedFileLedger {
            client_id: client_id.into(),
            hashes,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    /// Returns false if the hash was already recorded
    pub fn record(&mut self, hash: impl Into<String>) -> bool {
        self.hashes.insert(hash.into())
    }

    /// Only undo calls this
    pub fn remove(&mut self, hash: &str) -> bool {
        self.hashes.remove(hash)
    }

    pub fn hashes(&self) -> &BTreeSet<String> {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

// ============================================================================
// ROW-LEVEL DEDUPLICATION
// ============================================================================

/// Result of splitting incoming rows into new and already-seen
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub fresh: Vec<PerformanceRecord>,
    pub skipped: Vec<String>,
}

pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Split `incoming` into rows not yet in `existing` and the keys to skip.
    /// A key repeated inside `incoming` keeps its first occurrence.
    pub fn partition(
        &self,
        existing: &BTreeMap<String, PerformanceRecord>,
        incoming: Vec<PerformanceRecord>,
    ) -> Partition {
        let mut seen: HashSet<String> = HashSet::new();
        let mut partition = Partition::default();

        for record in incoming {
            if existing.contains_key(&record.unique_id) || !seen.insert(record.unique_id.clone()) {
                partition.skipped.push(record.unique_id);
            } else {
                partition.fresh.push(record);
            }
        }

        partition
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record(day: &str, ad: &str, age: &str) -> PerformanceRecord {
        PerformanceRecord::new("client-1", "Cuenta", day, "Campaña", ad, age, "male")
            .with_delivery(10.0, 1000)
    }

    #[test]
    fn test_file_hash_is_stable_sha256() {
        let hash1 = file_hash(b"Nombre de la cuenta;Importe gastado\n");
        let hash2 = file_hash(b"Nombre de la cuenta;Importe gastado\n");
        let other = file_hash(b"Nombre de la cuenta;Importe gastado;\n");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, other);
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
        assert_eq!(
            file_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_record_key_layout() {
        assert_eq!(
            record_key("2024-01-01", "Camp", "Ad", "18-24", "female"),
            "2024-01-01|Camp|Ad|18-24|female"
        );
    }

    #[test]
    fn test_ledger_record_and_remove() {
        let mut ledger = ProcessedFileLedger::new("client-1");
        assert!(ledger.record("abc"));
        assert!(!ledger.record("abc"));
        assert!(ledger.contains("abc"));
        assert_eq!(ledger.len(), 1);

        assert!(ledger.remove("abc"));
        assert!(!ledger.contains("abc"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_partition_skips_existing() {
        let engine = DeduplicationEngine::new();
        let existing_record = create_test_record("2024-01-01", "Ad A", "18-24");
        let mut existing = BTreeMap::new();
        existing.insert(existing_record.unique_id.clone(), existing_record.clone());

        let incoming = vec![
            existing_record.clone(),
            create_test_record("2024-01-02", "Ad A", "18-24"),
        ];
        let partition = engine.partition(&existing, incoming);

        assert_eq!(partition.fresh.len(), 1);
        assert_eq!(partition.skipped, vec![existing_record.unique_id]);
    }

    #[test]
    fn test_partition_skips_repeats_within_file() {
        let engine = DeduplicationEngine::new();
        let incoming = vec![
            create_test_record("2024-01-01", "Ad A", "18-24"),
            create_test_record("2024-01-01", "Ad A", "18-24"),
            create_test_record("2024-01-01", "Ad A", "25-34"),
        ];
        let partition = engine.partition(&BTreeMap::new(), incoming);

        assert_eq!(partition.fresh.len(), 2);
        assert_eq!(partition.skipped.len(), 1);
    }
}
