// 🔀 Incremental Merge Engine - insert-only merges that can be reversed
//
// Records are never updated in place: a merge only adds keys that are not
// there yet. Each merge that inserted something is captured as an
// ImportBatch carrying exactly the keys it added, so undo removes those
// keys and nothing else.

use crate::bitacora::BitacoraReport;
use crate::deduplication::{DeduplicationEngine, ProcessedFileLedger};
use crate::error::{ImportError, Result};
use crate::parser::SourceKind;
use crate::records::{ClientDataset, CreativeLink, PerformanceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// IMPORT BATCH
// ============================================================================

/// What undo needs to reverse one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoData {
    pub source: SourceKind,
    pub keys: Vec<String>,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceKind,
    pub file_hash: String,
    pub client_id: String,
    pub description: String,
    pub undo: UndoData,
}

impl ImportBatch {
    pub fn new(
        source: SourceKind,
        file_hash: impl Into<String>,
        client_id: impl Into<String>,
        description: impl Into<String>,
        keys: Vec<String>,
    ) -> Self {
        let client_id = client_id.into();
        ImportBatch {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source,
            file_hash: file_hash.into(),
            client_id: client_id.clone(),
            description: description.into(),
            undo: UndoData {
                source,
                keys,
                client_id,
            },
        }
    }

    pub fn key_count(&self) -> usize {
        self.undo.keys.len()
    }
}

// ============================================================================
// MERGE RESULTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub inserted_count: usize,
    pub inserted_keys: Vec<String>,
    pub skipped_count: usize,
}

impl MergeResult {
    pub fn is_noop(&self) -> bool {
        self.inserted_count == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub success: bool,
    /// Some keys were already gone
    pub partial: bool,
    pub removed: usize,
    pub missing_keys: Vec<String>,
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine {
    dedup: DeduplicationEngine,
}

impl MergeEngine {
    pub fn new() -> Self {
        MergeEngine {
            dedup: DeduplicationEngine::new(),
        }
    }

    /// Insert rows whose identity key is not present yet
    pub fn merge_records(
        &self,
        dataset: &mut ClientDataset,
        records: Vec<PerformanceRecord>,
    ) -> MergeResult {
        let partition = self.dedup.partition(&dataset.records, records);
        let mut result = MergeResult {
            skipped_count: partition.skipped.len(),
            ..Default::default()
        };

        for record in partition.fresh {
            result.inserted_keys.push(record.unique_id.clone());
            dataset.records.insert(record.unique_id.clone(), record);
        }
        result.inserted_count = result.inserted_keys.len();
        result
    }

    /// Keyed by ad name; an existing link is never overwritten
    pub fn merge_links(&self, dataset: &mut ClientDataset, links: Vec<CreativeLink>) -> MergeResult {
        let mut result = MergeResult::default();

        for link in links {
            if dataset.creative_links.contains_key(&link.ad_name) {
                result.skipped_count += 1;
                continue;
            }
            result.inserted_keys.push(link.ad_name.clone());
            dataset.creative_links.insert(link.ad_name.clone(), link);
        }
        result.inserted_count = result.inserted_keys.len();
        result
    }

    pub fn store_report(
        &self,
        dataset: &mut ClientDataset,
        report_id: &str,
        report: BitacoraReport,
    ) -> MergeResult {
        if dataset.reports.contains_key(report_id) {
            return MergeResult {
                skipped_count: 1,
                ..Default::default()
            };
        }

        dataset.reports.insert(report_id.to_string(), report);
        MergeResult {
            inserted_count: 1,
            inserted_keys: vec![report_id.to_string()],
            skipped_count: 0,
        }
    }

    /// Reverse one batch against its client's dataset and ledger.
    ///
    /// Keys that are already gone are reported, not errored.
    pub fn undo(
        &self,
        batch_id: &str,
        history: &mut Vec<ImportBatch>,
        dataset: &mut ClientDataset,
        ledger: &mut ProcessedFileLedger,
    ) -> Result<UndoOutcome> {
        let position = history
            .iter()
            .position(|b| b.id == batch_id)
            .ok_or_else(|| ImportError::BatchNotFound(batch_id.to_string()))?;
        let batch = history.remove(position);

        let mut outcome = UndoOutcome::default();
        for key in &batch.undo.keys {
            let removed = match batch.undo.source {
                SourceKind::AdsSpreadsheet => dataset.records.remove(key).is_some(),
                SourceKind::CreativeSpreadsheet => dataset.creative_links.remove(key).is_some(),
                SourceKind::TextReport => dataset.reports.remove(key).is_some(),
            };
            if removed {
                outcome.removed += 1;
            } else {
                outcome.missing_keys.push(key.clone());
            }
        }

        ledger.remove(&batch.file_hash);

        outcome.partial = !outcome.missing_keys.is_empty();
        outcome.success = true;

        if outcome.partial {
            warn!(
                batch_id,
                client_id = %batch.client_id,
                missing = outcome.missing_keys.len(),
                "undo was partial, some keys were already gone"
            );
        }
        info!(
            batch_id,
            client_id = %batch.client_id,
            source = batch.source.code(),
            removed = outcome.removed,
            "import batch undone"
        );

        Ok(outcome)
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
