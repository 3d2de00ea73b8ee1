// 📥 Import pipeline - bytes in, merged and undoable datasets out
//
// hash → read sheet → normalize/validate → parse rows → gate → lock target
// clients (sorted) → duplicate-file check → merge every client in memory →
// one `Store::apply_changes` with datasets, ledgers, batches and events.
//
// Nothing is written before that single call, and the store applies it
// whole or not at all.

use crate::aggregation::{active_days, date_span};
use crate::bitacora::parse_report;
use crate::deduplication::{file_hash, ProcessedFileLedger};
use crate::entities::{ClientAccount, ClientRegistry};
use crate::error::{ImportError, Result};
use crate::gate::NewEntityGate;
use crate::merge::{ImportBatch, MergeEngine, MergeResult, UndoOutcome};
use crate::parser::{
    read_sheet, CreativeLinkParser, ExportParser, ParsedRow, PerformanceParser, SourceKind,
};
use crate::records::{ClientDataset, CreativeLink, PerformanceRecord};
use crate::schema::{SchemaKind, SchemaNormalizer};
use crate::store::{ClientChange, Event, HistoryChange, Store};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const ACTOR: &str = "importer";

// ============================================================================
// OPTIONS & OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Confirm-and-retry path: merge the known accounts, drop the rest
    pub skip_unknown_accounts: bool,
}

impl ImportOptions {
    pub fn skip_unknown() -> Self {
        ImportOptions {
            skip_unknown_accounts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMergeResult {
    pub client_id: String,
    pub client_name: String,
    pub inserted_count: usize,
    pub inserted_keys: Vec<String>,
    pub skipped_count: usize,
    /// None when nothing was inserted
    pub batch_id: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub active_days_detected: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportOutcome {
    /// Gate tripped; nothing was written
    NewAccounts(Vec<String>),
    Merged(Vec<ClientMergeResult>),
}

// ============================================================================
// PER-CLIENT LOCKS
// ============================================================================

/// One mutex per client id; the ledger check and merge run under it
#[derive(Default)]
pub struct ClientLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, client_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handles in sorted id order, so multi-client imports never deadlock
    pub fn handles<'a, I>(&self, client_ids: I) -> Vec<Arc<Mutex<()>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<&str> = client_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(|id| self.handle(id)).collect()
    }
}

fn lock_all(handles: &[Arc<Mutex<()>>]) -> Vec<MutexGuard<'_, ()>> {
    handles
        .iter()
        .map(|h| h.lock().unwrap_or_else(|e| e.into_inner()))
        .collect()
}

// ============================================================================
// IMPORTER
// ============================================================================

enum ParsedItems {
    Records(Vec<ParsedRow<PerformanceRecord>>),
    Links(Vec<ParsedRow<CreativeLink>>),
}

impl ParsedItems {
    fn source_kind(&self) -> SourceKind {
        match self {
            ParsedItems::Records(_) => SourceKind::AdsSpreadsheet,
            ParsedItems::Links(_) => SourceKind::CreativeSpreadsheet,
        }
    }

    fn account_names(&self) -> Vec<&str> {
        match self {
            ParsedItems::Records(rows) => rows.iter().map(|r| r.account_name.as_str()).collect(),
            ParsedItems::Links(rows) => rows.iter().map(|r| r.account_name.as_str()).collect(),
        }
    }
}

/// Items of one file routed to one client
enum ClientItems {
    Records(Vec<PerformanceRecord>),
    Links(Vec<CreativeLink>),
}

fn route<T>(
    rows: Vec<ParsedRow<T>>,
    known: &BTreeMap<String, String>,
    mut attach: impl FnMut(&mut T, &str),
) -> BTreeMap<String, Vec<T>> {
    let mut routed: BTreeMap<String, Vec<T>> = BTreeMap::new();
    let mut dropped = 0usize;

    for mut row in rows {
        match known.get(row.account_name.trim()) {
            Some(client_id) => {
                attach(&mut row.item, client_id);
                routed.entry(client_id.clone()).or_default().push(row.item);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "rows without a known account dropped");
    }
    routed
}

pub struct Importer<S: Store> {
    store: S,
    normalizer: SchemaNormalizer,
    engine: MergeEngine,
    locks: ClientLocks,
}

impl<S: Store> Importer<S> {
    pub fn new(store: S, normalizer: SchemaNormalizer) -> Self {
        Importer {
            store,
            normalizer,
            engine: MergeEngine::new(),
            locks: ClientLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    pub fn add_client(&self, client: ClientAccount) -> Result<ClientAccount> {
        self.store.save_client(&client)?;
        info!(client_id = %client.id, name = %client.name, "client registered");
        Ok(client)
    }

    pub fn clients(&self) -> Result<Vec<ClientAccount>> {
        Ok(ClientRegistry::from_clients(self.store.clients()?).all_clients())
    }

    fn registry(&self) -> Result<ClientRegistry> {
        Ok(ClientRegistry::from_clients(self.store.clients()?))
    }

    fn require_client(&self, client_id: &str) -> Result<ClientAccount> {
        self.registry()?
            .find_by_id(client_id)
            .ok_or_else(|| ImportError::UnknownClient(client_id.to_string()))
    }

    // ------------------------------------------------------------------------
    // Spreadsheets
    // ------------------------------------------------------------------------

    pub fn import_spreadsheet(
        &self,
        filename: &str,
        bytes: &[u8],
        options: ImportOptions,
    ) -> Result<ImportOutcome> {
        let hash = file_hash(bytes);
        let sheet = read_sheet(filename, bytes)?;
        let normalized = self.normalizer.normalize(&sheet)?;

        let parsed = match normalized.kind {
            SchemaKind::Performance => {
                ParsedItems::Records(PerformanceParser::new().parse_rows(&normalized))
            }
            SchemaKind::CreativeLinks => {
                ParsedItems::Links(CreativeLinkParser::new().parse_rows(&normalized))
            }
        };
        let source = parsed.source_kind();

        let registry = self.registry()?;
        let gate = NewEntityGate::partition(parsed.account_names(), &registry);
        if !gate.unknown.is_empty() {
            if !options.skip_unknown_accounts {
                info!(file = filename, unknown = ?gate.unknown, "import halted on unknown accounts");
                return Ok(ImportOutcome::NewAccounts(gate.unknown));
            }
            warn!(file = filename, skipped = ?gate.unknown, "rows of unknown accounts skipped");
        }

        let per_client: BTreeMap<String, ClientItems> = match parsed {
            ParsedItems::Records(rows) => route(rows, &gate.known, |record, client_id| {
                record.client_id = client_id.to_string();
            })
            .into_iter()
            .map(|(id, items)| (id, ClientItems::Records(items)))
            .collect(),
            ParsedItems::Links(rows) => route(rows, &gate.known, |_, _| {})
                .into_iter()
                .map(|(id, items)| (id, ClientItems::Links(items)))
                .collect(),
        };

        let handles = self.locks.handles(per_client.keys().map(String::as_str));
        let _guards = lock_all(&handles);

        // All-or-nothing: a duplicate for any target rejects the whole file
        let mut ledgers = BTreeMap::new();
        for client_id in per_client.keys() {
            let ledger = self.store.processed_hashes(client_id)?;
            if ledger.contains(&hash) {
                return Err(ImportError::DuplicateFile {
                    client_id: client_id.clone(),
                    file_hash: hash,
                });
            }
            ledgers.insert(client_id.clone(), ledger);
        }

        let mut changes = Vec::with_capacity(per_client.len());
        let mut results = Vec::with_capacity(per_client.len());
        for (client_id, items) in per_client {
            let client_name = registry
                .find_by_id(&client_id)
                .map(|c| c.name)
                .unwrap_or_default();
            let ledger = ledgers
                .remove(&client_id)
                .unwrap_or_else(|| ProcessedFileLedger::new(client_id.clone()));

            let mut dataset = self.store.load_dataset(&client_id)?;
            let (merge, period) = match items {
                ClientItems::Records(records) => {
                    let merge = self.engine.merge_records(&mut dataset, records);
                    let period = detected_period(&dataset, &merge);
                    (merge, period)
                }
                ClientItems::Links(links) => (self.engine.merge_links(&mut dataset, links), None),
            };

            let pending = PendingMerge {
                client_id: &client_id,
                client_name: &client_name,
                filename,
                hash: &hash,
                source,
            };
            let (change, result) = pending.finish(dataset, merge, period, ledger);
            changes.push(change);
            results.push(result);
        }

        self.store.apply_changes(&changes)?;
        for result in &results {
            log_merged(result, filename, source);
        }

        Ok(ImportOutcome::Merged(results))
    }

    // ------------------------------------------------------------------------
    // Text reports
    // ------------------------------------------------------------------------

    pub fn import_text_report(
        &self,
        client_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ClientMergeResult> {
        let client = self.require_client(client_id)?;
        let hash = file_hash(bytes);

        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_start_matches('\u{feff}');
        let report = parse_report(text);
        if report.tables.is_empty() {
            return Err(ImportError::UnreadableFile(format!(
                "{}: no tables found in report",
                filename
            )));
        }

        let handle = self.locks.handle(client_id);
        let _guard = handle.lock().unwrap_or_else(|e| e.into_inner());

        let ledger = self.store.processed_hashes(client_id)?;
        if ledger.contains(&hash) {
            return Err(ImportError::DuplicateFile {
                client_id: client_id.to_string(),
                file_hash: hash,
            });
        }

        let mut dataset = self.store.load_dataset(client_id)?;
        let merge = self.engine.store_report(&mut dataset, &hash, report);

        let pending = PendingMerge {
            client_id,
            client_name: &client.name,
            filename,
            hash: &hash,
            source: SourceKind::TextReport,
        };
        let (change, result) = pending.finish(dataset, merge, None, ledger);
        self.store.apply_changes(&[change])?;
        log_merged(&result, filename, SourceKind::TextReport);

        Ok(result)
    }

    // ------------------------------------------------------------------------
    // History & undo
    // ------------------------------------------------------------------------

    /// Batches oldest first, optionally for one client
    pub fn history(&self, client_id: Option<&str>) -> Result<Vec<ImportBatch>> {
        let history = self.store.import_history()?;
        Ok(history
            .into_iter()
            .filter(|b| client_id.map_or(true, |id| b.client_id == id))
            .collect())
    }

    pub fn undo(&self, batch_id: &str) -> Result<UndoOutcome> {
        let client_id = self
            .store
            .import_history()?
            .into_iter()
            .find(|b| b.id == batch_id)
            .map(|b| b.client_id)
            .ok_or_else(|| ImportError::BatchNotFound(batch_id.to_string()))?;

        let handle = self.locks.handle(&client_id);
        let _guard = handle.lock().unwrap_or_else(|e| e.into_inner());

        let mut history = self.store.import_history()?;
        let mut dataset = self.store.load_dataset(&client_id)?;
        let mut ledger = self.store.processed_hashes(&client_id)?;

        let outcome = self
            .engine
            .undo(batch_id, &mut history, &mut dataset, &mut ledger)?;

        let event = Event::new(
            "import_undone",
            "import_batch",
            batch_id,
            serde_json::json!({
                "client_id": client_id,
                "removed": outcome.removed,
                "partial": outcome.partial,
                "missing_keys": outcome.missing_keys,
            }),
            ACTOR,
        );
        self.store.apply_changes(&[ClientChange {
            client_id,
            dataset: Some(dataset),
            ledger,
            history: HistoryChange::Remove(batch_id.to_string()),
            event: Some(event),
        }])?;

        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Consistent copy of a client's dataset, taken under the client's lock
    pub fn snapshot(&self, client_id: &str) -> Result<ClientDataset> {
        self.require_client(client_id)?;
        let handle = self.locks.handle(client_id);
        let _guard = handle.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.store.load_dataset(client_id)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct DetectedPeriod {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    active_days: usize,
}

/// Date span and spending days of the rows a merge actually inserted
fn detected_period(dataset: &ClientDataset, merge: &MergeResult) -> Option<DetectedPeriod> {
    if merge.is_noop() {
        return None;
    }
    let inserted: Vec<&PerformanceRecord> = merge
        .inserted_keys
        .iter()
        .filter_map(|key| dataset.records.get(key))
        .collect();
    let span = date_span(inserted.iter().copied());

    Some(DetectedPeriod {
        start: span.map(|(start, _)| start),
        end: span.map(|(_, end)| end),
        active_days: active_days(inserted.iter().copied()),
    })
}

/// One client's merged file, not yet persisted. Caller holds the client's lock.
struct PendingMerge<'a> {
    client_id: &'a str,
    client_name: &'a str,
    filename: &'a str,
    hash: &'a str,
    source: SourceKind,
}

impl PendingMerge<'_> {
    /// The store writes and the caller-facing result for this merge
    fn finish(
        self,
        dataset: ClientDataset,
        merge: MergeResult,
        period: Option<DetectedPeriod>,
        mut ledger: ProcessedFileLedger,
    ) -> (ClientChange, ClientMergeResult) {
        ledger.record(self.hash);

        let batch = (!merge.is_noop()).then(|| {
            ImportBatch::new(
                self.source,
                self.hash,
                self.client_id,
                format!("{} ({} {})", self.filename, merge.inserted_count, self.source.name()),
                merge.inserted_keys.clone(),
            )
        });

        let event = batch.as_ref().map(|batch| {
            Event::new(
                "import_applied",
                "import_batch",
                &batch.id,
                serde_json::json!({
                    "client_id": self.client_id,
                    "source": self.source.code(),
                    "file": self.filename,
                    "file_hash": self.hash,
                    "inserted": merge.inserted_count,
                    "skipped": merge.skipped_count,
                }),
                ACTOR,
            )
        });

        let result = ClientMergeResult {
            client_id: self.client_id.to_string(),
            client_name: self.client_name.to_string(),
            inserted_count: merge.inserted_count,
            inserted_keys: merge.inserted_keys,
            skipped_count: merge.skipped_count,
            batch_id: batch.as_ref().map(|b| b.id.clone()),
            period_start: period.and_then(|p| p.start),
            period_end: period.and_then(|p| p.end),
            active_days_detected: period.map(|p| p.active_days),
        };

        let change = ClientChange {
            client_id: self.client_id.to_string(),
            dataset: batch.is_some().then_some(dataset),
            ledger,
            history: batch.map_or(HistoryChange::Unchanged, HistoryChange::Append),
            event,
        };

        (change, result)
    }
}

fn log_merged(result: &ClientMergeResult, filename: &str, source: SourceKind) {
    info!(
        client_id = %result.client_id,
        file = filename,
        source = source.code(),
        inserted = result.inserted_count,
        skipped = result.skipped_count,
        "import merged"
    );
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    const HEADER: &str = "Nombre de la cuenta;Nombre de la campaña;Nombre del anuncio;Día;Edad;Sexo;Importe gastado (EUR);Impresiones";

    fn csv(rows: &[&str]) -> Vec<u8> {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out.push('\n');
        out.into_bytes()
    }

    fn create_test_importer() -> (Importer<MemoryStore>, ClientAccount) {
        let client = ClientAccount::new("Tienda Sol", "EUR");
        let store = MemoryStore::with_clients([client.clone()]);
        let importer = Importer::new(store, SchemaNormalizer::new().unwrap());
        (importer, client)
    }

    /// Reads from a `MemoryStore`, refuses every write while `fail_writes` is set
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            FlakyStore {
                inner,
                fail_writes: AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }
    }

    impl Store for FlakyStore {
        fn load_dataset(&self, client_id: &str) -> anyhow::Result<ClientDataset> {
            self.inner.load_dataset(client_id)
        }

        fn processed_hashes(&self, client_id: &str) -> anyhow::Result<ProcessedFileLedger> {
            self.inner.processed_hashes(client_id)
        }

        fn import_history(&self) -> anyhow::Result<Vec<ImportBatch>> {
            self.inner.import_history()
        }

        fn clients(&self) -> anyhow::Result<Vec<ClientAccount>> {
            self.inner.clients()
        }

        fn save_client(&self, client: &ClientAccount) -> anyhow::Result<()> {
            self.inner.save_client(client)
        }

        fn apply_changes(&self, changes: &[ClientChange]) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("history table locked");
            }
            self.inner.apply_changes(changes)
        }
    }

    fn merged(outcome: ImportOutcome) -> Vec<ClientMergeResult> {
        match outcome {
            ImportOutcome::Merged(results) => results,
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn test_import_then_duplicate_file() {
        let (importer, client) = create_test_importer();
        let bytes = csv(&[
            "Tienda Sol;Verano;Video A;01/05/2024;25-34;female;10,00;1.000",
            "Tienda Sol;Verano;Video A;02/05/2024;25-34;female;0;500",
        ]);

        let results = merged(importer.import_spreadsheet("mayo.csv", &bytes, ImportOptions::default()).unwrap());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].inserted_count, 2);
        assert_eq!(results[0].client_name, "Tienda Sol");
        assert!(results[0].batch_id.is_some());
        assert_eq!(results[0].period_start, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(results[0].period_end, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert_eq!(results[0].active_days_detected, Some(1));

        let second = importer.import_spreadsheet("mayo.csv", &bytes, ImportOptions::default());
        assert!(matches!(second, Err(ImportError::DuplicateFile { .. })));
        assert_eq!(importer.snapshot(&client.id).unwrap().record_count(), 2);
    }

    #[test]
    fn test_unknown_account_halts_without_writes() {
        let (importer, client) = create_test_importer();
        let bytes = csv(&[
            "Tienda Sol;Verano;Video A;01/05/2024;25-34;female;10;100",
            "Cuenta Nueva;Verano;Video B;01/05/2024;25-34;female;10;100",
        ]);

        let outcome = importer.import_spreadsheet("x.csv", &bytes, ImportOptions::default()).unwrap();
        assert_eq!(outcome, ImportOutcome::NewAccounts(vec!["Cuenta Nueva".to_string()]));
        assert_eq!(importer.snapshot(&client.id).unwrap().record_count(), 0);
        assert!(importer.history(None).unwrap().is_empty());
        assert!(importer.store().processed_hashes(&client.id).unwrap().is_empty());

        let results = merged(importer.import_spreadsheet("x.csv", &bytes, ImportOptions::skip_unknown()).unwrap());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].inserted_count, 1);
    }

    #[test]
    fn test_zero_insert_records_hash_without_batch() {
        let (importer, client) = create_test_importer();
        importer
            .import_spreadsheet("a.csv", &csv(&["Tienda Sol;Verano;A;01/05/2024;;;1;1"]), ImportOptions::default())
            .unwrap();

        // Same row, different bytes (trailing blank line)
        let mut overlap = csv(&["Tienda Sol;Verano;A;01/05/2024;;;1;1"]);
        overlap.push(b'\n');
        let results = merged(importer.import_spreadsheet("b.csv", &overlap, ImportOptions::default()).unwrap());

        assert_eq!(results[0].inserted_count, 0);
        assert_eq!(results[0].skipped_count, 1);
        assert_eq!(results[0].batch_id, None);
        assert_eq!(importer.history(Some(&client.id)).unwrap().len(), 1);
        assert_eq!(importer.store().processed_hashes(&client.id).unwrap().len(), 2);
    }

    #[test]
    fn test_undo_restores_dataset_and_ledger() {
        let (importer, client) = create_test_importer();
        let bytes = csv(&["Tienda Sol;Verano;A;01/05/2024;;;1;1"]);
        let results = merged(importer.import_spreadsheet("a.csv", &bytes, ImportOptions::default()).unwrap());
        let batch_id = results[0].batch_id.clone().unwrap();

        let outcome = importer.undo(&batch_id).unwrap();
        assert!(outcome.success);
        assert!(!outcome.partial);
        assert_eq!(importer.snapshot(&client.id).unwrap().record_count(), 0);
        assert!(importer.history(None).unwrap().is_empty());

        // The same file can be imported again
        merged(importer.import_spreadsheet("a.csv", &bytes, ImportOptions::default()).unwrap());

        let events: Vec<_> = importer.store().events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(events, vec!["import_applied", "import_undone", "import_applied"]);
    }

    #[test]
    fn test_undo_unknown_batch() {
        let (importer, _) = create_test_importer();
        assert!(matches!(importer.undo("nope"), Err(ImportError::BatchNotFound(_))));
    }

    #[test]
    fn test_import_text_report() {
        let (importer, client) = create_test_importer();
        let text = "**Resumen general**\n| Métrica | Valor |\n|---|---|\n| Gasto | 1.234,56 € |\n";

        let result = importer.import_text_report(&client.id, "informe.txt", text.as_bytes()).unwrap();
        assert_eq!(result.inserted_count, 1);
        let dataset = importer.snapshot(&client.id).unwrap();
        assert!(dataset.reports[&result.inserted_keys[0]].main_summary_table.is_some());

        let again = importer.import_text_report(&client.id, "informe.txt", text.as_bytes());
        assert!(matches!(again, Err(ImportError::DuplicateFile { .. })));
    }

    #[test]
    fn test_text_report_errors() {
        let (importer, client) = create_test_importer();
        assert!(matches!(
            importer.import_text_report("ghost", "r.txt", b"| a |\n| 1 |"),
            Err(ImportError::UnknownClient(_))
        ));
        assert!(matches!(
            importer.import_text_report(&client.id, "r.txt", b"solo texto"),
            Err(ImportError::UnreadableFile(_))
        ));
    }

    #[test]
    fn test_creative_links_import() {
        let (importer, client) = create_test_importer();
        let bytes = b"Account name,Ad name,Thumbnail URL\nTienda Sol,Video A,https://cdn/a.jpg\n";
        let results = merged(importer.import_spreadsheet("links.csv", bytes, ImportOptions::default()).unwrap());

        assert_eq!(results[0].inserted_keys, vec!["Video A".to_string()]);
        assert_eq!(results[0].active_days_detected, None);
        let batch = &importer.history(None).unwrap()[0];
        assert_eq!(batch.source, SourceKind::CreativeSpreadsheet);
        assert!(importer.snapshot(&client.id).unwrap().creative_links.contains_key("Video A"));
    }

    #[test]
    fn test_failed_store_write_leaves_every_client_untouched() {
        let sol = ClientAccount::new("Tienda Sol", "EUR");
        let luna = ClientAccount::new("Tienda Luna", "EUR");
        let store = FlakyStore::new(MemoryStore::with_clients([sol.clone(), luna.clone()]));
        let importer = Importer::new(store, SchemaNormalizer::new().unwrap());
        let bytes = csv(&[
            "Tienda Sol;Verano;Video A;01/05/2024;25-34;female;10;100",
            "Tienda Luna;Verano;Video B;01/05/2024;25-34;female;20;200",
        ]);

        importer.store().set_failing(true);
        let first = importer.import_spreadsheet("dos.csv", &bytes, ImportOptions::default());
        assert!(matches!(first, Err(ImportError::Storage(_))));

        for client in [&sol, &luna] {
            assert_eq!(importer.snapshot(&client.id).unwrap().record_count(), 0);
            assert!(importer.store().processed_hashes(&client.id).unwrap().is_empty());
        }
        assert!(importer.history(None).unwrap().is_empty());
        assert!(importer.store().inner.events().is_empty());

        // Nothing half-written blocks the retry
        importer.store().set_failing(false);
        let results = merged(importer.import_spreadsheet("dos.csv", &bytes, ImportOptions::default()).unwrap());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.inserted_count == 1 && r.batch_id.is_some()));
        assert_eq!(importer.history(None).unwrap().len(), 2);
        assert_eq!(importer.store().inner.events().len(), 2);
    }

    #[test]
    fn test_failed_text_report_write_can_be_retried() {
        let client = ClientAccount::new("Tienda Sol", "EUR");
        let store = FlakyStore::new(MemoryStore::with_clients([client.clone()]));
        let importer = Importer::new(store, SchemaNormalizer::new().unwrap());
        let text = "| Métrica | Valor |\n|---|---|\n| Gasto | 10 € |\n";

        importer.store().set_failing(true);
        assert!(importer.import_text_report(&client.id, "r.txt", text.as_bytes()).is_err());
        assert!(importer.snapshot(&client.id).unwrap().reports.is_empty());
        assert!(importer.store().processed_hashes(&client.id).unwrap().is_empty());

        importer.store().set_failing(false);
        let result = importer.import_text_report(&client.id, "r.txt", text.as_bytes()).unwrap();
        assert!(result.batch_id.is_some());
    }

    #[test]
    fn test_failed_undo_keeps_batch_and_rows() {
        let client = ClientAccount::new("Tienda Sol", "EUR");
        let store = FlakyStore::new(MemoryStore::with_clients([client.clone()]));
        let importer = Importer::new(store, SchemaNormalizer::new().unwrap());
        let bytes = csv(&["Tienda Sol;Verano;A;01/05/2024;;;1;1"]);
        let results = merged(importer.import_spreadsheet("a.csv", &bytes, ImportOptions::default()).unwrap());
        let batch_id = results[0].batch_id.clone().unwrap();

        importer.store().set_failing(true);
        assert!(matches!(importer.undo(&batch_id), Err(ImportError::Storage(_))));
        assert_eq!(importer.snapshot(&client.id).unwrap().record_count(), 1);
        assert_eq!(importer.history(None).unwrap().len(), 1);
        assert_eq!(importer.store().processed_hashes(&client.id).unwrap().len(), 1);

        importer.store().set_failing(false);
        assert!(importer.undo(&batch_id).unwrap().success);
        assert!(importer.history(None).unwrap().is_empty());
    }

    #[test]
    fn test_client_locks_sorted_and_shared() {
        let locks = ClientLocks::new();
        let a = locks.handle("b");
        let handles = locks.handles(["c", "b", "a", "b"]);
        assert_eq!(handles.len(), 3);
        assert!(Arc::ptr_eq(&a, &handles[1]));
    }
}
