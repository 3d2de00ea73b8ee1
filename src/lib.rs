// Campaign Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod locale;         // Number/date parsing across European and US conventions
pub mod error;
pub mod schema;         // Bilingual header dictionary + normalizer
pub mod parser;         // Sheet readers and row parsers
pub mod bitacora;       // Text report tokenizer
pub mod records;
pub mod deduplication;  // File hashes, row keys, processed-file ledger
pub mod entities;
pub mod gate;           // New-entity gate
pub mod merge;          // Incremental merge + undo
pub mod aggregation;    // Rollups, funnel, period comparison
pub mod store;
pub mod db;             // SQLite store + audit events
pub mod importer;

// Re-export commonly used types
pub use locale::{normalize_day, parse_count, parse_date, parse_number};
pub use error::{DictionaryError, ImportError, RequiredConcept, Result};
pub use schema::{
    Field, HeaderDictionary, NormalizedSheet, SchemaKind, SchemaNormalizer, HEADER_DICTIONARY,
};
pub use parser::{
    read_sheet, Cell, CreativeLinkParser, ExportParser, PerformanceParser, RawSheet, SourceKind,
};
pub use bitacora::{
    parse_cell, parse_report, BitacoraReport, CellValue, Direction, ParsedMetricValue, ReportTable,
};
pub use records::{ClientDataset, CreativeLink, DeliveryStatus, PerformanceRecord};
pub use deduplication::{file_hash, record_key, DeduplicationEngine, ProcessedFileLedger};
pub use entities::{ClientAccount, ClientRegistry};
pub use gate::{GateDecision, NewEntityGate};
pub use merge::{ImportBatch, MergeEngine, MergeResult, UndoData, UndoOutcome};
pub use aggregation::{
    aggregate_by_ad, build_funnel, compare_periods, summarize_account, AccountSummary,
    AggregatedAdPerformance, AggregationQuery, Change, DateRange, FunnelStage, FunnelStep,
    MetricChange, MetricTotals, PeriodComparison,
};
pub use store::{ClientChange, Event, HistoryChange, MemoryStore, Store};
pub use db::{get_events_for_entity, insert_event, setup_database, SqliteStore};
pub use importer::{ClientMergeResult, ImportOptions, ImportOutcome, Importer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
