use crate::bitacora::BitacoraReport;
use crate::deduplication::ProcessedFileLedger;
use crate::entities::ClientAccount;
use crate::merge::{ImportBatch, UndoData};
use crate::parser::SourceKind;
use crate::records::{ClientDataset, CreativeLink, PerformanceRecord};
use crate::store::{ClientChange, Event, HistoryChange, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Clients
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            external_name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Per-client dataset (rows stored as JSON, keyed for dedup)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS performance_records (
            client_id TEXT NOT NULL,
            unique_id TEXT NOT NULL,
            day TEXT NOT NULL,
            ad_name TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (client_id, unique_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS creative_links (
            client_id TEXT NOT NULL,
            ad_name TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (client_id, ad_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports (
            client_id TEXT NOT NULL,
            report_id TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (client_id, report_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Ledger & import history
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_files (
            client_id TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            PRIMARY KEY (client_id, file_hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_batches (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            source TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            client_id TEXT NOT NULL,
            description TEXT NOT NULL,
            undo_keys TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_day ON performance_records(client_id, day)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_client ON import_batches(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: parse_json(5, &data_json)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// WRITES (always run inside the caller's transaction)
// ============================================================================

/// Replace one client's rows, links and reports
fn write_dataset(conn: &Connection, client_id: &str, dataset: &ClientDataset) -> Result<()> {
    for table in ["performance_records", "creative_links", "reports"] {
        conn.execute(
            &format!("DELETE FROM {} WHERE client_id = ?1", table),
            params![client_id],
        )?;
    }

    let mut insert = conn.prepare(
        "INSERT INTO performance_records (client_id, unique_id, day, ad_name, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for record in dataset.records.values() {
        insert.execute(params![
            client_id,
            record.unique_id,
            record.day,
            record.ad_name,
            serde_json::to_string(record)?,
        ])?;
    }

    let mut insert =
        conn.prepare("INSERT INTO creative_links (client_id, ad_name, data) VALUES (?1, ?2, ?3)")?;
    for link in dataset.creative_links.values() {
        insert.execute(params![client_id, link.ad_name, serde_json::to_string(link)?])?;
    }

    let mut insert =
        conn.prepare("INSERT INTO reports (client_id, report_id, data) VALUES (?1, ?2, ?3)")?;
    for (id, report) in &dataset.reports {
        insert.execute(params![client_id, id, serde_json::to_string(report)?])?;
    }

    Ok(())
}

fn write_ledger(conn: &Connection, client_id: &str, ledger: &ProcessedFileLedger) -> Result<()> {
    conn.execute(
        "DELETE FROM processed_files WHERE client_id = ?1",
        params![client_id],
    )?;
    let mut insert =
        conn.prepare("INSERT INTO processed_files (client_id, file_hash) VALUES (?1, ?2)")?;
    for hash in ledger.hashes() {
        insert.execute(params![client_id, hash])?;
    }
    Ok(())
}

/// Append after the newest batch
fn append_batch(conn: &Connection, batch: &ImportBatch) -> Result<()> {
    conn.execute(
        "INSERT INTO import_batches (
            id, seq, timestamp, source, file_hash, client_id, description, undo_keys
        )
        SELECT ?1, COALESCE(MAX(seq), -1) + 1, ?2, ?3, ?4, ?5, ?6, ?7 FROM import_batches",
        params![
            batch.id,
            batch.timestamp.to_rfc3339(),
            batch.source.code(),
            batch.file_hash,
            batch.client_id,
            batch.description,
            serde_json::to_string(&batch.undo.keys)?,
        ],
    )
    .with_context(|| format!("Failed to record import batch {}", batch.id))?;
    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to set up database schema")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    pub fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        get_events_for_entity(&conn, entity_type, entity_id)
    }

    pub fn record_count(&self, client_id: &str) -> Result<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM performance_records WHERE client_id = ?1",
            params![client_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Store for SqliteStore {
    fn load_dataset(&self, client_id: &str) -> Result<ClientDataset> {
        let conn = self.conn()?;
        let mut dataset = ClientDataset::new();

        let mut stmt =
            conn.prepare("SELECT data FROM performance_records WHERE client_id = ?1")?;
        let rows = stmt.query_map(params![client_id], |row| {
            let json: String = row.get(0)?;
            parse_json::<PerformanceRecord>(0, &json)
        })?;
        for record in rows {
            let record = record.context("Failed to decode performance record")?;
            dataset.records.insert(record.unique_id.clone(), record);
        }

        let mut stmt = conn.prepare("SELECT data FROM creative_links WHERE client_id = ?1")?;
        let rows = stmt.query_map(params![client_id], |row| {
            let json: String = row.get(0)?;
            parse_json::<CreativeLink>(0, &json)
        })?;
        for link in rows {
            let link = link.context("Failed to decode creative link")?;
            dataset.creative_links.insert(link.ad_name.clone(), link);
        }

        let mut stmt =
            conn.prepare("SELECT report_id, data FROM reports WHERE client_id = ?1")?;
        let rows = stmt.query_map(params![client_id], |row| {
            let id: String = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((id, parse_json::<BitacoraReport>(1, &json)?))
        })?;
        for report in rows {
            let (id, report) = report.context("Failed to decode report")?;
            dataset.reports.insert(id, report);
        }

        Ok(dataset)
    }

    fn processed_hashes(&self, client_id: &str) -> Result<ProcessedFileLedger> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT file_hash FROM processed_files WHERE client_id = ?1")?;
        let hashes = stmt
            .query_map(params![client_id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ProcessedFileLedger::from_hashes(client_id, hashes))
    }

    fn import_history(&self) -> Result<Vec<ImportBatch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, source, file_hash, client_id, description, undo_keys
             FROM import_batches
             ORDER BY seq",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let timestamp: String = row.get(1)?;
                let source: String = row.get(2)?;
                let keys: String = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    parse_timestamp(1, &timestamp)?,
                    source,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    parse_json::<Vec<String>>(6, &keys)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, timestamp, source, file_hash, client_id, description, keys)| -> Result<ImportBatch> {
                let source = SourceKind::from_code(&source)
                    .ok_or_else(|| anyhow!("unknown import source '{}' in batch {}", source, id))?;
                Ok(ImportBatch {
                    id,
                    timestamp,
                    source,
                    file_hash,
                    undo: UndoData {
                        source,
                        keys,
                        client_id: client_id.clone(),
                    },
                    client_id,
                    description,
                })
            })
            .collect()
    }

    fn clients(&self) -> Result<Vec<ClientAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, currency, external_name, created_at FROM clients ORDER BY name",
        )?;
        let clients = stmt
            .query_map([], |row| {
                let created_at: String = row.get(4)?;
                Ok(ClientAccount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    currency: row.get(2)?,
                    external_name: row.get(3)?,
                    created_at: parse_timestamp(4, &created_at)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clients)
    }

    fn save_client(&self, client: &ClientAccount) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO clients (id, name, currency, external_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                currency = excluded.currency,
                external_name = excluded.external_name",
            params![
                client.id,
                client.name,
                client.currency,
                client.external_name,
                client.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn apply_changes(&self, changes: &[ClientChange]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for change in changes {
            if let Some(dataset) = &change.dataset {
                write_dataset(&tx, &change.client_id, dataset)?;
            }
            write_ledger(&tx, &change.client_id, &change.ledger)?;
            match &change.history {
                HistoryChange::Unchanged => {}
                HistoryChange::Append(batch) => append_batch(&tx, batch)?,
                HistoryChange::Remove(batch_id) => {
                    tx.execute("DELETE FROM import_batches WHERE id = ?1", params![batch_id])?;
                }
            }
            if let Some(event) = &change.event {
                insert_event(&tx, event)?;
            }
        }

        tx.commit().context("Failed to commit import changes")?;
        Ok(())
    }
}
