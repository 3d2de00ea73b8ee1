// 🏗️ Parser Framework
// Raw export bytes → RawSheet → canonical rows → records
//
// Two spreadsheet sources (ads platform, creative-linking tool) share one
// sheet reader; the text report has its own tokenizer in `bitacora`.

use crate::error::ImportError;
use crate::locale::{normalize_day, parse_count, parse_number};
use crate::records::{CreativeLink, DeliveryStatus, PerformanceRecord};
use crate::schema::{CanonicalRow, Field, NormalizedSheet, SchemaKind};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceKind - which export an import batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    AdsSpreadsheet,
    CreativeSpreadsheet,
    TextReport,
}

impl SourceKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceKind::AdsSpreadsheet => "Ads performance spreadsheet",
            SourceKind::CreativeSpreadsheet => "Creative links spreadsheet",
            SourceKind::TextReport => "Bitacora text report",
        }
    }

    /// Short code, also the value stored in the database
    pub fn code(&self) -> &str {
        match self {
            SourceKind::AdsSpreadsheet => "ads",
            SourceKind::CreativeSpreadsheet => "creatives",
            SourceKind::TextReport => "text",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ads" => Some(SourceKind::AdsSpreadsheet),
            "creatives" => Some(SourceKind::CreativeSpreadsheet),
            "text" => Some(SourceKind::TextReport),
            _ => None,
        }
    }
}

impl From<SchemaKind> for SourceKind {
    fn from(kind: SchemaKind) -> Self {
        match kind {
            SchemaKind::Performance => SourceKind::AdsSpreadsheet,
            SchemaKind::CreativeLinks => SourceKind::CreativeSpreadsheet,
        }
    }
}

/// One spreadsheet cell, typed as far as the file format allows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }

    /// Numbers from XLSX are taken as-is; text goes through the locale parser
    pub fn as_number(&self) -> f64 {
        match self {
            Cell::Empty => 0.0,
            Cell::Text(s) => parse_number(s),
            Cell::Number(n) if n.is_finite() => *n,
            Cell::Number(_) => 0.0,
        }
    }

    pub fn as_count(&self) -> u64 {
        match self {
            Cell::Text(s) => parse_count(s),
            other => {
                let value = other.as_number();
                if value <= 0.0 {
                    0
                } else {
                    value.round() as u64
                }
            }
        }
    }
}

/// Header row plus data rows, as read from the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

// ============================================================================
// SHEET READERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Workbook,
}

/// Detect the container format from magic bytes, then the file extension
pub fn detect_format(filename: &str, bytes: &[u8]) -> SheetFormat {
    const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
    const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        return SheetFormat::Workbook;
    }

    let lower = filename.to_lowercase();
    if lower.ends_with(".xlsx") || lower.ends_with(".xls") || lower.ends_with(".ods") {
        SheetFormat::Workbook
    } else {
        SheetFormat::Csv
    }
}

pub fn read_sheet(filename: &str, bytes: &[u8]) -> Result<RawSheet, ImportError> {
    match detect_format(filename, bytes) {
        SheetFormat::Csv => read_csv(bytes),
        SheetFormat::Workbook => read_workbook(bytes),
    }
}

/// Pick `;`, tab or `,` by counting them on the header line
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);
    let count = |d: u8| first_line.iter().filter(|b| **b == d).count();

    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|d| (count(*d), *d == b','))
        .unwrap_or(b',')
}

pub fn read_csv(bytes: &[u8]) -> Result<RawSheet, ImportError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(bytes))
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .byte_headers()
        .map_err(|e| ImportError::UnreadableFile(format!("CSV header: {}", e)))?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (line_num, result) in reader.byte_records().enumerate() {
        let record = result.map_err(|e| {
            ImportError::UnreadableFile(format!("CSV line {}: {}", line_num + 2, e))
        })?;
        let row = record
            .iter()
            .map(|field| {
                let text = String::from_utf8_lossy(field).trim().to_string();
                if text.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(text)
                }
            })
            .collect();
        rows.push(row);
    }

    Ok(RawSheet { headers, rows })
}

/// First worksheet of an XLSX/XLS/ODS workbook
pub fn read_workbook(bytes: &[u8]) -> Result<RawSheet, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::UnreadableFile(format!("workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ImportError::UnreadableFile("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ImportError::UnreadableFile(format!("sheet {}: {}", sheet_name, e)))?;

    let mut rows_iter = range.rows();
    let headers = match rows_iter.next() {
        Some(row) => row.iter().map(|cell| workbook_cell(cell).as_text()).collect(),
        None => Vec::new(),
    };
    let rows = rows_iter
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();

    Ok(RawSheet { headers, rows })
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.trim().to_string()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => match excel_serial_to_date(dt.as_f64()) {
            Some(date) => Cell::Text(date.format("%Y-%m-%d").to_string()),
            None => Cell::Empty,
        },
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
        other => Cell::Text(other.to_string()),
    }
}

/// Serial of 9999-12-31, the last day Excel can display
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Excel serial day (1900 system, with the 1900 leap-year quirk) → date
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.floor() as u64))
}

// ============================================================================
// ROW PARSERS
// ============================================================================

/// One parsed spreadsheet row, still unattached to a client
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow<T> {
    pub account_name: String,
    pub item: T,
}

/// ExportParser - canonical rows → typed items for one export kind
pub trait ExportParser: Send + Sync {
    type Item;

    fn source_kind(&self) -> SourceKind;

    /// Rows that cannot describe an item are dropped, never errored
    fn parse_row(&self, row: &CanonicalRow) -> Option<ParsedRow<Self::Item>>;

    fn parse_rows(&self, sheet: &NormalizedSheet) -> Vec<ParsedRow<Self::Item>> {
        let parsed: Vec<_> = sheet.rows.iter().filter_map(|row| self.parse_row(row)).collect();
        let dropped = sheet.rows.len() - parsed.len();
        if dropped > 0 {
            debug!(dropped, source = self.source_kind().code(), "rows without identity dropped");
        }
        parsed
    }
}

fn text(row: &CanonicalRow, field: Field) -> String {
    row.get(&field).map(Cell::as_text).unwrap_or_default()
}

fn number(row: &CanonicalRow, field: Field) -> f64 {
    row.get(&field).map(Cell::as_number).unwrap_or(0.0)
}

fn count(row: &CanonicalRow, field: Field) -> u64 {
    row.get(&field).map(Cell::as_count).unwrap_or(0)
}

fn optional_text(row: &CanonicalRow, field: Field) -> Option<String> {
    Some(text(row, field)).filter(|s| !s.is_empty())
}

/// Ads platform export (spreadsheet-A)
pub struct PerformanceParser;

impl PerformanceParser {
    pub fn new() -> Self {
        PerformanceParser
    }
}

impl Default for PerformanceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportParser for PerformanceParser {
    type Item = PerformanceRecord;

    fn source_kind(&self) -> SourceKind {
        SourceKind::AdsSpreadsheet
    }

    fn parse_row(&self, row: &CanonicalRow) -> Option<ParsedRow<PerformanceRecord>> {
        let account_name = text(row, Field::AccountName);

        // Aggregated exports have no per-day column, only the report window
        let raw_day = optional_text(row, Field::Day)
            .or_else(|| optional_text(row, Field::ReportStart))
            .unwrap_or_default();
        let day = normalize_day(&raw_day);
        let ad_name = text(row, Field::AdName);

        if ad_name.is_empty() && day.is_empty() {
            return None;
        }

        let mut record = PerformanceRecord::new(
            "",
            account_name.clone(),
            day,
            text(row, Field::CampaignName),
            ad_name,
            text(row, Field::Age),
            text(row, Field::Gender),
        );

        record.ad_set_name = text(row, Field::AdSetName);
        record.spend = number(row, Field::Spend);
        record.impressions = count(row, Field::Impressions);
        record.reach = count(row, Field::Reach);
        record.frequency = number(row, Field::Frequency);
        record.clicks = count(row, Field::Clicks);
        record.landing_page_views = count(row, Field::LandingPageViews);
        record.purchases = count(row, Field::Purchases);
        record.purchase_value = number(row, Field::PurchaseValue);
        record.attention = count(row, Field::Attention);
        record.interest = count(row, Field::Interest);
        record.desire = count(row, Field::Desire);
        record.add_to_cart = count(row, Field::AddToCart);
        record.checkout_initiated = count(row, Field::CheckoutInitiated);
        record.video_avg_play_time = number(row, Field::VideoAvgPlayTime);
        record.campaign_delivery = DeliveryStatus::parse(&text(row, Field::CampaignDelivery));
        record.ad_set_delivery = DeliveryStatus::parse(&text(row, Field::AdSetDelivery));
        record.ad_delivery = DeliveryStatus::parse(&text(row, Field::AdDelivery));

        Some(ParsedRow {
            account_name,
            item: record,
        })
    }
}

/// Creative-linking tool export (spreadsheet-B)
pub struct CreativeLinkParser;

impl CreativeLinkParser {
    pub fn new() -> Self {
        CreativeLinkParser
    }
}

impl Default for CreativeLinkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportParser for CreativeLinkParser {
    type Item = CreativeLink;

    fn source_kind(&self) -> SourceKind {
        SourceKind::CreativeSpreadsheet
    }

    fn parse_row(&self, row: &CanonicalRow) -> Option<ParsedRow<CreativeLink>> {
        let ad_name = optional_text(row, Field::AdName)?;

        let analysis = optional_text(row, Field::CreativeAnalysis).map(|raw| {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        });

        Some(ParsedRow {
            account_name: text(row, Field::AccountName),
            item: CreativeLink {
                ad_name,
                thumbnail_url: optional_text(row, Field::ThumbnailUrl),
                preview_link: optional_text(row, Field::PreviewLink),
                analysis,
            },
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
