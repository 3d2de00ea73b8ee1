// 📝 Bitacora text report tokenizer
//
// A flat document with ad-hoc titles (bold lines, headings, ==== banners)
// followed by pipe tables. One bad cell only degrades that cell to text.
//
// State machine:
//   OutsideTable --(line starts with '|')--> InsideTable
//   InsideTable  --(any other line)-------> OutsideTable  (flush table)
//   end of input while InsideTable                         (flush table)

use crate::locale::parse_number;
use crate::schema::normalize_header;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// ============================================================================
// CELL VALUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMetricValue {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Period-over-period change as a fraction (`+12,3%` → 0.123)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Metric(ParsedMetricValue),
    Text(String),
}

impl CellValue {
    pub fn as_metric(&self) -> Option<&ParsedMetricValue> {
        match self {
            CellValue::Metric(m) => Some(m),
            CellValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Metric(_) => None,
        }
    }
}

static METRIC_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<pre>[€$£])?\s*",
        r"(?P<num>[-+\u{2212}]?\d[\d.,]*)\s*",
        r"(?P<unit>%|[xX]|s|€|\$|£|[A-Z]{3})?\s*",
        r"(?:\(\s*(?P<chg>[-+\u{2212}]?\d[\d.,]*)\s*%?\s*(?P<dir>[▲▼►▶→↑↓⬆⬇=●])?\s*\))?$",
    ))
    .expect("metric cell pattern is valid")
});

static INLINE_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[=\-*━─═]{3,}\s*(?P<title>.*?[[:alnum:]].*?)\s*[=\-*━─═]{3,}$")
        .expect("inline banner pattern is valid")
});

fn direction_of(glyph: &str) -> Option<Direction> {
    match glyph {
        "▲" | "↑" | "⬆" => Some(Direction::Up),
        "▼" | "↓" | "⬇" => Some(Direction::Down),
        "►" | "▶" | "→" | "=" | "●" => Some(Direction::Stable),
        _ => None,
    }
}

/// Parse one table cell; anything not shaped like a metric stays text
pub fn parse_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    let caps = match METRIC_CELL.captures(trimmed) {
        Some(caps) => caps,
        None => return CellValue::Text(trimmed.to_string()),
    };

    let num = caps.name("num").map(|m| m.as_str()).unwrap_or_default();
    let symbol = caps
        .name("pre")
        .or_else(|| caps.name("unit"))
        .map(|m| m.as_str().to_string());

    let change = caps.name("chg").map(|m| parse_number(m.as_str()) / 100.0);
    let direction = match (caps.name("dir"), change) {
        (Some(glyph), _) => direction_of(glyph.as_str()),
        (None, Some(c)) if c > 0.0 => Some(Direction::Up),
        (None, Some(c)) if c < 0.0 => Some(Direction::Down),
        (None, Some(_)) => Some(Direction::Stable),
        (None, None) => None,
    };

    CellValue::Metric(ParsedMetricValue {
        value: parse_number(num),
        symbol,
        change,
        direction,
    })
}

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTable {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, CellValue>>,
}

impl ReportTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell of a row by header, case-insensitive
    pub fn cell(&self, row: usize, header: &str) -> Option<&CellValue> {
        let wanted = normalize_header(header);
        let key = self.headers.iter().find(|h| normalize_header(h) == wanted)?;
        self.rows.get(row)?.get(key)
    }
}

#[derive(Default)]
struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    fn push_line(&mut self, line: &str) {
        let cells = split_cells(line);
        if is_separator_row(&cells) {
            return;
        }
        if self.headers.is_empty() {
            self.headers = cells;
        } else {
            self.rows.push(cells);
        }
    }

    fn build(self, title: String) -> Option<ReportTable> {
        if self.headers.is_empty() {
            return None;
        }

        let headers = self.headers;
        let rows = self
            .rows
            .into_iter()
            .map(|cells| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, header)| {
                        let raw = cells.get(i).map(String::as_str).unwrap_or("");
                        (header.clone(), parse_cell(raw))
                    })
                    .collect()
            })
            .collect();

        Some(ReportTable { title, headers, rows })
    }
}

fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim().trim_start_matches(':').trim_end_matches(':');
            !c.is_empty() && c.chars().all(|ch| ch == '-')
        })
}

// ============================================================================
// TITLES & METADATA
// ============================================================================

fn is_banner_rule(line: &str) -> bool {
    line.chars().count() >= 3 && line.chars().all(|c| "=-_*━─═".contains(c))
}

fn strip_markup(line: &str) -> String {
    line.replace("**", "").trim().trim_end_matches(':').trim().to_string()
}

/// Lines that are a title on their own
fn title_of(line: &str) -> Option<String> {
    if line.len() > 4 && line.starts_with("**") && line.ends_with("**") {
        let title = strip_markup(line);
        return Some(title).filter(|t| !t.is_empty());
    }

    if line.starts_with('#') {
        let title = strip_markup(line.trim_start_matches('#'));
        return Some(title).filter(|t| !t.is_empty());
    }

    INLINE_BANNER
        .captures(line)
        .and_then(|caps| caps.name("title"))
        .map(|m| strip_markup(m.as_str()))
        .filter(|t| !t.is_empty())
}

fn metadata_pair(line: &str) -> Option<(String, String)> {
    let clean = line.replace("**", "");
    let clean = clean.trim().trim_start_matches(['-', '•', '*']).trim();
    let (key, value) = clean.split_once(':')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() || value.is_empty() || key.chars().count() > 40 || key.contains("http") {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

// ============================================================================
// TOKENIZER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    OutsideTable,
    InsideTable,
}

/// Everything the tokenizer extracts, before named-table lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenizedDocument {
    pub metadata: BTreeMap<String, String>,
    pub tables: Vec<ReportTable>,
}

struct Tokenizer {
    state: State,
    builder: TableBuilder,
    title: Option<String>,
    prev_plain: Option<String>,
    awaiting_banner_title: bool,
    title_from_banner: bool,
    doc: TokenizedDocument,
}

impl Tokenizer {
    fn new() -> Self {
        Tokenizer {
            state: State::OutsideTable,
            builder: TableBuilder::default(),
            title: None,
            prev_plain: None,
            awaiting_banner_title: false,
            title_from_banner: false,
            doc: TokenizedDocument::default(),
        }
    }

    fn flush(&mut self) {
        let builder = std::mem::take(&mut self.builder);
        let title = self
            .title
            .take()
            .unwrap_or_else(|| format!("Table {}", self.doc.tables.len() + 1));
        if let Some(table) = builder.build(title) {
            self.doc.tables.push(table);
        }
    }

    fn set_title(&mut self, title: String) {
        self.title = Some(title);
        self.prev_plain = None;
        self.awaiting_banner_title = false;
    }

    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();

        if trimmed.starts_with('|') {
            if self.state == State::OutsideTable {
                self.state = State::InsideTable;
            }
            self.builder.push_line(trimmed);
            self.prev_plain = None;
            self.awaiting_banner_title = false;
            self.title_from_banner = false;
            return;
        }

        if self.state == State::InsideTable {
            self.flush();
            self.state = State::OutsideTable;
        }

        if trimmed.is_empty() {
            self.prev_plain = None;
            return;
        }

        if is_banner_rule(trimmed) {
            if self.title_from_banner {
                // closing rule of a ==== TITLE ==== block
                self.title_from_banner = false;
            } else if let Some(underlined) = self.prev_plain.take() {
                self.set_title(underlined);
            } else {
                self.awaiting_banner_title = true;
            }
            return;
        }

        if let Some(title) = title_of(trimmed) {
            self.set_title(title);
            self.title_from_banner = false;
            return;
        }

        if self.awaiting_banner_title {
            self.set_title(strip_markup(trimmed));
            self.title_from_banner = true;
            return;
        }

        self.title_from_banner = false;
        if let Some((key, value)) = metadata_pair(trimmed) {
            self.doc.metadata.entry(key).or_insert(value);
        }
        self.prev_plain = Some(strip_markup(trimmed));
    }

    fn finish(mut self) -> TokenizedDocument {
        if self.state == State::InsideTable {
            self.flush();
        }
        self.doc
    }
}

pub fn tokenize(text: &str) -> TokenizedDocument {
    let mut tokenizer = Tokenizer::new();
    for line in text.lines() {
        tokenizer.feed(line);
    }
    tokenizer.finish()
}

// ============================================================================
// NAMED TABLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    MainSummary,
    FunnelAnalysis,
    TopAds,
    TopAdSets,
    TopCampaigns,
    AudiencePerformance,
    RatioTrends,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Case-insensitive, accent-insensitive substring match on the title
pub fn classify_title(title: &str) -> Option<TableRole> {
    let t = normalize_header(title);

    // Rankings first: "Top anuncios por ratio ROAS" is a ranking, not a trend table
    if contains_any(&t, &["top", "mejores", "peores", "ranking", "bottom"]) {
        if contains_any(&t, &["ad set", "adset", "conjunto"]) {
            return Some(TableRole::TopAdSets);
        }
        if contains_any(&t, &["campaign", "campana"]) {
            return Some(TableRole::TopCampaigns);
        }
        if contains_any(&t, &["anuncio", "ads", "ad ", "creativ"]) || t.ends_with(" ad") {
            return Some(TableRole::TopAds);
        }
    }
    if contains_any(&t, &["funnel", "embudo"]) {
        return Some(TableRole::FunnelAnalysis);
    }
    if contains_any(&t, &["ratio", "tendencia", "trend"]) {
        return Some(TableRole::RatioTrends);
    }
    if contains_any(&t, &["audiencia", "audience", "demografi", "publico"]) {
        return Some(TableRole::AudiencePerformance);
    }
    if contains_any(&t, &["resumen", "summary", "overview", "general", "kpi"]) {
        return Some(TableRole::MainSummary);
    }
    None
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitacoraReport {
    pub metadata: BTreeMap<String, String>,
    pub main_summary_table: Option<ReportTable>,
    pub funnel_analysis_table: Option<ReportTable>,
    pub top_ads_tables: Vec<ReportTable>,
    pub top_ad_sets_tables: Vec<ReportTable>,
    pub top_campaigns_tables: Vec<ReportTable>,
    pub audience_performance_table: Option<ReportTable>,
    pub ratio_trends_table: Option<ReportTable>,
    /// Every table in document order, named or not
    pub tables: Vec<ReportTable>,
}

impl BitacoraReport {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// Tokenize a bitacora and pick out the tables the dashboard knows by name
pub fn parse_report(text: &str) -> BitacoraReport {
    let doc = tokenize(text);
    let mut report = BitacoraReport {
        metadata: doc.metadata,
        ..Default::default()
    };

    for table in &doc.tables {
        match classify_title(&table.title) {
            Some(TableRole::MainSummary) if report.main_summary_table.is_none() => {
                report.main_summary_table = Some(table.clone());
            }
            Some(TableRole::FunnelAnalysis) if report.funnel_analysis_table.is_none() => {
                report.funnel_analysis_table = Some(table.clone());
            }
            Some(TableRole::AudiencePerformance) if report.audience_performance_table.is_none() => {
                report.audience_performance_table = Some(table.clone());
            }
            Some(TableRole::RatioTrends) if report.ratio_trends_table.is_none() => {
                report.ratio_trends_table = Some(table.clone());
            }
            Some(TableRole::TopAds) => report.top_ads_tables.push(table.clone()),
            Some(TableRole::TopAdSets) => report.top_ad_sets_tables.push(table.clone()),
            Some(TableRole::TopCampaigns) => report.top_campaigns_tables.push(table.clone()),
            _ => {}
        }
    }

    report.tables = doc.tables;
    report
}

// ============================================================================
// TESTS
// ============================================================================
