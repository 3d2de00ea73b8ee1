// 📐 Shape Layer - Schema Normalization
// Maps Spanish/English spreadsheet headers onto canonical fields.
//
// The dictionary is a literal; HeaderDictionary::builtin() validates it and
// the binaries build it at startup, so a broken entry never reaches a file.

use crate::error::{DictionaryError, ImportError, RequiredConcept};
use crate::parser::{Cell, RawSheet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    AccountName,
    CampaignName,
    AdSetName,
    AdName,
    Day,
    ReportStart,
    ReportEnd,
    Age,
    Gender,
    Spend,
    Impressions,
    Reach,
    Frequency,
    Clicks,
    LandingPageViews,
    Purchases,
    PurchaseValue,
    Attention,
    Interest,
    Desire,
    AddToCart,
    CheckoutInitiated,
    VideoAvgPlayTime,
    CampaignDelivery,
    AdSetDelivery,
    AdDelivery,
    ThumbnailUrl,
    PreviewLink,
    CreativeAnalysis,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::AccountName => "accountName",
            Field::CampaignName => "campaignName",
            Field::AdSetName => "adSetName",
            Field::AdName => "adName",
            Field::Day => "day",
            Field::ReportStart => "reportStart",
            Field::ReportEnd => "reportEnd",
            Field::Age => "age",
            Field::Gender => "gender",
            Field::Spend => "spend",
            Field::Impressions => "impressions",
            Field::Reach => "reach",
            Field::Frequency => "frequency",
            Field::Clicks => "clicks",
            Field::LandingPageViews => "landingPageViews",
            Field::Purchases => "purchases",
            Field::PurchaseValue => "purchaseValue",
            Field::Attention => "attention",
            Field::Interest => "interest",
            Field::Desire => "desire",
            Field::AddToCart => "addToCart",
            Field::CheckoutInitiated => "checkoutInitiated",
            Field::VideoAvgPlayTime => "videoAvgPlayTime",
            Field::CampaignDelivery => "campaignDelivery",
            Field::AdSetDelivery => "adSetDelivery",
            Field::AdDelivery => "adDelivery",
            Field::ThumbnailUrl => "thumbnailUrl",
            Field::PreviewLink => "previewLink",
            Field::CreativeAnalysis => "creativeAnalysis",
        }
    }

    /// Fields only a performance export carries
    pub fn is_performance_metric(&self) -> bool {
        matches!(
            self,
            Field::Spend
                | Field::Impressions
                | Field::Reach
                | Field::Frequency
                | Field::Clicks
                | Field::LandingPageViews
                | Field::Purchases
                | Field::PurchaseValue
                | Field::Attention
                | Field::Interest
                | Field::Desire
                | Field::AddToCart
                | Field::CheckoutInitiated
                | Field::VideoAvgPlayTime
        )
    }

    pub fn is_creative(&self) -> bool {
        matches!(self, Field::ThumbnailUrl | Field::PreviewLink)
    }
}

// ============================================================================
// BILINGUAL HEADER DICTIONARY
// ============================================================================

/// Canonical field → accepted header strings (Spanish first, then English).
/// Entries are normalized with `normalize_header` before lookup.
pub const HEADER_DICTIONARY: &[(Field, &[&str])] = &[
    (Field::AccountName, &["nombre de la cuenta", "cuenta", "account name", "account"]),
    (Field::CampaignName, &["nombre de la campaña", "campaña", "campaign name", "campaign"]),
    (
        Field::AdSetName,
        &["nombre del conjunto de anuncios", "conjunto de anuncios", "ad set name", "ad set"],
    ),
    (Field::AdName, &["nombre del anuncio", "anuncio", "ad name", "ad"]),
    (Field::Day, &["día", "fecha", "day", "date"]),
    (Field::ReportStart, &["inicio del informe", "fecha de inicio", "reporting starts"]),
    (Field::ReportEnd, &["fin del informe", "fecha de finalización", "reporting ends"]),
    (Field::Age, &["edad", "age"]),
    (Field::Gender, &["sexo", "género", "gender"]),
    (Field::Spend, &["importe gastado", "gasto", "amount spent", "spend"]),
    (Field::Impressions, &["impresiones", "impressions"]),
    (Field::Reach, &["alcance", "reach"]),
    (Field::Frequency, &["frecuencia", "frequency"]),
    (Field::Clicks, &["clics en el enlace", "clics", "link clicks", "clicks"]),
    (
        Field::LandingPageViews,
        &["visitas a la página de destino", "landing page views"],
    ),
    (Field::Purchases, &["compras", "purchases"]),
    (
        Field::PurchaseValue,
        &[
            "valor de conversión de compras",
            "valor de las compras",
            "purchase conversion value",
            "purchases conversion value",
        ],
    ),
    (Field::Attention, &["atención", "attention"]),
    (Field::Interest, &["interés", "interest"]),
    (Field::Desire, &["deseo", "desire"]),
    (
        Field::AddToCart,
        &["artículos añadidos al carrito", "añadidos al carrito", "adds to cart", "add to cart"],
    ),
    (
        Field::CheckoutInitiated,
        &["pagos iniciados", "checkouts initiated", "checkout initiated"],
    ),
    (
        Field::VideoAvgPlayTime,
        &[
            "tiempo medio de reproducción del vídeo",
            "tiempo de reproducción promedio del video",
            "video average play time",
        ],
    ),
    (Field::CampaignDelivery, &["entrega de la campaña", "campaign delivery"]),
    (
        Field::AdSetDelivery,
        &["entrega del conjunto de anuncios", "ad set delivery"],
    ),
    (Field::AdDelivery, &["entrega del anuncio", "ad delivery"]),
    (
        Field::ThumbnailUrl,
        &["url de la miniatura", "miniatura", "thumbnail url", "thumbnail"],
    ),
    (
        Field::PreviewLink,
        &["enlace de vista previa", "vista previa", "preview link", "preview"],
    ),
    (Field::CreativeAnalysis, &["análisis", "analysis"]),
];

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Lowercase, fold accents, drop trailing `(EUR)`-style suffixes, collapse spaces
pub fn normalize_header(raw: &str) -> String {
    let mut header: String = raw
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .collect();

    loop {
        let trimmed = header.trim_end();
        if trimmed.ends_with(')') {
            if let Some(open) = trimmed.rfind('(') {
                header = trimmed[..open].to_string();
                continue;
            }
        }
        break;
    }

    header.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct HeaderDictionary {
    lookup: HashMap<String, Field>,
}

impl HeaderDictionary {
    /// The built-in Spanish/English dictionary, validated
    pub fn builtin() -> Result<Self, DictionaryError> {
        Self::from_entries(HEADER_DICTIONARY)
    }

    pub fn from_entries(entries: &[(Field, &[&str])]) -> Result<Self, DictionaryError> {
        let mut lookup: HashMap<String, Field> = HashMap::new();

        for (field, variants) in entries {
            for variant in variants.iter() {
                let key = normalize_header(variant);
                if key.is_empty() {
                    return Err(DictionaryError::EmptyVariant {
                        field: field.name().to_string(),
                    });
                }
                match lookup.get(&key) {
                    Some(existing) if existing != field => {
                        return Err(DictionaryError::AmbiguousHeader {
                            header: key,
                            first: existing.name().to_string(),
                            second: field.name().to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        lookup.insert(key, *field);
                    }
                }
            }
        }

        Ok(HeaderDictionary { lookup })
    }

    pub fn lookup(&self, raw_header: &str) -> Option<Field> {
        self.lookup.get(&normalize_header(raw_header)).copied()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

// ============================================================================
// SCHEMA KIND & NORMALIZED OUTPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaKind {
    /// Ads platform export (spreadsheet-A)
    Performance,
    /// Creative-linking tool export (spreadsheet-B)
    CreativeLinks,
}

pub type CanonicalRow = BTreeMap<Field, Cell>;

#[derive(Debug, Clone)]
pub struct NormalizedSheet {
    pub kind: SchemaKind,
    pub fields: BTreeSet<Field>,
    pub rows: Vec<CanonicalRow>,
}

// ============================================================================
// SCHEMA NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchemaNormalizer {
    dictionary: HeaderDictionary,
}

impl SchemaNormalizer {
    pub fn new() -> Result<Self, DictionaryError> {
        Ok(SchemaNormalizer {
            dictionary: HeaderDictionary::builtin()?,
        })
    }

    pub fn with_dictionary(dictionary: HeaderDictionary) -> Self {
        SchemaNormalizer { dictionary }
    }

    /// Column index → canonical field. A field claimed by two columns keeps the first.
    pub fn map_headers(&self, headers: &[String]) -> Vec<Option<Field>> {
        let mut claimed = BTreeSet::new();
        headers
            .iter()
            .map(|header| match self.dictionary.lookup(header) {
                Some(field) if claimed.insert(field) => Some(field),
                Some(field) => {
                    debug!(header = %header, field = field.name(), "duplicate column for field, ignored");
                    None
                }
                None => {
                    if !header.trim().is_empty() {
                        debug!(header = %header, "unmapped header dropped");
                    }
                    None
                }
            })
            .collect()
    }

    pub fn detect_kind(fields: &BTreeSet<Field>) -> SchemaKind {
        let has_creative = fields.iter().any(Field::is_creative);
        let has_metric = fields.iter().any(Field::is_performance_metric);
        if has_creative && !has_metric {
            SchemaKind::CreativeLinks
        } else {
            SchemaKind::Performance
        }
    }

    pub fn validate(kind: SchemaKind, fields: &BTreeSet<Field>) -> Result<(), ImportError> {
        if !fields.contains(&Field::AccountName) {
            return Err(ImportError::SchemaValidation {
                missing: RequiredConcept::AccountName,
            });
        }

        match kind {
            SchemaKind::Performance => {
                if !fields.contains(&Field::AdName) && !fields.contains(&Field::Day) {
                    return Err(ImportError::SchemaValidation {
                        missing: RequiredConcept::AdNameOrDay,
                    });
                }
            }
            SchemaKind::CreativeLinks => {
                if !fields.contains(&Field::AdName) {
                    return Err(ImportError::SchemaValidation {
                        missing: RequiredConcept::AdName,
                    });
                }
            }
        }

        Ok(())
    }

    /// Re-key every row into canonical fields, validating the header set first
    pub fn normalize(&self, sheet: &RawSheet) -> Result<NormalizedSheet, ImportError> {
        let mapping = self.map_headers(&sheet.headers);
        let fields: BTreeSet<Field> = mapping.iter().flatten().copied().collect();

        let kind = Self::detect_kind(&fields);
        Self::validate(kind, &fields)?;

        let rows = sheet
            .rows
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .map(|row| {
                mapping
                    .iter()
                    .zip(row.iter())
                    .filter_map(|(field, cell)| field.map(|f| (f, cell.clone())))
                    .collect::<CanonicalRow>()
            })
            .collect();

        Ok(NormalizedSheet { kind, fields, rows })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Cell::Text(c.to_string())).collect())
                .collect(),
        }
    }

    #[test]
    fn test_builtin_dictionary_is_valid() {
        let dictionary = HeaderDictionary::builtin().unwrap();
        assert!(dictionary.len() > 50);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Importe gastado (EUR)"), "importe gastado");
        assert_eq!(normalize_header("  Nombre   de la  Campaña "), "nombre de la campana");
        assert_eq!(normalize_header("\u{feff}Día"), "dia");
        assert_eq!(normalize_header("Clicks (all) (USD)"), "clicks");
    }

    #[test]
    fn test_lookup_both_languages() {
        let dictionary = HeaderDictionary::builtin().unwrap();
        assert_eq!(
            dictionary.lookup("Valor de conversión de compras"),
            Some(Field::PurchaseValue)
        );
        assert_eq!(
            dictionary.lookup("Purchase conversion value"),
            Some(Field::PurchaseValue)
        );
        assert_eq!(dictionary.lookup("Importe gastado (EUR)"), Some(Field::Spend));
        assert_eq!(dictionary.lookup("Amount spent (USD)"), Some(Field::Spend));
        assert_eq!(dictionary.lookup("Dia"), Some(Field::Day));
        assert_eq!(dictionary.lookup("CPM (coste por mil impresiones)"), None);
    }

    #[test]
    fn test_ambiguous_dictionary_rejected() {
        let entries: &[(Field, &[&str])] = &[
            (Field::Clicks, &["clics"]),
            (Field::Purchases, &["Clics"]),
        ];
        let err = HeaderDictionary::from_entries(entries).unwrap_err();
        assert!(matches!(err, DictionaryError::AmbiguousHeader { .. }));
    }

    #[test]
    fn test_empty_variant_rejected() {
        let entries: &[(Field, &[&str])] = &[(Field::Clicks, &["  "])];
        let err = HeaderDictionary::from_entries(entries).unwrap_err();
        assert!(matches!(err, DictionaryError::EmptyVariant { .. }));
    }

    #[test]
    fn test_normalize_rekeys_and_drops_unmapped() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(
            &["Nombre de la cuenta", "Nombre del anuncio", "Día", "CPM", "Importe gastado (EUR)"],
            &[&["Tienda Sol", "Video A", "01/05/2024", "12,3", "10,50"]],
        );

        let normalized = normalizer.normalize(&raw).unwrap();
        assert_eq!(normalized.kind, SchemaKind::Performance);
        assert_eq!(normalized.rows.len(), 1);

        let row = &normalized.rows[0];
        assert_eq!(row.len(), 4);
        assert_eq!(row.get(&Field::AdName).unwrap().as_text(), "Video A");
        assert_eq!(row.get(&Field::Spend).unwrap().as_number(), 10.5);
    }

    #[test]
    fn test_missing_account_names_concept() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(&["Ad name", "Day", "Spend"], &[]);
        let err = normalizer.normalize(&raw).unwrap_err();
        match err {
            ImportError::SchemaValidation { missing } => {
                assert_eq!(missing, RequiredConcept::AccountName);
                assert_eq!(missing.to_string(), "account name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_ad_and_day() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(&["Account name", "Impressions"], &[]);
        let err = normalizer.normalize(&raw).unwrap_err();
        assert!(matches!(
            err,
            ImportError::SchemaValidation {
                missing: RequiredConcept::AdNameOrDay
            }
        ));
    }

    #[test]
    fn test_account_and_day_is_enough() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(&["Account name", "Day", "Impressions"], &[&["A", "2024-01-01", "5"]]);
        assert!(normalizer.normalize(&raw).is_ok());
    }

    #[test]
    fn test_detect_creative_links_sheet() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(
            &["Cuenta", "Nombre del anuncio", "URL de la miniatura", "Enlace de vista previa"],
            &[&["Tienda Sol", "Video A", "https://cdn/x.jpg", "https://fb.me/x"]],
        );
        let normalized = normalizer.normalize(&raw).unwrap();
        assert_eq!(normalized.kind, SchemaKind::CreativeLinks);
    }

    #[test]
    fn test_creative_sheet_requires_ad_name() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(&["Account", "Thumbnail URL", "Day"], &[]);
        let err = normalizer.normalize(&raw).unwrap_err();
        assert!(matches!(
            err,
            ImportError::SchemaValidation {
                missing: RequiredConcept::AdName
            }
        ));
    }

    #[test]
    fn test_blank_rows_skipped() {
        let normalizer = SchemaNormalizer::new().unwrap();
        let raw = sheet(
            &["Account name", "Ad name"],
            &[&["A", "Ad 1"], &["", ""], &["A", "Ad 2"]],
        );
        let normalized = normalizer.normalize(&raw).unwrap();
        assert_eq!(normalized.rows.len(), 2);
    }
}
