// 🌍 Locale Value Parser
// Numbers and dates written in mixed European/US conventions.
//
// Nothing here fails: spreadsheet cells are routinely blank or hold
// placeholders ("-", "N/A"), so bad input degrades to 0 / None.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parse a number written with European separators (`1.234,56`).
///
/// - `.` is the thousands separator, `,` the decimal separator
/// - when both occur, whichever appears last is the decimal separator
/// - a lone `.` that does not form 3-digit groups (`3.5`, `0.123`) is a decimal point
/// - currency symbols, codes, `%` and spaces are ignored
/// - a leading `-` or wrapping parentheses make the value negative
///
/// Returns `0.0` when no number can be read.
pub fn parse_number(raw: &str) -> f64 {
    let mut s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = &s[1..s.len() - 1];
    }

    let mut cleaned = String::with_capacity(s.len());
    let mut seen_digit = false;
    for c in s.chars() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                cleaned.push(c);
            }
            '.' | ',' => cleaned.push(c),
            '-' | '\u{2212}' if !seen_digit => negative = !negative,
            _ => {}
        }
    }

    if !seen_digit {
        return 0.0;
    }

    let normalized = normalize_separators(&cleaned);
    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            if negative {
                -value
            } else {
                value
            }
        }
        _ => 0.0,
    }
}

/// Parse a counter (impressions, clicks, ...): never negative, whole units.
pub fn parse_count(raw: &str) -> u64 {
    let value = parse_number(raw);
    if value <= 0.0 {
        0
    } else {
        value.round() as u64
    }
}

fn normalize_separators(cleaned: &str) -> String {
    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            if comma > dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if cleaned.matches(',').count() > 1 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        (Some(_), None) => {
            if is_thousands_grouped(cleaned, '.') || cleaned.matches('.').count() > 1 {
                cleaned.replace('.', "")
            } else {
                cleaned.to_string()
            }
        }
        (None, None) => cleaned.to_string(),
    }
}

/// `1.234` / `12.345.678` style grouping
fn is_thousands_grouped(s: &str, separator: char) -> bool {
    let mut parts = s.split(separator);
    let head = match parts.next() {
        Some(h) => h,
        None => return false,
    };
    if head.is_empty() || head.len() > 3 || head.starts_with('0') {
        return false;
    }
    let mut groups = 0;
    for part in parts {
        if part.len() != 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        groups += 1;
    }
    groups > 0
}

/// Parse a calendar date.
///
/// `DD/MM/YYYY` (and `DD-MM-YYYY`) is tried first, then ISO-like forms.
/// `None` means the value is treated as unsortable and excluded from date filters.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in ["%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Canonical day string used inside record identity keys:
/// ISO date when parseable, otherwise the trimmed raw cell.
pub fn normalize_day(raw: &str) -> String {
    match parse_date(raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_european() {
        assert_eq!(parse_number("1.234,56"), 1234.56);
        assert_eq!(parse_number("12,5"), 12.5);
        assert_eq!(parse_number("1.234.567"), 1234567.0);
        assert_eq!(parse_number("3.500"), 3500.0);
    }

    #[test]
    fn test_parse_number_us_and_plain() {
        assert_eq!(parse_number("1,234.56"), 1234.56);
        assert_eq!(parse_number("3.5"), 3.5);
        assert_eq!(parse_number("0.123"), 0.123);
        assert_eq!(parse_number("1,234,567"), 1234567.0);
        assert_eq!(parse_number("42"), 42.0);
    }

    #[test]
    fn test_parse_number_strips_symbols() {
        assert_eq!(parse_number("€ 1.234,56"), 1234.56);
        assert_eq!(parse_number("1.234,56 €"), 1234.56);
        assert_eq!(parse_number("$12.50"), 12.5);
        assert_eq!(parse_number("12,3%"), 12.3);
        assert_eq!(parse_number("1 234,00 EUR"), 1234.0);
    }

    #[test]
    fn test_parse_number_negative() {
        assert_eq!(parse_number("-45,99"), -45.99);
        assert_eq!(parse_number("(45,99)"), -45.99);
    }

    #[test]
    fn test_parse_number_placeholders_are_zero() {
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("-"), 0.0);
        assert_eq!(parse_number("N/A"), 0.0);
        assert_eq!(parse_number("--"), 0.0);
        assert_eq!(parse_number("   "), 0.0);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1.500"), 1500);
        assert_eq!(parse_count("-3"), 0);
        assert_eq!(parse_count("N/A"), 0);
        assert_eq!(parse_count("2,6"), 3);
    }

    #[test]
    fn test_parse_date_european_first() {
        let date = parse_date("03/02/2024").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());

        let date = parse_date("3/2/2024").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());
    }

    #[test]
    fn test_parse_date_iso_fallback() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        assert_eq!(parse_date("2024-05-17"), Some(expected));
        assert_eq!(parse_date("2024-05-17T10:30:00"), Some(expected));
        assert_eq!(parse_date("2024-05-17T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2024/05/17"), Some(expected));
    }

    #[test]
    fn test_parse_date_unparseable_is_none() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("ayer"), None);
        assert_eq!(parse_date("31/02/2024"), None);
    }

    #[test]
    fn test_normalize_day() {
        assert_eq!(normalize_day("17/05/2024"), "2024-05-17");
        assert_eq!(normalize_day("  semana 20 "), "semana 20");
    }
}
