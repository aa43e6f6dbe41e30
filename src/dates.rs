use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// Accepted calendar formats, tried in order. Day-first wins over
/// month-first for ambiguous numeric dates.
const DATE_FORMATS: [&str; 7] = [
    "%d-%m-%Y",
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Parse a raw date string into a calendar date.
///
/// Returns `None` when no format matches or when the year falls outside
/// 1900..=2100.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| DateTime::parse_from_rfc2822(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|dt| dt.date())
        })?;

    (MIN_YEAR..=MAX_YEAR)
        .contains(&parsed.year())
        .then_some(parsed)
}

/// ISO rendering used when dates cross the SQL boundary.
pub fn to_iso(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
