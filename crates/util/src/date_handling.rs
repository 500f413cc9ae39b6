//! # Date Handling Utilities
//!
//! Parsing of the date strings that arrive from configuration, records, and
//! user input, plus the compact `YYYYMMDD` form the query endpoint expects.

use chrono::{DateTime, Datelike, NaiveDate};

/// Formats a date in the 8-digit `YYYYMMDD` form used in query substitutions.
///
/// # Example
/// ```rust
/// use chrono::NaiveDate;
/// use formflow_util::date_handling::format_compact_date;
///
/// let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
/// assert_eq!(format_compact_date(date), "20240401");
/// ```
pub fn format_compact_date(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// Parses common date spellings into a calendar date.
///
/// Accepted forms, tried in order:
/// - RFC3339 timestamps (`2024-04-01T10:30:00Z`), truncated to the date
/// - ISO dates with `-` or `/` separators (`2024-04-01`, `2024/04/01`)
/// - The compact form (`20240401`)
///
/// # Example
/// ```rust
/// use formflow_util::date_handling::parse_date;
///
/// assert_eq!(parse_date("2024-04-01"), parse_date("20240401"));
/// assert!(parse_date("2024-13-45").is_none());
/// ```
pub fn parse_date(date_string: &str) -> Option<NaiveDate> {
    let trimmed = date_string.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date_time) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(date_time.date_naive());
    }

    for format_string in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format_string) {
            return Some(date);
        }
    }

    parse_compact_date(trimmed)
}

/// Parses the 8-digit compact form only.
fn parse_compact_date(date_string: &str) -> Option<NaiveDate> {
    if date_string.len() != 8 || !date_string.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date_string, "%Y%m%d").ok()
}

/// Normalizes any parseable date string to `YYYYMMDD`, leaving other text untouched.
pub fn normalize_to_compact(date_string: &str) -> String {
    parse_date(date_string)
        .map(format_compact_date)
        .unwrap_or_else(|| date_string.to_string())
}

/// First day of the date's month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the date's year.
pub fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn compact_formatting_pads_month_and_day() {
        assert_eq!(format_compact_date(date(2024, 4, 1)), "20240401");
        assert_eq!(format_compact_date(date(999, 12, 31)), "09991231");
    }

    #[test]
    fn parses_supported_spellings() {
        let expected = Some(date(2023, 12, 25));
        assert_eq!(parse_date("2023-12-25T10:30:00Z"), expected);
        assert_eq!(parse_date("2023-12-25"), expected);
        assert_eq!(parse_date("2023/12/25"), expected);
        assert_eq!(parse_date("20231225"), expected);
        assert_eq!(parse_date(" 2023-12-25 "), expected);
    }

    #[test]
    fn rejects_invalid_dates() {
        assert_eq!(parse_date("invalid"), None);
        assert_eq!(parse_date("2023-13-45"), None);
        assert_eq!(parse_date("20231345"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn normalize_leaves_plain_text_alone() {
        assert_eq!(normalize_to_compact("2024-04-01"), "20240401");
        assert_eq!(normalize_to_compact("MH"), "MH");
    }

    #[test]
    fn period_starts() {
        assert_eq!(month_start(date(2024, 4, 17)), date(2024, 4, 1));
        assert_eq!(year_start(date(2024, 4, 17)), date(2024, 1, 1));
    }
}
