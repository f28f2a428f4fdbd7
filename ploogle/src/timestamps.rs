//! Date parsing for source-site listings and e-book metadata
//!
//! The source site shows dates like `06 Aug 2025` while e-book metadata carries
//! `2025-08-06` or full ISO timestamps. Date-only values are read as UTC midnight.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%d %B %Y", "%b %d, %Y"];

/// Parse a timestamp in any of the formats seen on the source site or in e-books
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_listing_format() {
        assert_eq!(parse_timestamp("06 Aug 2025"), Some(midnight(2025, 8, 6)));
        assert_eq!(parse_timestamp("  06 Aug 2025\n"), Some(midnight(2025, 8, 6)));
    }

    #[test]
    fn test_iso_date_and_listing_date_agree() {
        assert_eq!(parse_timestamp("2025-08-06"), parse_timestamp("06 Aug 2025"));
    }

    #[test]
    fn test_full_timestamps() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 6, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2025-08-06T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-08-06T16:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-08-06 14:30:00"), Some(expected));
    }

    #[test]
    fn test_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
