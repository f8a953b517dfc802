// src/table/dates.rs
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Formats tried, in order, when no explicit format is given.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Parse a timestamp or plain date in one of the common layouts.
/// Plain dates become midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse with an explicit strftime format. A format without time fields
/// yields midnight of the parsed date.
pub fn parse_with_format(s: &str, fmt: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Days since 1970-01-01, the Arrow `Date32` encoding.
pub fn date_to_days(d: NaiveDate) -> i32 {
    d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Microseconds since the epoch, the Arrow `Timestamp(Microsecond)` encoding.
pub fn datetime_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 12, 14)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_datetime("2024-12-14 10:30:00"), Some(expected));
        assert_eq!(parse_datetime("2024/12/14 10:30:00"), Some(expected));
        assert_eq!(parse_datetime("2024-12-14T10:30:00"), Some(expected));
        assert_eq!(
            parse_datetime("2024-12-14"),
            NaiveDate::from_ymd_opt(2024, 12, 14).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn explicit_format_accepts_date_only() {
        let dt = parse_with_format("14.12.2024", "%d.%m.%Y").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 12, 14).unwrap());
        assert!(parse_with_format("2024-12-14", "%d.%m.%Y").is_none());
    }

    #[test]
    fn epoch_encodings() {
        let d = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(date_to_days(d), 1);
        assert_eq!(datetime_to_micros(d.and_hms_opt(0, 0, 1).unwrap()), 86_401_000_000);
    }
}
