use chrono::{DateTime, NaiveDate, NaiveDateTime};

// Parse a date string like "YYYY-MM-DD", "YYYY-MM-DDTHH:MM:SS" or RFC3339 into a calendar date.
// Returns None if unparseable. Time-of-day and offsets are dropped, the date part is kept as written.
pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() { return None; }
    // "YYYY-MM-DD"
    if let Ok(nd) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(nd);
    }
    // RFC3339
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // naive timestamp, with or without fractional seconds
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

// Compact timestamp used inside artifact names and run ids.
pub fn stamp(now: DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}
