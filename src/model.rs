use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::util::time::parse_date_str;

/// One record as read from a platform table: column name -> scalar, in column order.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid date for {field}: {value:?}")]
    InvalidDate { field: &'static str, value: String },
    #[error("startDate {start} is after endDate {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("{0}")]
    Invalid(String),
}

/// Inclusive calendar date range; `start <= end` holds for every constructed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    #[serde(rename = "startDate")]
    start: NaiveDate,
    #[serde(rename = "endDate")]
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Validate the raw `startDate` / `endDate` strings of a request.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, ValidationError> {
        let start_raw = start.filter(|s| !s.trim().is_empty()).ok_or(ValidationError::Missing("startDate"))?;
        let end_raw = end.filter(|s| !s.trim().is_empty()).ok_or(ValidationError::Missing("endDate"))?;
        let start = parse_date_str(start_raw).ok_or_else(|| ValidationError::InvalidDate { field: "startDate", value: start_raw.to_string() })?;
        let end = parse_date_str(end_raw).ok_or_else(|| ValidationError::InvalidDate { field: "endDate", value: end_raw.to_string() })?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate { self.start }
    pub fn end(&self) -> NaiveDate { self.end }

    pub fn contains(&self, d: NaiveDate) -> bool { self.start <= d && d <= self.end }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Min/max of the date column actually observed in a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservedRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

impl ObservedRange {
    pub fn from_rows(rows: &[Row], column: &str) -> Self {
        let mut out = ObservedRange::default();
        for v in rows.iter().filter_map(|r| r.get(column)) {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            if out.min.as_ref().is_none_or(|m| s < *m) { out.min = Some(s.clone()); }
            if out.max.as_ref().is_none_or(|m| s > *m) { out.max = Some(s); }
        }
        out
    }
}
