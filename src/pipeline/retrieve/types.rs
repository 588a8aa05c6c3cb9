use serde::{Deserialize, Serialize};

use crate::model::{DateRange, ObservedRange, Row, ValidationError};
use crate::pipeline::export::ExportEntry;
use crate::platform::{PerPlatform, Platform};

/// Body of both retrieval endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveBody {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub report_type: Option<String>,
    #[serde(default)]
    pub export_csv: bool,
}

impl RetrieveBody {
    pub fn validate(self, default_report_type: &str) -> Result<RetrievalRequest, ValidationError> {
        let date_range = DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())?;
        let report_type = self
            .report_type
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| default_report_type.to_string());
        Ok(RetrievalRequest { date_range, report_type, export_csv: self.export_csv, page_size: None })
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub date_range: DateRange,
    pub report_type: String,
    pub export_csv: bool,
    /// Overrides the configured page size for this run.
    pub page_size: Option<i64>,
}

/// Per-platform line of a retrieval summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformReport {
    pub platform: Platform,
    pub table: String,
    pub success: bool,
    pub row_count: usize,
    pub total_requested: Option<i64>,
    pub total_received: usize,
    pub pages: usize,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range_actual: Option<ObservedRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalSummary {
    pub run_id: String,
    /// Every platform was read.
    pub success: bool,
    /// At least one platform was read.
    pub partial_success: bool,
    pub date_range: DateRange,
    pub report_type: String,
    pub platforms: Vec<PlatformReport>,
    pub data: PerPlatform<Option<Vec<Row>>>,
    pub failures: Vec<Platform>,
    pub total_rows: usize,
    pub duration_ms: u128,
    pub files: Vec<ExportEntry>,
    pub cached: bool,
}

impl RetrievalSummary {
    /// Same summary without the row payload, for terminal output.
    pub fn brief(&self) -> Self {
        Self { data: PerPlatform::default(), ..self.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPlatform {
    pub platform: Platform,
    pub table: String,
    pub date_column: String,
    pub estimated_rows: Option<i64>,
    pub estimated_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What `retrieve` would read, without reading it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalPlan {
    pub backend: &'static str,
    pub date_range: DateRange,
    pub report_type: String,
    pub page_size: i64,
    pub platforms: Vec<PlannedPlatform>,
    pub total_estimated: i64,
}
