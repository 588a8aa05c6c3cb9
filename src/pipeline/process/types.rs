use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::model::{DateRange, Row, ValidationError};
use crate::pipeline::export::ExportEntry;
use crate::pipeline::process::batch::PlatformBatchReport;
use crate::pipeline::process::merge::{LevelCounts, MergePolicy, ProcessedOutput};
use crate::platform::{PerPlatform, Platform};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDateRange {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOptions {
    pub chunk_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub report_type: Option<String>,
    pub merge_policy: Option<MergePolicy>,
}

/// Body of both processing endpoints. A saved retrieval summary has the same `data` and
/// `dateRange` keys, so it is accepted as-is; failed platforms arrive as `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    pub data: Option<PerPlatform<Option<Vec<Row>>>>,
    pub date_range: Option<RawDateRange>,
    pub platforms: Option<Vec<String>>,
    pub options: Option<ProcessOptions>,
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub data: PerPlatform<Vec<Row>>,
    pub date_range: DateRange,
    pub platforms: Vec<Platform>,
    pub chunk_size: usize,
    pub delay: Duration,
    pub report_type: String,
    pub merge_policy: MergePolicy,
}

impl ProcessBody {
    pub fn validate(self, settings: &Settings) -> Result<ProcessRequest, ValidationError> {
        let raw = self.data.ok_or(ValidationError::Missing("data"))?;
        let data = PerPlatform {
            meta: raw.meta.unwrap_or_default(),
            google: raw.google.unwrap_or_default(),
            shopify: raw.shopify.unwrap_or_default(),
        };
        let dr = self.date_range.ok_or(ValidationError::Missing("dateRange"))?;
        let date_range = DateRange::parse(dr.start_date.as_deref(), dr.end_date.as_deref())?;

        let platforms = match self.platforms {
            Some(names) => {
                let mut picked = Vec::with_capacity(names.len());
                for name in &names {
                    picked.push(name.parse::<Platform>()?);
                }
                if picked.is_empty() {
                    return Err(ValidationError::Invalid("platforms must not be empty".into()));
                }
                Platform::ALL.into_iter().filter(|p| picked.contains(p)).collect::<Vec<_>>()
            }
            None => {
                let with_rows: Vec<Platform> = Platform::ALL.into_iter().filter(|p| !data.get(*p).is_empty()).collect();
                if with_rows.is_empty() {
                    return Err(ValidationError::Invalid("data has no rows for any platform".into()));
                }
                with_rows
            }
        };

        let opts = self.options.unwrap_or_default();
        let chunk_size = match opts.chunk_size {
            Some(0) => return Err(ValidationError::Invalid("chunkSize must be positive".into())),
            Some(n) => n,
            None => settings.chunk_size,
        };
        Ok(ProcessRequest {
            data,
            date_range,
            platforms,
            chunk_size,
            delay: opts.delay_ms.map(Duration::from_millis).unwrap_or(settings.batch_delay),
            report_type: opts
                .report_type
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| settings.report_type.clone()),
            merge_policy: opts.merge_policy.unwrap_or(settings.merge_policy),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub run_id: String,
    /// False only when batches were attempted and every one of them failed.
    pub success: bool,
    pub date_range: DateRange,
    pub report_type: String,
    pub merge_policy: MergePolicy,
    pub platforms: Vec<PlatformBatchReport>,
    pub counts: LevelCounts,
    pub results: ProcessedOutput,
    pub files: Vec<ExportEntry>,
    pub duration_ms: u128,
}

impl ProcessingSummary {
    pub fn brief(&self) -> Self {
        Self { results: ProcessedOutput::default(), ..self.clone() }
    }
}

/// What `process` would send to the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPlan {
    pub date_range: DateRange,
    pub report_type: String,
    pub merge_policy: MergePolicy,
    pub chunk_size: usize,
    pub delay_ms: u128,
    pub platforms: Vec<PlannedBatches>,
    pub total_batches: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBatches {
    pub platform: Platform,
    pub rows: usize,
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::test_settings;

    fn body(s: &str) -> ProcessBody { serde_json::from_str(s).unwrap() }

    #[test]
    fn defaults_pick_platforms_with_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());
        let req = body(r#"{"data":{"meta":[],"google":[{"a":1}],"shopify":null},"dateRange":{"startDate":"2024-01-01","endDate":"2024-01-31"}}"#)
            .validate(&settings)
            .unwrap();
        assert_eq!(req.platforms, vec![Platform::GoogleAds]);
        assert_eq!(req.chunk_size, 500);
        assert_eq!(req.report_type, "comprehensive");
        assert_eq!(req.merge_policy, MergePolicy::Concat);
    }

    #[test]
    fn explicit_options_and_platforms() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());
        let req = body(r#"{"data":{"meta":[{"a":1}]},"dateRange":{"startDate":"2024-01-01","endDate":"2024-01-02"},
                "platforms":["shopify","meta"],"options":{"chunkSize":50,"delayMs":10,"reportType":"weekly","mergePolicy":"reaggregate"}}"#)
            .validate(&settings)
            .unwrap();
        assert_eq!(req.platforms, vec![Platform::MetaAds, Platform::Shopify]);
        assert_eq!(req.chunk_size, 50);
        assert_eq!(req.delay, Duration::from_millis(10));
        assert_eq!(req.report_type, "weekly");
        assert_eq!(req.merge_policy, MergePolicy::Reaggregate);
    }

    #[test]
    fn rejects_bad_bodies() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());
        let range = r#""dateRange":{"startDate":"2024-01-01","endDate":"2024-01-31"}"#;
        assert_eq!(body(&format!("{{{range}}}")).validate(&settings).unwrap_err(), ValidationError::Missing("data"));
        assert_eq!(body(r#"{"data":{"meta":[{"a":1}]}}"#).validate(&settings).unwrap_err(), ValidationError::Missing("dateRange"));
        assert_eq!(
            body(&format!(r#"{{"data":{{"meta":[{{"a":1}}]}},"platforms":["tiktok"],{range}}}"#)).validate(&settings).unwrap_err(),
            ValidationError::UnknownPlatform("tiktok".into())
        );
        assert!(body(&format!(r#"{{"data":{{"meta":[]}},{range}}}"#)).validate(&settings).is_err());
        assert!(body(&format!(r#"{{"data":{{"meta":[{{"a":1}}]}},"options":{{"chunkSize":0}},{range}}}"#)).validate(&settings).is_err());
    }
}
