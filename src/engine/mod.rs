use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::model::{DateRange, Row};
use crate::pipeline::process::merge::ProcessedOutput;
use crate::platform::{PerPlatform, Platform};

pub mod http;

/// Request shape the scoring engine expects: all three platform keys are always present,
/// single-platform batches leave the other two empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    #[serde(flatten)]
    pub data: PerPlatform<Vec<Row>>,
    pub date_range: DateRange,
    pub report_type: String,
}

impl EngineRequest {
    pub fn single(platform: Platform, rows: Vec<Row>, date_range: DateRange, report_type: &str) -> Self {
        let mut data: PerPlatform<Vec<Row>> = PerPlatform::default();
        *data.get_mut(platform) = rows;
        Self { data, date_range, report_type: report_type.to_string() }
    }

    pub fn row_count(&self) -> usize {
        Platform::ALL.iter().map(|p| self.data.get(*p).len()).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("engine call timed out")]
    Timeout,
    #[error("engine error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[cfg(test)]
    #[error("scripted failure: {0}")]
    Scripted(String),
}

impl EngineError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() { EngineError::Timeout } else { EngineError::Http(err) }
    }

    pub fn is_timeout(&self) -> bool { matches!(self, EngineError::Timeout) }
}

/// The external scoring / attribution engine. Only its request/response contract matters here.
#[async_trait]
pub trait ScoringEngine: Send + Sync {
    async fn score(&self, request: &EngineRequest) -> Result<ProcessedOutput, EngineError>;
}
