use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::pipeline::process::merge::ProcessedOutput;

use super::{EngineError, EngineRequest, ScoringEngine};

const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8080/api/julius-v7";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct HttpEngineConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENGINE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl HttpEngineConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(url) = get("JULIUS_ENGINE_URL").filter(|u| !u.trim().is_empty()) {
            cfg.url = url;
        }
        cfg.api_key = get("JULIUS_ENGINE_KEY").filter(|k| !k.is_empty());
        if let Some(parsed) = get("ADFLOW_ENGINE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.timeout = Duration::from_secs(parsed);
        }
        cfg
    }
}

/// Scoring engine reached over HTTP: one JSON POST per batch.
#[derive(Clone)]
pub struct HttpEngine {
    http: HttpClient,
    cfg: HttpEngineConfig,
}

impl HttpEngine {
    pub fn new(cfg: HttpEngineConfig) -> Result<Self, EngineError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(EngineError::from_reqwest)?;
        Ok(Self { http, cfg })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "message")]
    error: String,
}

fn api_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<ApiErrorBody>(bytes)
        .map(|b| b.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).chars().take(300).collect())
}

#[async_trait]
impl ScoringEngine for HttpEngine {
    async fn score(&self, request: &EngineRequest) -> Result<ProcessedOutput, EngineError> {
        let mut req = self.http.post(&self.cfg.url).json(request);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(EngineError::from_reqwest)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(EngineError::from_reqwest)?;
        if !status.is_success() {
            return Err(EngineError::Api { status, message: api_message(&bytes) });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn api_error_message_prefers_json_error_field() {
        assert_eq!(api_message(br#"{"error":"bad batch"}"#), "bad batch");
        assert_eq!(api_message(br#"{"message":"overloaded"}"#), "overloaded");
        assert_eq!(api_message(b"plain failure"), "plain failure");
    }

    #[test]
    fn api_error_display_includes_status() {
        let err = EngineError::Api { status: StatusCode::BAD_GATEWAY, message: "upstream".into() };
        assert_eq!(err.to_string(), "engine error 502 Bad Gateway: upstream");
        assert!(!err.is_timeout());
        assert!(EngineError::Timeout.is_timeout());
    }

    #[test]
    fn engine_output_tolerates_missing_levels() {
        let out: ProcessedOutput = serde_json::from_str(r#"{"topLevel":[{"a":1}]}"#).unwrap();
        assert_eq!(out.top_level.len(), 1);
        assert!(out.ad_set_level.is_empty());
        assert!(out.ad_level.is_empty());
    }
}
