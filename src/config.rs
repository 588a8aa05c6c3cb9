use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::http::HttpEngineConfig;
use crate::pipeline::process::merge::MergePolicy;
use crate::platform::{Platform, PlatformSource, SourceCatalog};
use crate::source::pager::PageOptions;

pub const DEFAULT_PAGE_SIZE: i64 = 1000;
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 250;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_REPORT_TYPE: &str = "comprehensive";
const DEFAULT_REAGG_KEYS: &[&str] = &["date", "campaign"];

/// Where platform rows are read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceBackend {
    Postgres { dsn: String },
    Supabase { url: String, key: String },
}

impl SourceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SourceBackend::Postgres { .. } => "postgres",
            SourceBackend::Supabase { .. } => "supabase",
        }
    }
}

/// Process-wide settings, resolved once at start-up.
#[derive(Clone, Debug)]
pub struct Settings {
    pub backend: Option<SourceBackend>,
    pub catalog: SourceCatalog,
    pub page: PageOptions,
    pub chunk_size: usize,
    pub batch_delay: Duration,
    pub engine: HttpEngineConfig,
    pub merge_policy: MergePolicy,
    pub reagg_keys: Vec<String>,
    pub output_dir: PathBuf,
    pub cache_ttl: Duration,
    pub bind: String,
    pub report_type: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Resolve settings through `get`; unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let num = |k: &str| var(k).and_then(|v| v.parse::<u64>().ok());

        let backend = match (var("DATABASE_URL"), var("SUPABASE_URL"), var("SUPABASE_SERVICE_KEY")) {
            (Some(dsn), _, _) => Some(SourceBackend::Postgres { dsn }),
            (None, Some(url), Some(key)) => Some(SourceBackend::Supabase { url, key }),
            _ => None,
        };

        let source = |p: Platform| -> Result<PlatformSource> {
            let table = var(&format!("{}_TABLE", p.env_prefix())).unwrap_or_else(|| p.default_table().to_string());
            let column = var(&format!("{}_DATE_COLUMN", p.env_prefix())).unwrap_or_else(|| "date".to_string());
            let src = PlatformSource::new(p, table, column)?;
            match var(&format!("{}_ORDER_KEY", p.env_prefix())) {
                Some(key) => src.with_order_key(key),
                None => Ok(src),
            }
        };
        let catalog = SourceCatalog::new(source(Platform::MetaAds)?, source(Platform::GoogleAds)?, source(Platform::Shopify)?);

        let merge_policy = match var("ADFLOW_MERGE_POLICY") {
            Some(v) => v.parse::<MergePolicy>().context("ADFLOW_MERGE_POLICY")?,
            None => MergePolicy::default(),
        };
        let reagg_keys = var("ADFLOW_REAGG_KEYS")
            .map(|v| v.split(',').map(|k| k.trim().to_string()).filter(|k| !k.is_empty()).collect::<Vec<_>>())
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| DEFAULT_REAGG_KEYS.iter().map(|k| k.to_string()).collect());

        Ok(Settings {
            backend,
            catalog,
            page: PageOptions {
                page_size: num("ADFLOW_PAGE_SIZE").filter(|n| *n > 0).map(|n| n as i64).unwrap_or(DEFAULT_PAGE_SIZE),
                page_timeout: Duration::from_secs(num("ADFLOW_PAGE_TIMEOUT_SECS").unwrap_or(DEFAULT_PAGE_TIMEOUT_SECS)),
            },
            chunk_size: num("ADFLOW_CHUNK_SIZE").filter(|n| *n > 0).map(|n| n as usize).unwrap_or(DEFAULT_CHUNK_SIZE),
            batch_delay: Duration::from_millis(num("ADFLOW_BATCH_DELAY_MS").unwrap_or(DEFAULT_BATCH_DELAY_MS)),
            engine: HttpEngineConfig::from_lookup(&get),
            merge_policy,
            reagg_keys,
            output_dir: var("ADFLOW_OUTPUT_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            cache_ttl: Duration::from_secs(num("ADFLOW_CACHE_TTL_SECS").unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            bind: var("ADFLOW_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            report_type: var("ADFLOW_REPORT_TYPE").unwrap_or_else(|| DEFAULT_REPORT_TYPE.to_string()),
        })
    }

    /// `--dsn` on the command line beats whatever the environment selected.
    pub fn with_dsn(mut self, dsn: Option<String>) -> Self {
        if let Some(dsn) = dsn.filter(|d| !d.trim().is_empty()) {
            self.backend = Some(SourceBackend::Postgres { dsn });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.backend, None);
        assert_eq!(s.page.page_size, 1000);
        assert_eq!(s.page.page_timeout, Duration::from_secs(30));
        assert_eq!(s.chunk_size, 500);
        assert_eq!(s.batch_delay, Duration::from_millis(250));
        assert_eq!(s.cache_ttl, Duration::from_secs(300));
        assert_eq!(s.merge_policy, MergePolicy::Concat);
        assert_eq!(s.reagg_keys, vec!["date", "campaign"]);
        assert_eq!(s.output_dir, PathBuf::from("output"));
        assert_eq!(s.bind, "127.0.0.1:3000");
        assert_eq!(s.engine.url, "http://127.0.0.1:8080/api/julius-v7");
        assert_eq!(s.report_type, "comprehensive");
        assert_eq!(s.catalog.get(Platform::MetaAds).order_key, "id");
    }

    #[test]
    fn database_url_wins_over_supabase() {
        let s = settings(&[("DATABASE_URL", "postgres://x"), ("SUPABASE_URL", "https://a.supabase.co"), ("SUPABASE_SERVICE_KEY", "k")]).unwrap();
        assert_eq!(s.backend.as_ref().map(|b| b.name()), Some("postgres"));
        let s = settings(&[("SUPABASE_URL", "https://a.supabase.co"), ("SUPABASE_SERVICE_KEY", "k")]).unwrap();
        assert_eq!(s.backend, Some(SourceBackend::Supabase { url: "https://a.supabase.co".into(), key: "k".into() }));
        // half a supabase config is no backend at all
        assert_eq!(settings(&[("SUPABASE_URL", "https://a.supabase.co")]).unwrap().backend, None);
        let s = settings(&[]).unwrap().with_dsn(Some("postgres://cli".into()));
        assert_eq!(s.backend, Some(SourceBackend::Postgres { dsn: "postgres://cli".into() }));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let s = settings(&[
            ("ADFLOW_PAGE_SIZE", "abc"),
            ("ADFLOW_CHUNK_SIZE", "0"),
            ("ADFLOW_BATCH_DELAY_MS", "10"),
            ("ADFLOW_CACHE_TTL_SECS", "0"),
            ("ADFLOW_REAGG_KEYS", " date , adset ,"),
            ("ADFLOW_MERGE_POLICY", "reaggregate"),
            ("ADFLOW_GOOGLE_TABLE", "analytics.google_daily"),
            ("ADFLOW_GOOGLE_DATE_COLUMN", "day"),
            ("ADFLOW_GOOGLE_ORDER_KEY", "row_id"),
            ("ADFLOW_REPORT_TYPE", "weekly"),
            ("JULIUS_ENGINE_KEY", "secret"),
            ("ADFLOW_ENGINE_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(s.page.page_size, 1000);
        assert_eq!(s.chunk_size, 500);
        assert_eq!(s.batch_delay, Duration::from_millis(10));
        assert_eq!(s.cache_ttl, Duration::ZERO);
        assert_eq!(s.reagg_keys, vec!["date", "adset"]);
        assert_eq!(s.merge_policy, MergePolicy::Reaggregate);
        let g = s.catalog.get(Platform::GoogleAds);
        assert_eq!((g.table.as_str(), g.date_column.as_str(), g.order_key.as_str()), ("analytics.google_daily", "day", "row_id"));
        assert_eq!(s.report_type, "weekly");
        assert_eq!(s.engine.api_key.as_deref(), Some("secret"));
        assert_eq!(s.engine.timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_table_name_is_rejected() {
        assert!(settings(&[("ADFLOW_META_TABLE", "meta; drop table x")]).is_err());
        assert!(settings(&[("ADFLOW_MERGE_POLICY", "sum")]).is_err());
        assert!(settings(&[("ADFLOW_SHOPIFY_ORDER_KEY", "id desc")]).is_err());
    }
}
