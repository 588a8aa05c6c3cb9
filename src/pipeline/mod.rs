pub mod export;
pub mod process;
pub mod retrieve;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::config::{Settings, SourceBackend};
use crate::engine::http::HttpEngine;
use crate::engine::ScoringEngine;
use crate::platform::SourceCatalog;
use crate::source::pg::PgSource;
use crate::source::rest::RestSource;
use crate::source::RowSource;
use crate::util::time::stamp;

/// Everything a run needs: where rows come from, where they are scored, and the knobs.
pub struct Pipeline {
    store: Option<Arc<dyn RowSource>>,
    pub engine: Arc<dyn ScoringEngine>,
    pub settings: Settings,
}

impl Pipeline {
    pub fn new(store: Option<Arc<dyn RowSource>>, engine: Arc<dyn ScoringEngine>, settings: Settings) -> Self {
        Self { store, engine, settings }
    }

    /// Wire the configured backend (if any) and the HTTP engine client.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let store: Option<Arc<dyn RowSource>> = match &settings.backend {
            Some(SourceBackend::Postgres { dsn }) => Some(Arc::new(PgSource::connect_lazy(dsn)?)),
            Some(SourceBackend::Supabase { url, key }) => Some(Arc::new(RestSource::new(url, key.clone(), settings.page.page_timeout)?)),
            None => None,
        };
        if let Some(backend) = &settings.backend {
            tracing::debug!(backend = backend.name(), "row source configured");
        }
        let engine = HttpEngine::new(settings.engine.clone())?;
        Ok(Self::new(store, Arc::new(engine), settings))
    }

    /// Retrieval needs a data source; processing does not.
    pub fn store(&self) -> Result<&dyn RowSource> {
        self.store
            .as_deref()
            .ok_or_else(|| anyhow!("no data source configured: pass --dsn, set DATABASE_URL, or set SUPABASE_URL and SUPABASE_SERVICE_KEY"))
    }

    pub fn catalog(&self) -> &SourceCatalog { &self.settings.catalog }
}

/// Sortable, collision-resistant id used in file names and events.
pub fn new_run_id() -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("{}_{}", stamp(Utc::now()), &tail[..8])
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use super::Pipeline;
    use crate::config::Settings;
    use crate::engine::testing::MockEngine;
    use crate::source::testing::MemorySource;

    /// Settings with no environment, fast pacing and output under `out`.
    pub fn test_settings(out: &Path) -> Settings {
        let env: HashMap<&str, &str> = HashMap::from([("ADFLOW_BATCH_DELAY_MS", "0"), ("ADFLOW_PAGE_SIZE", "2")]);
        let mut s = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        s.output_dir = out.to_path_buf();
        s
    }

    pub fn pipeline(store: Option<MemorySource>, engine: Arc<MockEngine>, out: &Path) -> Pipeline {
        let store = store.map(|s| Arc::new(s) as Arc<dyn crate::source::RowSource>);
        Pipeline::new(store, engine, test_settings(out))
    }
}
