use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::ValidationError;
use crate::util::sql::validate_ident;

/// The three data sources the pipeline knows about. Declaration order is processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "meta", alias = "metaAds", alias = "meta_ads")]
    MetaAds,
    #[serde(rename = "google", alias = "googleAds", alias = "google_ads")]
    GoogleAds,
    #[serde(rename = "shopify")]
    Shopify,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::MetaAds, Platform::GoogleAds, Platform::Shopify];

    /// Payload key used by requests, summaries and the scoring engine.
    pub fn key(&self) -> &'static str {
        match self {
            Platform::MetaAds => "meta",
            Platform::GoogleAds => "google",
            Platform::Shopify => "shopify",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::MetaAds => "Meta Ads",
            Platform::GoogleAds => "Google Ads",
            Platform::Shopify => "Shopify",
        }
    }

    pub(crate) fn env_prefix(&self) -> &'static str {
        match self {
            Platform::MetaAds => "ADFLOW_META",
            Platform::GoogleAds => "ADFLOW_GOOGLE",
            Platform::Shopify => "ADFLOW_SHOPIFY",
        }
    }

    pub(crate) fn default_table(&self) -> &'static str {
        match self {
            Platform::MetaAds => "meta_ads_data",
            Platform::GoogleAds => "google_ads_data",
            Platform::Shopify => "shopify_data",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.key()) }
}

impl FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "meta" | "metaAds" | "meta_ads" => Ok(Platform::MetaAds),
            "google" | "googleAds" | "google_ads" => Ok(Platform::GoogleAds),
            "shopify" => Ok(Platform::Shopify),
            other => Err(ValidationError::UnknownPlatform(other.to_string())),
        }
    }
}

pub const DEFAULT_ORDER_KEY: &str = "id";

/// A platform bound to its backing table and date column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSource {
    pub platform: Platform,
    pub table: String,
    pub date_column: String,
    /// Unique column that orders rows sharing a date, so offset pages never overlap.
    pub order_key: String,
}

impl PlatformSource {
    pub fn new(platform: Platform, table: impl Into<String>, date_column: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let date_column = date_column.into();
        validate_ident(&table).with_context(|| format!("table for {}", platform))?;
        validate_ident(&date_column).with_context(|| format!("date column for {}", platform))?;
        Ok(Self { platform, table, date_column, order_key: DEFAULT_ORDER_KEY.to_string() })
    }

    pub fn with_order_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_ident(&key).with_context(|| format!("order key for {}", self.platform))?;
        self.order_key = key;
        Ok(self)
    }
}

/// Fixed set of sources, one per platform, in processing order.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: PerPlatform<PlatformSource>,
}

impl SourceCatalog {
    pub fn new(meta: PlatformSource, google: PlatformSource, shopify: PlatformSource) -> Self {
        Self { sources: PerPlatform { meta, google, shopify } }
    }

    pub fn defaults() -> Result<Self> {
        let mk = |p: Platform| PlatformSource::new(p, p.default_table(), "date");
        Ok(Self::new(mk(Platform::MetaAds)?, mk(Platform::GoogleAds)?, mk(Platform::Shopify)?))
    }

    pub fn get(&self, platform: Platform) -> &PlatformSource { self.sources.get(platform) }

    pub fn iter(&self) -> impl Iterator<Item = &PlatformSource> {
        Platform::ALL.into_iter().map(move |p| self.sources.get(p))
    }
}

/// One value per platform, serialized under the platform payload keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerPlatform<T> {
    #[serde(default)]
    pub meta: T,
    #[serde(default)]
    pub google: T,
    #[serde(default)]
    pub shopify: T,
}

impl<T> PerPlatform<T> {
    pub fn get(&self, p: Platform) -> &T {
        match p {
            Platform::MetaAds => &self.meta,
            Platform::GoogleAds => &self.google,
            Platform::Shopify => &self.shopify,
        }
    }

    pub fn get_mut(&mut self, p: Platform) -> &mut T {
        match p {
            Platform::MetaAds => &mut self.meta,
            Platform::GoogleAds => &mut self.google,
            Platform::Shopify => &mut self.shopify,
        }
    }

    pub fn take(&mut self, p: Platform) -> T
    where
        T: Default,
    {
        std::mem::take(self.get_mut(p))
    }
}
