use anyhow::Result;
use async_trait::async_trait;

use crate::model::{DateRange, Row};
use crate::platform::PlatformSource;

pub mod pager;
pub mod pg;
pub mod rest;

/// A store that can answer count and offset/limit page queries for a platform table,
/// filtered to `date_column ∈ [start, end]` and ordered ascending by it.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn count(&self, source: &PlatformSource, range: &DateRange) -> Result<i64>;

    async fn fetch_page(&self, source: &PlatformSource, range: &DateRange, offset: i64, limit: i64) -> Result<Vec<Row>>;

    fn backend(&self) -> &'static str;
}
