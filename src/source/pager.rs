use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::Instrument;

use crate::model::{DateRange, ObservedRange, Row};
use crate::platform::PlatformSource;
use crate::telemetry::{self};
use crate::telemetry::ops::retrieve::Phase as RetrievePhase;

use super::RowSource;

#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub page_size: i64,
    pub page_timeout: Duration,
}

/// Rows of one platform read to exhaustion.
#[derive(Debug, Clone)]
pub struct PlatformRows {
    pub rows: Vec<Row>,
    pub pages: usize,
    pub observed: ObservedRange,
}

/// Cumulative state reported after every page.
#[derive(Debug, Clone, Copy)]
pub struct PageTick {
    pub page: usize,
    pub page_rows: usize,
    pub rows_fetched: usize,
}

/// Read every row of `source` within `range`, one page at a time.
/// A short page ends the loop; a full page asks for the next offset. Any failed or
/// timed-out page fails the whole platform and nothing read so far is returned.
pub async fn read_platform<F>(
    store: &dyn RowSource,
    source: &PlatformSource,
    range: &DateRange,
    opts: PageOptions,
    mut on_page: F,
) -> Result<PlatformRows>
where
    F: FnMut(PageTick),
{
    let log = telemetry::retrieve();
    let page_size = opts.page_size.max(1);
    let mut rows: Vec<Row> = Vec::new();
    let mut offset = 0i64;
    let mut page = 0usize;
    loop {
        let span = log.span_kv(&RetrievePhase::FetchPage, [
            ("platform", source.platform.key().to_string()),
            ("offset", offset.to_string()),
            ("limit", page_size.to_string()),
        ]);
        let fut = store.fetch_page(source, range, offset, page_size);
        let batch = match tokio::time::timeout(opts.page_timeout, fut).instrument(span).await {
            Ok(res) => res.map_err(|e| e.context(format!("page {} (offset {}) of {}", page + 1, offset, source.table)))?,
            Err(_) => return Err(anyhow!("page {} (offset {}) of {} timed out after {:?}", page + 1, offset, source.table, opts.page_timeout)),
        };
        let n = batch.len();
        page += 1;
        rows.extend(batch);
        on_page(PageTick { page, page_rows: n, rows_fetched: rows.len() });
        log.debug(format!("📄 {} page {} — {} row(s) (total={})", source.platform, page, n, rows.len()));
        if (n as i64) < page_size { break; }
        offset += page_size;
    }
    let observed = ObservedRange::from_rows(&rows, &source.date_column);
    Ok(PlatformRows { rows, pages: page, observed })
}
