pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::Instrument;

use crate::model::DateRange;
use crate::output::types::Meta;
use crate::pipeline::export::export_raw;
use crate::pipeline::{new_run_id, Pipeline};
use crate::platform::{PerPlatform, Platform};
use crate::progress::{ProgressEmitter, ProgressEvent, RateTracker, RunSummary};
use crate::source::pager::{read_platform, PageOptions};
use crate::telemetry::{self};
use crate::telemetry::ops::retrieve::Phase as RetrievePhase;

use self::types::{PlannedPlatform, PlatformReport, RetrievalPlan, RetrievalRequest, RetrievalSummary, RetrieveBody};

#[derive(Args)]
pub struct RetrieveCmd {
    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long)] start: String,
    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)] end: String,
    #[arg(long)] report_type: Option<String>,
    #[arg(long)] page_size: Option<i64>,
    /// Also write one raw CSV per platform
    #[arg(long, default_value_t = false)] export: bool,
    /// Output directory for CSV files
    #[arg(long)] out: Option<PathBuf>,
    /// Write the full summary (rows included) as JSON, ready for `process --input`
    #[arg(long)] save: Option<PathBuf>,
    #[arg(long, default_value_t = false)] apply: bool,
}

pub async fn run(mut pipeline: Pipeline, args: RetrieveCmd) -> Result<()> {
    let log = telemetry::retrieve();
    let root = log.root_span_kv([
        ("start", args.start.clone()),
        ("end", args.end.clone()),
        ("page_size", format!("{:?}", args.page_size)),
        ("export", args.export.to_string()),
        ("apply", args.apply.to_string()),
    ]);

    if let Some(out) = args.out.clone() { pipeline.settings.output_dir = out; }
    let body = RetrieveBody {
        start_date: Some(args.start.clone()),
        end_date: Some(args.end.clone()),
        report_type: args.report_type.clone(),
        export_csv: args.export,
    };
    let mut req = body.validate(&pipeline.settings.report_type)?;
    req.page_size = args.page_size.filter(|n| *n > 0);

    if !args.apply {
        let plan = plan(&pipeline, &req).instrument(root).await?;
        log.info(format!(
            "📝 Retrieve plan — backend={} range={} page_size={} total_estimated={}",
            plan.backend, plan.date_range, plan.page_size, plan.total_estimated
        ));
        for p in &plan.platforms {
            match (&p.estimated_rows, &p.error) {
                (Some(n), _) => log.info(format!("  {:<8} {} rows in {} ({} page(s))", p.platform, n, p.table, p.estimated_pages.unwrap_or(0))),
                (None, Some(e)) => log.warn(format!("  {:<8} count failed: {}", p.platform, e)),
                (None, None) => log.info(format!("  {:<8} unknown", p.platform)),
            }
        }
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() { log.plan(&plan)?; }
        return Ok(());
    }

    let (emitter, mut rx) = ProgressEmitter::channel();
    let drain = tokio::spawn(async move {
        let log = telemetry::retrieve();
        while let Some(ev) = rx.recv().await {
            match &ev {
                ProgressEvent::PlatformProgress { platform, page, rows_fetched, percent, .. } => log.debug(format!(
                    "⏳ {} page {} — {} row(s){}",
                    platform, page, rows_fetched,
                    percent.map(|p| format!(" ({:.0}%)", p)).unwrap_or_default()
                )),
                ProgressEvent::PlatformError { platform, error } => log.warn(format!("❌ {} — {}", platform, error)),
                _ => {}
            }
        }
    });
    let summary = retrieve_all(&pipeline, &req, &emitter).instrument(root).await;
    drop(emitter);
    let _ = drain.await;
    let summary = summary?;

    if let Some(path) = &args.save {
        let body = serde_json::to_vec_pretty(&summary).context("serialize retrieval summary")?;
        tokio::fs::write(path, body).await.with_context(|| format!("write {}", path.display()))?;
        log.info(format!("💾 summary → {}", path.display()));
    }
    if telemetry::config::json_mode() {
        log.result(&summary.brief(), Meta::for_run(&summary.run_id, summary.duration_ms))?;
    }
    Ok(())
}

/// Count what each platform would return without reading rows.
pub async fn plan(pipeline: &Pipeline, req: &RetrievalRequest) -> Result<RetrievalPlan> {
    let log = telemetry::retrieve();
    let store = pipeline.store()?;
    let page_size = req.page_size.unwrap_or(pipeline.settings.page.page_size).max(1);
    let mut platforms = Vec::with_capacity(Platform::ALL.len());
    for src in pipeline.catalog().iter() {
        let span = log.span_kv(&RetrievePhase::Plan, [("platform", src.platform.key().to_string())]);
        let counted = store.count(src, &req.date_range).instrument(span).await;
        let (estimated_rows, error) = match counted {
            Ok(n) => (Some(n), None),
            Err(e) => (None, Some(format!("{:#}", e))),
        };
        platforms.push(PlannedPlatform {
            platform: src.platform,
            table: src.table.clone(),
            date_column: src.date_column.clone(),
            estimated_rows,
            // a trailing short (possibly empty) page is always read
            estimated_pages: estimated_rows.map(|n| n / page_size + 1),
            error,
        });
    }
    let total_estimated = platforms.iter().filter_map(|p| p.estimated_rows).sum();
    Ok(RetrievalPlan {
        backend: store.backend(),
        date_range: req.date_range,
        report_type: req.report_type.clone(),
        page_size,
        platforms,
        total_estimated,
    })
}

/// Read every platform for the requested range, in fixed order, reporting progress as it goes.
/// A platform that fails is recorded and skipped; only a missing data source fails the run.
pub async fn retrieve_all(pipeline: &Pipeline, req: &RetrievalRequest, emitter: &ProgressEmitter) -> Result<RetrievalSummary> {
    let log = telemetry::retrieve();
    let started = Instant::now();
    let store = pipeline.store()?;
    let range: DateRange = req.date_range;
    let page = PageOptions {
        page_size: req.page_size.unwrap_or(pipeline.settings.page.page_size).max(1),
        page_timeout: pipeline.settings.page.page_timeout,
    };
    let run_id = new_run_id();

    emitter.emit(ProgressEvent::Start {
        run_id: run_id.clone(),
        message: format!("Retrieving {} from {} for {}", req.report_type, store.backend(), range),
        date_range: range,
        platforms: Platform::ALL.to_vec(),
    });

    let mut estimates: PerPlatform<Option<i64>> = PerPlatform::default();
    for src in pipeline.catalog().iter() {
        let span = log.span_kv(&RetrievePhase::Estimate, [("platform", src.platform.key().to_string())]);
        match store.count(src, &range).instrument(span).await {
            Ok(n) => {
                *estimates.get_mut(src.platform) = Some(n);
                emitter.emit(ProgressEvent::Estimation { platform: src.platform, estimated_rows: Some(n), error: None });
            }
            Err(e) => {
                log.warn(format!("⚠️  count for {} failed: {:#}", src.platform, e));
                emitter.emit(ProgressEvent::Estimation { platform: src.platform, estimated_rows: None, error: Some(format!("{:#}", e)) });
            }
        }
    }
    let total_estimated: i64 = Platform::ALL.iter().filter_map(|p| *estimates.get(*p)).sum();
    emitter.emit(ProgressEvent::EstimationComplete { total_estimated });

    let mut data: PerPlatform<Option<Vec<_>>> = PerPlatform::default();
    let mut reports = Vec::with_capacity(Platform::ALL.len());
    let mut failures = Vec::new();
    for src in pipeline.catalog().iter() {
        let platform = src.platform;
        let expected = *estimates.get(platform);
        emitter.emit(ProgressEvent::PlatformStart { platform, estimated_rows: expected });

        let tracker = RateTracker::start(expected);
        let span = log.span_kv(&RetrievePhase::FetchPlatform, [
            ("platform", platform.key().to_string()),
            ("table", src.table.clone()),
        ]);
        let read = read_platform(store, src, &range, page, |tick| {
            let rate = tracker.sample(tick.rows_fetched);
            emitter.emit(ProgressEvent::PlatformProgress {
                platform,
                page: tick.page,
                rows_fetched: tick.rows_fetched,
                percent: rate.percent,
                rows_per_second: rate.rows_per_second,
                eta_seconds: rate.eta_seconds,
            });
        })
        .instrument(span)
        .await;
        let duration_ms = tracker.elapsed_ms();

        match read {
            Ok(out) => {
                let n = out.rows.len();
                log.platform_summary(platform, n, out.pages, duration_ms);
                emitter.emit(ProgressEvent::PlatformComplete {
                    platform,
                    row_count: n,
                    duration_ms,
                    date_range_actual: Some(out.observed.clone()),
                });
                reports.push(PlatformReport {
                    platform,
                    table: src.table.clone(),
                    success: true,
                    row_count: n,
                    total_requested: expected,
                    total_received: n,
                    pages: out.pages,
                    duration_ms,
                    date_range_actual: Some(out.observed),
                    error: None,
                });
                *data.get_mut(platform) = Some(out.rows);
            }
            Err(e) => {
                let error = format!("{:#}", e);
                log.error(format!("❌ {} failed: {}", platform.label(), error));
                emitter.emit(ProgressEvent::PlatformError { platform, error: error.clone() });
                reports.push(PlatformReport {
                    platform,
                    table: src.table.clone(),
                    success: false,
                    row_count: 0,
                    total_requested: expected,
                    total_received: 0,
                    pages: 0,
                    duration_ms,
                    date_range_actual: None,
                    error: Some(error),
                });
                failures.push(platform);
            }
        }
    }

    let mut files = Vec::new();
    if req.export_csv {
        let span = log.span(&RetrievePhase::Export);
        async {
            for p in Platform::ALL {
                if let Some(rows) = data.get(p) {
                    files.push(export_raw(&pipeline.settings.output_dir, p, rows, &range, &run_id).await);
                }
            }
        }
        .instrument(span)
        .await;
    }

    let ok = reports.iter().filter(|r| r.success).count();
    let total_rows: usize = reports.iter().map(|r| r.row_count).sum();
    log.totals(total_rows, ok, failures.len());

    Ok(RetrievalSummary {
        run_id,
        success: failures.is_empty(),
        partial_success: ok > 0,
        date_range: range,
        report_type: req.report_type.clone(),
        platforms: reports,
        data,
        failures,
        total_rows,
        duration_ms: started.elapsed().as_millis(),
        files,
        cached: false,
    })
}

/// Run a retrieval for a streaming consumer: the terminal event is `complete` or `error`.
pub async fn run_streamed(pipeline: Arc<Pipeline>, req: RetrievalRequest, emitter: ProgressEmitter) -> Option<RetrievalSummary> {
    match retrieve_all(&pipeline, &req, &emitter).await {
        Ok(summary) => {
            if emitter.is_closed() {
                tracing::debug!(run_id = %summary.run_id, "stream consumer left before the run finished");
            }
            emitter.emit(ProgressEvent::Complete { summary: RunSummary::Retrieval(Box::new(summary.clone())) });
            Some(summary)
        }
        Err(e) => {
            emitter.emit(ProgressEvent::Error { message: "Retrieval failed".into(), details: format!("{:#}", e) });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockEngine;
    use crate::pipeline::testing::pipeline;
    use crate::source::testing::{daily_rows, MemorySource};
    use serde_json::json;

    fn request(export_csv: bool) -> RetrievalRequest {
        RetrievalRequest {
            date_range: DateRange::parse(Some("2024-01-01"), Some("2024-01-31")).unwrap(),
            report_type: "comprehensive".into(),
            export_csv,
            page_size: None,
        }
    }

    async fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await { out.push(ev); }
        out
    }

    #[tokio::test]
    async fn events_follow_the_run_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new()
            .with_rows(Platform::MetaAds, daily_rows(3, 1.0))
            .with_rows(Platform::Shopify, daily_rows(1, 5.0));
        let p = Arc::new(pipeline(Some(store), Arc::new(MockEngine::new()), tmp.path()));
        let (emitter, rx) = ProgressEmitter::channel();
        let summary = run_streamed(p, request(false), emitter).await.unwrap();
        let kinds: Vec<&str> = collect(rx).await.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![
            "start",
            "estimation", "estimation", "estimation", "estimation_complete",
            // meta: 3 rows, pages of 2
            "platformStart", "platformProgress", "platformProgress", "platformComplete",
            // google: empty table, one empty page
            "platformStart", "platformProgress", "platformComplete",
            "platformStart", "platformProgress", "platformComplete",
            "complete",
        ]);
        assert!(summary.success);
        assert_eq!(summary.total_rows, 4);
        assert_eq!(summary.data.google.as_ref().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn one_failing_platform_keeps_the_others() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new()
            .with_rows(Platform::MetaAds, daily_rows(6, 1.0))
            .with_rows(Platform::GoogleAds, daily_rows(5, 1.0))
            .with_rows(Platform::Shopify, daily_rows(2, 1.0))
            .failing_page(Platform::GoogleAds, 1);
        let p = pipeline(Some(store), Arc::new(MockEngine::new()), tmp.path());
        let summary = retrieve_all(&p, &request(false), &ProgressEmitter::disabled()).await.unwrap();

        assert!(!summary.success);
        assert!(summary.partial_success);
        assert_eq!(summary.failures, vec![Platform::GoogleAds]);
        assert_eq!(summary.data.meta.as_ref().map(Vec::len), Some(6));
        assert_eq!(summary.data.shopify.as_ref().map(Vec::len), Some(2));
        assert!(summary.data.google.is_none());

        let google = serde_json::to_value(&summary.platforms[1]).unwrap();
        assert_eq!(google["success"], json!(false));
        assert_eq!(google["rowCount"], json!(0));
        assert!(google["error"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn failed_estimate_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new().with_rows(Platform::MetaAds, daily_rows(1, 1.0)).failing_count(Platform::MetaAds);
        let p = pipeline(Some(store), Arc::new(MockEngine::new()), tmp.path());
        let (emitter, rx) = ProgressEmitter::channel();
        let summary = retrieve_all(&p, &request(false), &emitter).await.unwrap();
        drop(emitter);
        let events = collect(rx).await;
        match &events[1] {
            ProgressEvent::Estimation { platform, estimated_rows, error } => {
                assert_eq!(*platform, Platform::MetaAds);
                assert_eq!(*estimated_rows, None);
                assert!(error.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(summary.platforms[0].total_requested, None);
        assert_eq!(summary.platforms[0].total_received, 1);
        assert!(summary.success);
    }

    #[tokio::test]
    async fn missing_store_ends_with_error_event() {
        let tmp = tempfile::tempdir().unwrap();
        let p = Arc::new(pipeline(None, Arc::new(MockEngine::new()), tmp.path()));
        let (emitter, rx) = ProgressEmitter::channel();
        assert!(run_streamed(p, request(false), emitter).await.is_none());
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "error");
    }

    #[tokio::test]
    async fn export_writes_raw_files_for_healthy_platforms() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new().with_rows(Platform::MetaAds, daily_rows(2, 1.5)).failing_page(Platform::Shopify, 0);
        let p = pipeline(Some(store), Arc::new(MockEngine::new()), tmp.path());
        let summary = retrieve_all(&p, &request(true), &ProgressEmitter::disabled()).await.unwrap();
        let kinds: Vec<&str> = summary.files.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["meta_raw", "google_raw"]);
        assert!(summary.files[0].is_saved());
        // google read fine but had no rows
        assert!(!summary.files[1].is_saved());
    }

    #[tokio::test]
    async fn closed_receiver_does_not_stop_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new().with_rows(Platform::GoogleAds, daily_rows(5, 1.0));
        let p = Arc::new(pipeline(Some(store), Arc::new(MockEngine::new()), tmp.path()));
        let (emitter, rx) = ProgressEmitter::channel();
        drop(rx);
        let summary = run_streamed(p, request(false), emitter).await.unwrap();
        assert_eq!(summary.total_rows, 5);
    }
}
