pub mod batch;
pub mod merge;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::Instrument;

use crate::output::types::Meta;
use crate::pipeline::export::export_levels;
use crate::pipeline::{new_run_id, Pipeline};
use crate::progress::{ProgressEmitter, ProgressEvent, RunSummary};
use crate::telemetry::{self};
use crate::telemetry::ops::process::Phase as ProcessPhase;

use self::batch::{process_platform, BatchOptions, Pacer};
use self::merge::{MergePolicy, ProcessedOutput};
use self::types::{PlannedBatches, ProcessBody, ProcessOptions, ProcessPlan, ProcessRequest, ProcessingSummary, RawDateRange};

#[derive(Args)]
pub struct ProcessCmd {
    /// JSON file with `data` and `dateRange` (a saved retrieval summary works)
    #[arg(long)] input: PathBuf,
    /// Subset of platforms to process (meta,google,shopify)
    #[arg(long, value_delimiter = ',')] platforms: Vec<String>,
    #[arg(long)] chunk_size: Option<usize>,
    #[arg(long)] delay_ms: Option<u64>,
    #[arg(long, value_enum)] merge: Option<MergePolicy>,
    #[arg(long)] report_type: Option<String>,
    /// Override the input's date range
    #[arg(long)] start: Option<String>,
    #[arg(long)] end: Option<String>,
    /// Output directory for CSV files
    #[arg(long)] out: Option<PathBuf>,
    #[arg(long, default_value_t = false)] apply: bool,
}

pub async fn run(mut pipeline: Pipeline, args: ProcessCmd) -> Result<()> {
    let log = telemetry::process();
    let root = log.root_span_kv([
        ("input", args.input.display().to_string()),
        ("platforms", args.platforms.join(",")),
        ("chunk_size", format!("{:?}", args.chunk_size)),
        ("merge", format!("{:?}", args.merge)),
        ("apply", args.apply.to_string()),
    ]);
    if let Some(out) = args.out.clone() { pipeline.settings.output_dir = out; }

    let load = log.span_kv(&ProcessPhase::LoadInput, [("input", args.input.display().to_string())]);
    let raw = tokio::fs::read(&args.input)
        .instrument(load)
        .await
        .with_context(|| format!("read {}", args.input.display()))?;
    let mut body: ProcessBody = serde_json::from_slice(&raw).with_context(|| format!("parse {}", args.input.display()))?;
    if args.start.is_some() || args.end.is_some() {
        let current = body.date_range.take().unwrap_or_default();
        body.date_range = Some(RawDateRange {
            start_date: args.start.clone().or(current.start_date),
            end_date: args.end.clone().or(current.end_date),
        });
    }
    if !args.platforms.is_empty() { body.platforms = Some(args.platforms.clone()); }
    let mut opts = body.options.take().unwrap_or_default();
    opts = ProcessOptions {
        chunk_size: args.chunk_size.or(opts.chunk_size),
        delay_ms: args.delay_ms.or(opts.delay_ms),
        report_type: args.report_type.clone().or(opts.report_type),
        merge_policy: args.merge.or(opts.merge_policy),
    };
    body.options = Some(opts);
    let req = body.validate(&pipeline.settings)?;

    if !args.apply {
        let _sp = log.span(&ProcessPhase::Plan).entered();
        let plan = plan(&req);
        log.info(format!(
            "📝 Process plan — range={} batches={} chunk_size={} delay_ms={} merge={}",
            plan.date_range, plan.total_batches, plan.chunk_size, plan.delay_ms, plan.merge_policy.as_str()
        ));
        for p in &plan.platforms {
            log.info(format!("  {} — {} row(s) in {} batch(es)", p.platform, p.rows, p.batches));
        }
        log.info("   Use --apply to execute.");
        if telemetry::config::json_mode() { log.plan(&plan)?; }
        return Ok(());
    }

    let summary = process_all(&pipeline, req, &ProgressEmitter::disabled()).instrument(root).await;
    let saved = summary.files.iter().filter(|f| f.is_saved()).count();
    log.info(format!("💾 {}/{} level file(s) written to {}", saved, summary.files.len(), pipeline.settings.output_dir.display()));
    if telemetry::config::json_mode() {
        log.result(&summary.brief(), Meta::for_run(&summary.run_id, summary.duration_ms))?;
    }
    Ok(())
}

pub fn plan(req: &ProcessRequest) -> ProcessPlan {
    let platforms: Vec<PlannedBatches> = req
        .platforms
        .iter()
        .map(|p| {
            let rows = req.data.get(*p).len();
            PlannedBatches { platform: *p, rows, batches: rows.div_ceil(req.chunk_size.max(1)) }
        })
        .collect();
    ProcessPlan {
        date_range: req.date_range,
        report_type: req.report_type.clone(),
        merge_policy: req.merge_policy,
        chunk_size: req.chunk_size,
        delay_ms: req.delay.as_millis(),
        total_batches: platforms.iter().map(|p| p.batches).sum(),
        platforms,
    }
}

/// Score every selected platform batch by batch, merge the outputs and export one CSV per level.
/// Failed batches and failed exports degrade the summary; they never abort the run.
pub async fn process_all(pipeline: &Pipeline, req: ProcessRequest, emitter: &ProgressEmitter) -> ProcessingSummary {
    let log = telemetry::process();
    let started = Instant::now();
    let run_id = new_run_id();
    let ProcessRequest { mut data, date_range, platforms, chunk_size, delay, report_type, merge_policy } = req;

    emitter.emit(ProgressEvent::Start {
        run_id: run_id.clone(),
        message: format!("Processing {} platform(s) in batches of {}", platforms.len(), chunk_size),
        date_range,
        platforms: platforms.clone(),
    });

    let opts = BatchOptions { chunk_size, report_type: report_type.clone(), date_range };
    let mut pacer = Pacer::new(delay);
    let mut merged = ProcessedOutput::default();
    let mut reports = Vec::with_capacity(platforms.len());
    for platform in platforms.iter().copied() {
        let rows = data.take(platform);
        let platform_started = Instant::now();
        emitter.emit(ProgressEvent::PlatformStart { platform, estimated_rows: Some(rows.len() as i64) });

        let span = log.span_kv(&ProcessPhase::Batch, [("platform", platform.key().to_string()), ("rows", rows.len().to_string())]);
        let mut report = process_platform(pipeline.engine.as_ref(), platform, rows, &opts, &mut pacer, emitter)
            .instrument(span)
            .await;
        merged.merge(std::mem::take(&mut report.output));
        log.platform_summary(platform, report.batches, report.failed_batches, report.rows_dropped);
        emitter.emit(ProgressEvent::PlatformComplete {
            platform,
            row_count: report.rows_in - report.rows_dropped,
            duration_ms: platform_started.elapsed().as_millis(),
            date_range_actual: None,
        });
        reports.push(report);
    }

    if merge_policy == MergePolicy::Reaggregate {
        let _sp = log.span_kv(&ProcessPhase::Merge, [("keys", pipeline.settings.reagg_keys.join(","))]).entered();
        let before = merged.counts();
        merged.reaggregate(&pipeline.settings.reagg_keys);
        log.debug(format!("🧩 re-aggregated top_level {} → {}", before.top_level, merged.counts().top_level));
    }

    if merged.is_empty() {
        log.warn("⚠️  scoring engine returned no rows");
    }
    let span = log.span(&ProcessPhase::Export);
    let files = export_levels(&pipeline.settings.output_dir, &merged, &date_range, &run_id).instrument(span).await;

    let counts = merged.counts();
    log.totals(counts.top_level, counts.ad_set_level, counts.ad_level);
    let batches: usize = reports.iter().map(|r| r.batches).sum();
    let failed: usize = reports.iter().map(|r| r.failed_batches).sum();

    ProcessingSummary {
        run_id,
        success: batches == 0 || failed < batches,
        date_range,
        report_type,
        merge_policy,
        platforms: reports,
        counts,
        results: merged,
        files,
        duration_ms: started.elapsed().as_millis(),
    }
}

/// Processing for a streaming consumer; always ends with a `complete` event.
pub async fn run_streamed(pipeline: Arc<Pipeline>, req: ProcessRequest, emitter: ProgressEmitter) -> ProcessingSummary {
    let summary = process_all(&pipeline, req, &emitter).await;
    emitter.emit(ProgressEvent::Complete { summary: RunSummary::Processing(Box::new(summary.clone())) });
    summary
}
