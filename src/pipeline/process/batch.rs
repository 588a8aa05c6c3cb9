use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

use crate::engine::{EngineRequest, ScoringEngine};
use crate::model::{DateRange, Row};
use crate::pipeline::process::merge::ProcessedOutput;
use crate::platform::Platform;
use crate::progress::{ProgressEmitter, ProgressEvent};
use crate::telemetry::{self};
use crate::telemetry::ops::process::Phase as ProcessPhase;

/// One engine call's worth of rows.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub platform: Platform,
    pub chunk_index: usize,
    pub rows: Vec<Row>,
}

/// Split rows into consecutive chunks of at most `chunk_size`, keeping order.
pub fn plan_jobs(platform: Platform, rows: Vec<Row>, chunk_size: usize) -> Vec<BatchJob> {
    let chunk_size = chunk_size.max(1);
    let mut jobs = Vec::with_capacity(rows.len().div_ceil(chunk_size));
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<Row> = rows.by_ref().take(chunk_size).collect();
        jobs.push(BatchJob { platform, chunk_index: jobs.len(), rows: chunk });
    }
    jobs
}

/// Keeps at least `delay` between the end of one engine call and the start of the next,
/// for the whole run.
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self { Self { delay, last: None } }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.delay).await;
        }
    }

    pub fn mark(&mut self) { self.last = Some(Instant::now()); }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub chunk_size: usize,
    pub report_type: String,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub batch: usize,
    pub rows: usize,
    pub error: String,
}

/// Per-platform outcome of a processing run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBatchReport {
    pub platform: Platform,
    pub rows_in: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub rows_dropped: usize,
    pub failures: Vec<BatchFailure>,
    #[serde(skip)]
    pub output: ProcessedOutput,
}

impl PlatformBatchReport {
    /// A platform counts as processed unless every one of its batches failed.
    pub fn success(&self) -> bool { self.batches == 0 || self.failed_batches < self.batches }
}

/// Feed one platform's rows through the engine chunk by chunk. Calls are sequential and paced;
/// a failed chunk is reported and skipped, its rows dropped.
pub async fn process_platform(
    engine: &dyn ScoringEngine,
    platform: Platform,
    rows: Vec<Row>,
    opts: &BatchOptions,
    pacer: &mut Pacer,
    emitter: &ProgressEmitter,
) -> PlatformBatchReport {
    let log = telemetry::process();
    let rows_in = rows.len();
    let jobs = plan_jobs(platform, rows, opts.chunk_size);
    let total_batches = jobs.len();
    let mut report = PlatformBatchReport {
        platform,
        rows_in,
        batches: total_batches,
        failed_batches: 0,
        rows_dropped: 0,
        failures: Vec::new(),
        output: ProcessedOutput::default(),
    };

    for job in jobs {
        let batch = job.chunk_index + 1;
        let n = job.rows.len();
        emitter.emit(ProgressEvent::BatchStart { platform, batch, total_batches, rows: n });

        pacer.wait().await;
        let request = EngineRequest::single(platform, job.rows, opts.date_range, &opts.report_type);
        let span = log.span_kv(&ProcessPhase::EngineCall, [
            ("platform", platform.key().to_string()),
            ("batch", format!("{}/{}", batch, total_batches)),
            ("rows", request.row_count().to_string()),
        ]);
        let outcome = engine.score(&request).instrument(span).await;
        pacer.mark();

        match outcome {
            Ok(out) => {
                let counts = out.counts();
                report.output.merge(out);
                log.debug(format!("🧮 {} batch {}/{} — {} row(s) scored", platform, batch, total_batches, n));
                emitter.emit(ProgressEvent::BatchComplete {
                    platform,
                    batch,
                    total_batches,
                    top_level: counts.top_level,
                    ad_set_level: counts.ad_set_level,
                    ad_level: counts.ad_level,
                });
            }
            Err(e) => {
                report.failed_batches += 1;
                report.rows_dropped += n;
                log.warn_kv(&format!("⚠️  {} batch {}/{} failed: {}", platform, batch, total_batches, e), [
                    ("platform", platform.key().to_string()),
                    ("batch", batch.to_string()),
                    ("timeout", e.is_timeout().to_string()),
                ]);
                report.failures.push(BatchFailure { batch, rows: n, error: e.to_string() });
                emitter.emit(ProgressEvent::BatchError { platform, batch, total_batches, error: e.to_string() });
            }
        }
    }
    report
}
