use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::model::{DateRange, ObservedRange};
use crate::pipeline::process::types::ProcessingSummary;
use crate::pipeline::retrieve::types::RetrievalSummary;
use crate::platform::Platform;

/// Terminal payload of a successful run.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunSummary {
    Retrieval(Box<RetrievalSummary>),
    Processing(Box<ProcessingSummary>),
}

/// Ordered notifications of one retrieval or processing run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Start {
        run_id: String,
        message: String,
        date_range: DateRange,
        platforms: Vec<Platform>,
    },
    Estimation {
        platform: Platform,
        estimated_rows: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "estimation_complete")]
    EstimationComplete {
        total_estimated: i64,
    },
    PlatformStart {
        platform: Platform,
        estimated_rows: Option<i64>,
    },
    PlatformProgress {
        platform: Platform,
        page: usize,
        rows_fetched: usize,
        percent: Option<f64>,
        rows_per_second: f64,
        eta_seconds: Option<f64>,
    },
    PlatformComplete {
        platform: Platform,
        row_count: usize,
        duration_ms: u128,
        #[serde(skip_serializing_if = "Option::is_none")]
        date_range_actual: Option<ObservedRange>,
    },
    PlatformError {
        platform: Platform,
        error: String,
    },
    BatchStart {
        platform: Platform,
        batch: usize,
        total_batches: usize,
        rows: usize,
    },
    BatchComplete {
        platform: Platform,
        batch: usize,
        total_batches: usize,
        top_level: usize,
        ad_set_level: usize,
        ad_level: usize,
    },
    BatchError {
        platform: Platform,
        batch: usize,
        total_batches: usize,
        error: String,
    },
    Complete {
        summary: RunSummary,
    },
    Error {
        message: String,
        details: String,
    },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Estimation { .. } => "estimation",
            ProgressEvent::EstimationComplete { .. } => "estimation_complete",
            ProgressEvent::PlatformStart { .. } => "platformStart",
            ProgressEvent::PlatformProgress { .. } => "platformProgress",
            ProgressEvent::PlatformComplete { .. } => "platformComplete",
            ProgressEvent::PlatformError { .. } => "platformError",
            ProgressEvent::BatchStart { .. } => "batchStart",
            ProgressEvent::BatchComplete { .. } => "batchComplete",
            ProgressEvent::BatchError { .. } => "batchError",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Push side of a run's event stream. Emission never blocks and never fails the run:
/// once the consumer is gone further events are dropped.
pub struct ProgressEmitter {
    tx: Option<UnboundedSender<ProgressEvent>>,
    closed: AtomicBool,
}

impl ProgressEmitter {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx), closed: AtomicBool::new(false) }, rx)
    }

    /// Emitter for runs nobody listens to (CLI apply without streaming, cached paths).
    pub fn disabled() -> Self {
        Self { tx: None, closed: AtomicBool::new(true) }
    }

    pub fn emit(&self, ev: ProgressEvent) {
        let Some(tx) = &self.tx else { return };
        if self.closed.load(Ordering::Relaxed) { return; }
        let kind = ev.kind();
        if tx.send(ev).is_err() {
            self.closed.store(true, Ordering::Relaxed);
            tracing::debug!(event = kind, "progress consumer gone; dropping further events");
        }
    }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Relaxed) }
}

/// Throughput / ETA bookkeeping for one platform read.
pub struct RateTracker {
    started: Instant,
    expected: Option<i64>,
}

pub struct RateSample {
    pub percent: Option<f64>,
    pub rows_per_second: f64,
    pub eta_seconds: Option<f64>,
}

impl RateTracker {
    pub fn start(expected: Option<i64>) -> Self { Self { started: Instant::now(), expected } }

    pub fn elapsed_ms(&self) -> u128 { self.started.elapsed().as_millis() }

    pub fn sample(&self, done: usize) -> RateSample {
        compute_rate(done, self.started.elapsed().as_secs_f64(), self.expected)
    }
}

fn compute_rate(done: usize, elapsed_secs: f64, expected: Option<i64>) -> RateSample {
    let rows_per_second = if elapsed_secs > 0.0 { done as f64 / elapsed_secs } else { 0.0 };
    let expected = expected.filter(|e| *e > 0).map(|e| e as f64);
    let percent = expected.map(|e| ((done as f64 / e) * 100.0).min(100.0));
    let eta_seconds = match expected {
        Some(e) if rows_per_second > 0.0 => Some(((e - done as f64).max(0.0)) / rows_per_second),
        _ => None,
    };
    RateSample { percent, rows_per_second, eta_seconds }
}
