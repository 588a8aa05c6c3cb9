use anyhow::Result;
use serde::Serialize;
use std::marker::PhantomData;
use tracing::{info, debug, warn, error, Span};

use crate::output::types::{Envelope, Meta};
use crate::output::Emitter;
use crate::platform::Platform;

pub trait PhaseSpan {
    fn name(&self) -> &'static str;
    fn span(&self) -> Span;
}

pub trait OpMarker {
    const NAME: &'static str;
    type Phase: PhaseSpan;
    fn root_span() -> Span;
}

pub struct LogCtx<O: OpMarker> {
    pub(crate) json: bool,
    pub(crate) _marker: PhantomData<O>,
}

impl<O: OpMarker> LogCtx<O> {
    fn op_name(&self) -> &'static str { O::NAME }

    pub fn root_span(&self) -> Span { O::root_span() }

    pub fn root_span_kv<'a, T>(&self, fields: T) -> Span
    where
        T: IntoIterator<Item = (&'a str, String)>,
    {
        let span = self.root_span();
        let details = kv_to_string(fields);
        if details.is_empty() {
            info!(op = %self.op_name(), "start");
        } else {
            info!(op = %self.op_name(), details = %details, "start");
        }
        span
    }

    pub fn span(&self, ph: &O::Phase) -> Span { ph.span() }

    pub fn span_kv<'a, T>(&self, ph: &O::Phase, fields: T) -> Span
    where
        T: IntoIterator<Item = (&'a str, String)>,
    {
        let span = self.span(ph);
        let details = kv_to_string(fields);
        if !details.is_empty() {
            debug!(op = %self.op_name(), phase = ph.name(), details = %details, "span_start");
        }
        span
    }

    pub fn info(&self, msg: impl AsRef<str>) { if self.json { info!(op = %self.op_name(), "{}", msg.as_ref()); } else { info!("{}", msg.as_ref()); } }
    pub fn debug(&self, msg: impl AsRef<str>) { if self.json { debug!(op = %self.op_name(), "{}", msg.as_ref()); } else { debug!("{}", msg.as_ref()); } }
    pub fn warn(&self, msg: impl AsRef<str>) { if self.json { warn!(op = %self.op_name(), "{}", msg.as_ref()); } else { warn!("{}", msg.as_ref()); } }
    pub fn error(&self, msg: impl AsRef<str>) { if self.json { error!(op = %self.op_name(), "{}", msg.as_ref()); } else { error!("{}", msg.as_ref()); } }

    pub fn warn_kv<'a, D>(&self, msg: &str, kv: D)
    where
        D: IntoIterator<Item = (&'a str, String)>,
    {
        if self.json { let details = kv_to_string(kv); warn!(op = %self.op_name(), details = %details, "{}", msg); }
        else { warn!("{}", msg); }
    }

    pub fn plan<T: Serialize>(&self, plan: &T) -> Result<()> {
        let env = Envelope::plan(self.op_name(), plan, None)?;
        Emitter::from_env().emit(&env)?;
        Ok(())
    }

    pub fn result<T: Serialize>(&self, result: &T, meta: Meta) -> Result<()> {
        let env = Envelope::result(self.op_name(), result, Some(meta))?;
        Emitter::from_env().emit(&env)?;
        Ok(())
    }
}

// Retrieve-specific helpers
impl LogCtx<crate::telemetry::ops::retrieve::Retrieve> {
    pub fn platform_summary(&self, platform: Platform, rows: usize, pages: usize, duration_ms: u128) {
        if self.json { info!(op = %self.op_name(), platform = %platform, rows, pages, duration_ms, "platform_summary"); }
        else { info!("✅ {} — rows={} pages={} in {}ms", platform.label(), rows, pages, duration_ms); }
    }

    pub fn totals(&self, rows: usize, ok: usize, failed: usize) {
        if self.json { info!(op = %self.op_name(), rows, ok, failed, "retrieve_totals"); }
        else { info!("📊 Retrieve totals — rows={} platforms_ok={} platforms_failed={}", rows, ok, failed); }
    }
}

// Process-specific helpers
impl LogCtx<crate::telemetry::ops::process::Process> {
    pub fn platform_summary(&self, platform: Platform, batches: usize, failed: usize, dropped: usize) {
        if self.json { info!(op = %self.op_name(), platform = %platform, batches, failed, dropped, "platform_summary"); }
        else { info!("✅ {} — batches={} failed={} rows_dropped={}", platform.label(), batches, failed, dropped); }
    }

    pub fn totals(&self, top_level: usize, ad_set_level: usize, ad_level: usize) {
        if self.json { info!(op = %self.op_name(), top_level, ad_set_level, ad_level, "process_totals"); }
        else { info!("📊 Process totals — top_level={} adset_level={} ad_level={}", top_level, ad_set_level, ad_level); }
    }
}

fn kv_to_string<'a, T>(kv: T) -> String
where
    T: IntoIterator<Item = (&'a str, String)>,
{
    let mut parts: Vec<String> = Vec::new();
    for (k, v) in kv { parts.push(format!("{}={}", k, v)); }
    parts.join(" ")
}
