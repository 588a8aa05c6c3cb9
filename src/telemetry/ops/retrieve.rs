use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Retrieve;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, Estimate, FetchPlatform, FetchPage, Export }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::Estimate => "estimate",
        Phase::FetchPlatform => "fetch_platform",
        Phase::FetchPage => "fetch_page",
        Phase::Export => "export",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::Estimate => info_span!("estimate"),
        Phase::FetchPlatform => info_span!("fetch_platform"),
        Phase::FetchPage => info_span!("fetch_page"),
        Phase::Export => info_span!("export"),
    }}
}

impl OpMarker for Retrieve {
    const NAME: &'static str = "retrieve";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("retrieve") }
}
