use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Process;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, LoadInput, Batch, EngineCall, Merge, Export }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::LoadInput => "load_input",
        Phase::Batch => "batch",
        Phase::EngineCall => "engine_call",
        Phase::Merge => "merge",
        Phase::Export => "export",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::LoadInput => info_span!("load_input"),
        Phase::Batch => info_span!("batch"),
        Phase::EngineCall => info_span!("engine_call"),
        Phase::Merge => info_span!("merge"),
        Phase::Export => info_span!("export"),
    }}
}

impl OpMarker for Process {
    const NAME: &'static str = "process";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("process") }
}
