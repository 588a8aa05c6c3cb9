pub mod config;
pub mod ctx;
pub mod ops;

use ctx::LogCtx;

// Factory helpers, one typed context per operation
pub fn retrieve() -> LogCtx<ops::retrieve::Retrieve> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn process() -> LogCtx<ops::process::Process> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn serve() -> LogCtx<ops::serve::Serve> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
