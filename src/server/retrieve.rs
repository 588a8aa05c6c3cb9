use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::pipeline::retrieve::types::{RetrievalSummary, RetrieveBody};
use crate::pipeline::retrieve::{retrieve_all, run_streamed};
use crate::progress::ProgressEmitter;
use crate::telemetry::{self};

use super::error::ApiError;
use super::sse::event_stream;
use super::{AppState, RetrievalCache};

/// Partial results and export runs are not worth replaying.
fn remember(cache: &RetrievalCache, summary: &RetrievalSummary, export: bool) {
    if !summary.success || export { return; }
    let live = cache.insert((summary.date_range, summary.report_type.clone()), summary.clone());
    telemetry::serve().debug(format!("cached retrieval {} (entries={})", summary.run_id, live));
}

/// POST /api/retrieve-data
pub async fn retrieve_data(
    State(state): State<AppState>,
    body: Result<Json<RetrieveBody>, JsonRejection>,
) -> Result<Json<RetrievalSummary>, ApiError> {
    let Json(body) = body?;
    let req = body.validate(&state.pipeline.settings.report_type)?;
    let key = (req.date_range, req.report_type.clone());
    if !req.export_csv {
        if let Some(mut hit) = state.cache.get(&key) {
            hit.cached = true;
            return Ok(Json(hit));
        }
    }
    let summary = retrieve_all(&state.pipeline, &req, &ProgressEmitter::disabled())
        .await
        .map_err(ApiError::Internal)?;
    remember(&state.cache, &summary, req.export_csv);
    Ok(Json(summary))
}

/// POST /api/retrieve-data-stream
pub async fn retrieve_data_stream(
    State(state): State<AppState>,
    body: Result<Json<RetrieveBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let req = body.validate(&state.pipeline.settings.report_type)?;
    let (emitter, rx) = ProgressEmitter::channel();
    let export = req.export_csv;
    let pipeline = state.pipeline.clone();
    let cache = state.cache.clone();
    tokio::spawn(async move {
        if let Some(summary) = run_streamed(pipeline, req, emitter).await {
            remember(&cache, &summary, export);
        }
    });
    Ok(event_stream(rx))
}
