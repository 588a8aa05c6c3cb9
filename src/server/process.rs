use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::pipeline::process::types::{ProcessBody, ProcessingSummary};
use crate::pipeline::process::{process_all, run_streamed};
use crate::progress::ProgressEmitter;

use super::error::ApiError;
use super::sse::event_stream;
use super::AppState;

/// POST /api/process-phase3
pub async fn process_phase3(
    State(state): State<AppState>,
    body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<ProcessingSummary>, ApiError> {
    let Json(body) = body?;
    let req = body.validate(&state.pipeline.settings)?;
    Ok(Json(process_all(&state.pipeline, req, &ProgressEmitter::disabled()).await))
}

/// POST /api/process-phase3-streaming
pub async fn process_phase3_streaming(
    State(state): State<AppState>,
    body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let req = body.validate(&state.pipeline.settings)?;
    let (emitter, rx) = ProgressEmitter::channel();
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        run_streamed(pipeline, req, emitter).await;
    });
    Ok(event_stream(rx))
}
