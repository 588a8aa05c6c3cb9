mod error;
mod process;
mod retrieve;
mod sse;

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Args;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::cache::TtlCache;
use crate::model::DateRange;
use crate::pipeline::retrieve::types::RetrievalSummary;
use crate::pipeline::Pipeline;
use crate::telemetry::{self};
use crate::telemetry::ops::serve::Phase as ServePhase;

/// Successful non-export retrievals keyed by range and report type.
pub type RetrievalCache = TtlCache<(DateRange, String), RetrievalSummary>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub cache: Arc<RetrievalCache>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        let cache = Arc::new(TtlCache::new(pipeline.settings.cache_ttl));
        Self { pipeline: Arc::new(pipeline), cache }
    }
}

#[derive(Args)]
pub struct ServeCmd {
    /// Listen address, e.g. 0.0.0.0:3000
    #[arg(long)] bind: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/retrieve-data", post(retrieve::retrieve_data).fallback(error::method_not_allowed))
        .route("/api/retrieve-data-stream", post(retrieve::retrieve_data_stream).fallback(error::method_not_allowed))
        .route("/api/process-phase3", post(process::process_phase3).fallback(error::method_not_allowed))
        .route("/api/process-phase3-streaming", post(process::process_phase3_streaming).fallback(error::method_not_allowed))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            telemetry::serve().span_kv(&ServePhase::Request, [
                ("method", req.method().to_string()),
                ("path", req.uri().path().to_string()),
            ])
        }))
        .with_state(state)
}

async fn health() -> Json<Value> { Json(json!({"status": "ok"})) }

pub async fn run(mut pipeline: Pipeline, args: ServeCmd) -> Result<()> {
    let log = telemetry::serve();
    if let Some(bind) = args.bind { pipeline.settings.bind = bind; }
    let bind = pipeline.settings.bind.clone();
    let root = log.root_span_kv([
        ("bind", bind.clone()),
        ("cache_ttl_secs", pipeline.settings.cache_ttl.as_secs().to_string()),
        ("output_dir", pipeline.settings.output_dir.display().to_string()),
    ]);
    if pipeline.store().is_err() {
        log.warn("⚠️  no data source configured; retrieval endpoints will fail until DATABASE_URL or SUPABASE_URL is set");
    }

    let span = log.span_kv(&ServePhase::Bind, [("addr", bind.clone())]);
    let listener = tokio::net::TcpListener::bind(&bind)
        .instrument(span)
        .await
        .with_context(|| format!("bind {}", bind))?;
    log.info(format!("🚀 adflow listening on http://{}", bind));

    let app = build_router(AppState::new(pipeline));
    axum::serve(listener, app).into_future().instrument(root).await.context("http server")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockEngine;
    use crate::pipeline::testing::pipeline;
    use crate::platform::Platform;
    use crate::source::testing::{daily_rows, MemorySource};
    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(store: Option<MemorySource>, out: &std::path::Path) -> Router {
        build_router(AppState::new(pipeline(store, Arc::new(MockEngine::new()), out)))
    }

    fn post_json(uri: &str, body: &str) -> Request {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        serde_json::from_str(&body_string(resp).await).unwrap()
    }

    fn sse_events(text: &str) -> Vec<Value> {
        text.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    const RANGE: &str = r#"{"startDate":"2024-01-01","endDate":"2024-01-31"}"#;

    #[tokio::test]
    async fn non_post_is_405() {
        let tmp = tempfile::tempdir().unwrap();
        for uri in ["/api/retrieve-data", "/api/retrieve-data-stream", "/api/process-phase3", "/api/process-phase3-streaming"] {
            let req = axum::http::Request::builder().method(Method::GET).uri(uri).body(Body::empty()).unwrap();
            let resp = app(None, tmp.path()).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{uri}");
            assert_eq!(body_json(resp).await, json!({"error": "Method not allowed"}));
        }
    }

    #[tokio::test]
    async fn bad_input_is_400() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = app(None, tmp.path()).oneshot(post_json("/api/retrieve-data", r#"{"endDate":"2024-01-31"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({"error": "startDate is required"}));

        let resp = app(None, tmp.path()).oneshot(post_json("/api/process-phase3", "{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());

        let resp = app(None, tmp.path())
            .oneshot(post_json("/api/retrieve-data-stream", r#"{"startDate":"2024-02-01","endDate":"2024-01-01"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_store_is_500() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = app(None, tmp.path()).oneshot(post_json("/api/retrieve-data", RANGE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let v = body_json(resp).await;
        assert_eq!(v["error"], "Internal server error");
        assert!(v["details"].as_str().unwrap().contains("no data source"));
    }

    #[tokio::test]
    async fn retrieve_json_is_cached_on_repeat() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new().with_rows(Platform::MetaAds, daily_rows(3, 1.0));
        let router = app(Some(store), tmp.path());

        let first = body_json(router.clone().oneshot(post_json("/api/retrieve-data", RANGE)).await.unwrap()).await;
        assert_eq!(first["success"], json!(true));
        assert_eq!(first["cached"], json!(false));
        assert_eq!(first["totalRows"], json!(3));
        assert_eq!(first["data"]["meta"].as_array().unwrap().len(), 3);

        let second = body_json(router.oneshot(post_json("/api/retrieve-data", RANGE)).await.unwrap()).await;
        assert_eq!(second["cached"], json!(true));
        assert_eq!(second["runId"], first["runId"]);
    }

    #[tokio::test]
    async fn retrieve_stream_frames_events() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemorySource::new().with_rows(Platform::Shopify, daily_rows(2, 1.0));
        let resp = app(Some(store), tmp.path()).oneshot(post_json("/api/retrieve-data-stream", RANGE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"));

        let text = body_string(resp).await;
        assert!(text.starts_with("data: {\"type\":\"start\""));
        let events = sse_events(&text);
        assert_eq!(events.first().unwrap()["type"], "start");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert_eq!(last["summary"]["totalRows"], json!(2));
    }

    #[tokio::test]
    async fn process_json_and_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let body = json!({
            "data": {"meta": daily_rows(3, 1.0), "google": [], "shopify": []},
            "dateRange": {"startDate": "2024-01-01", "endDate": "2024-01-31"},
            "options": {"chunkSize": 2, "delayMs": 0}
        })
        .to_string();

        let resp = app(None, tmp.path()).oneshot(post_json("/api/process-phase3", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["success"], json!(true));
        assert_eq!(v["counts"], json!({"topLevel": 3, "adSetLevel": 3, "adLevel": 3}));
        assert_eq!(v["platforms"][0]["batches"], json!(2));
        assert_eq!(v["files"][0]["status"], "saved");

        let resp = app(None, tmp.path()).oneshot(post_json("/api/process-phase3-streaming", &body)).await.unwrap();
        let events = sse_events(&body_string(resp).await);
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds.first(), Some(&"start"));
        assert_eq!(kinds.iter().filter(|k| **k == "batchComplete").count(), 2);
        assert_eq!(kinds.last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let req = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app(None, tmp.path()).oneshot(req).await.unwrap();
        assert_eq!(body_json(resp).await, json!({"status": "ok"}));
    }
}
