//! HTTP endpoints
//!
//! The SSE contract is preserved even for rejected requests: a
//! missing or empty query yields an `error` + `end` event pair on a
//! 200 event-stream response, never an HTTP error status.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::{metrics_handler, record_request};
use crate::proxy::{self, ErrorKind};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/generate_stream",
            get(generate_stream_get).post(generate_stream_post),
        )
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    query: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    query: Option<String>,
    session_id: Option<String>,
}

/// Client-facing variant
async fn generate_stream_get(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> Response {
    record_request("generate_stream_get");
    start_stream(state, params.query, params.session_id)
}

/// Service variant, the surface the upstream proxy calls
async fn generate_stream_post(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    record_request("generate_stream_post");
    start_stream(state, request.query, request.session_id)
}

fn start_stream(state: AppState, query: Option<String>, session_id: Option<String>) -> Response {
    let query = match query {
        Some(q) if !q.trim().is_empty() => q,
        _ => {
            return sse_response(proxy::failure_stream(
                ErrorKind::Validation,
                "Missing required parameter: query",
            ))
        }
    };

    let session = match state.sessions.get_or_create(session_id.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Could not open session");
            return sse_response(proxy::failure_stream(ErrorKind::Internal, e.to_string()));
        }
    };
    session.touch();

    if state.settings.upstream.enabled {
        sse_response(proxy::upstream_stream(state, session.id.clone(), query))
    } else {
        sse_response(proxy::direct_stream(state, session, query))
    }
}

fn sse_response(
    stream: impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let model_available = state.generator.is_available().await;
    Json(serde_json::json!({
        "status": if model_available { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.generator.model_name(),
        "model_available": model_available,
        "retrieval_enabled": state.retriever.is_some(),
        "sessions": state.sessions.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use guideline_rag_config::Settings;
    use guideline_rag_llm::{LocalBackend, PromptBuilder, StreamingGenerator, TokenIter};
    use guideline_rag_persistence::{InMemoryInteractionStore, InteractionStore};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let backend = Arc::new(LocalBackend::new("stub", |_| {
            let iter: TokenIter = Box::new(vec![Ok("hi".to_string())].into_iter());
            Ok(iter)
        }));
        let generator = Arc::new(StreamingGenerator::new(backend, PromptBuilder::new(), true));
        let interactions: Arc<dyn InteractionStore> = Arc::new(InMemoryInteractionStore::new());
        AppState::new(Arc::new(Settings::new()), generator, interactions)
    }

    #[tokio::test]
    async fn test_missing_query_yields_sse_error_pair_not_http_error() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/generate_stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("\"error\":\"validation_error\""));
        assert!(body.contains("event: end"));
    }

    #[tokio::test]
    async fn test_generate_stream_success() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/generate_stream?query=what%20is%20the%20dose")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("event: init"));
        assert!(body.contains("\"token\":\"hi\""));
        assert_eq!(body.matches("event: end").count(), 1);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["model_available"], true);
        assert_eq!(value["retrieval_enabled"], false);
    }
}
