use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chatrelay::{ChatOutcome, ChatReply, ChatRequest, RequestOrchestrator};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<RequestOrchestrator>,
}

/// Identity token passed as `?t=`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    t: Option<String>,
}

pub fn router(orchestrator: Arc<RequestOrchestrator>) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/history", get(handle_history))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { orchestrator })
}

async fn handle_chat(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed chat request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ChatReply::failure(rejection.body_text())),
            )
                .into_response();
        }
    };

    match state.orchestrator.handle_chat(request, query.t).await {
        ChatOutcome::Reply(status, reply) => (status, Json(reply)).into_response(),
        ChatOutcome::Stream(fragments) => (
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(fragments.map(Ok::<_, Infallible>)),
        )
            .into_response(),
    }
}

async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    match state.orchestrator.history(query.t).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!(error = %e, "history lookup failed");
            }
            (e.status_code(), Json(json!({ "error": e.message() }))).into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
