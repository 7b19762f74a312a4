//! HTTP debug surface
//!
//! ```text
//! GET /api/v0/health              agent status and node health summary
//! GET /api/v0/components          every node, nested modules included
//! GET /api/v0/components/{id}     one node by global id (`module/path/local.id`)
//! ANY /api/v0/component/{id}/...  a component's own handler
//! ```

use std::convert::Infallible;

use axum::{
    extract::{Path, Request, State},
    response::Response,
    routing::{any, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use flow_engine::{Flow, NodeInfo};
use flow_types::GlobalId;
use serde::Serialize;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub flow: Flow,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/components", get(list_components))
        .route("/components/*id", get(get_component))
        .route("/component/*path", any(component_handler));

    let router = Router::new()
        .nest("/api/v0", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };
    router.with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_secs: i64,
    pub nodes: usize,
    pub unhealthy: Vec<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let nodes = state.flow.list_all().await;
    let unhealthy: Vec<String> = nodes
        .iter()
        .filter(|n| !n.health.is_healthy())
        .map(|n| n.id.clone())
        .collect();

    Json(HealthResponse {
        status: if unhealthy.is_empty() { "healthy" } else { "degraded" },
        version: state.version.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        nodes: nodes.len(),
        unhealthy,
    })
}

async fn list_components(State(state): State<AppState>) -> Json<Vec<NodeInfo>> {
    Json(state.flow.list_all().await)
}

async fn get_component(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NodeInfo>> {
    let id = GlobalId::parse(&id);
    let info = state
        .flow
        .node_info(id.module.as_str(), id.node.as_str())
        .await?;
    Ok(Json(info))
}

/// Forward to the handler of the component whose global id prefixes `path`.
async fn component_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let (id, router) = state
        .flow
        .handlers()
        .await
        .into_iter()
        .map(|(id, router)| (id.to_string(), router))
        .filter(|(id, _)| path == *id || path.starts_with(&format!("{id}/")))
        .max_by_key(|(id, _)| id.len())
        .ok_or_else(|| ApiError::NotFound(format!("no component handler for {path}")))?;

    let rest = match &path[id.len()..] {
        "" => "/",
        rest => rest,
    };
    let (mut parts, body) = request.into_parts();
    let query = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    parts.uri = format!("{rest}{query}")
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid path {rest:?}: {e}")))?;

    tracing::debug!(component = %id, path = %rest, "Forwarding to component handler");
    router
        .oneshot(Request::from_parts(parts, body))
        .await
        .map_err(|e: Infallible| match e {})
}
