//! HTTP router and handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::flows::FlowRegistry;
use crate::http::{json_response, read_body_limited, redirect_response};
use crate::oauth::{RequestContext, ResourceOutcome, ResourceRequest, ResourceServerClient};
use crate::{Error, Result};

/// Upper bound of a JSON body forwarded to a resource server
const MAX_PROXY_BODY: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Resource server clients by name
    pub resource_servers: BTreeMap<String, ResourceServerClient>,
}

/// Create the router
pub fn create_router(registry: &FlowRegistry, state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/resources/{server}/{*path}", any(resource_handler))
        .merge(registry.router());

    registry
        .layer_middlewares(router)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Forward a request to a resource server on behalf of the user agent
async fn resource_handler(
    State(state): State<Arc<AppState>>,
    Path((server, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    match proxy_resource(&state, &server, &path, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(server = %server, path = %path, error = %e, "Resource request failed");
            e.into_response()
        }
    }
}

async fn proxy_resource(
    state: &AppState,
    server: &str,
    path: &str,
    request: Request,
) -> Result<Response> {
    let client = state
        .resource_servers
        .get(server)
        .ok_or_else(|| Error::NotFound(format!("Resource server \"{server}\" not found")))?;

    let (parts, body) = request.into_parts();
    let context = RequestContext::from_parts(&parts);

    let target = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut resource_request = ResourceRequest::new(parts.method.clone(), target);
    if let Some(accept) = parts.headers.get(header::ACCEPT) {
        resource_request.headers.insert(header::ACCEPT, accept.clone());
    }

    if parts.method != Method::GET && is_json(&parts.headers) {
        let body = read_body_limited(body, MAX_PROXY_BODY).await?;
        if !body.is_empty() {
            resource_request.data = Some(serde_json::from_slice(&body)?);
        }
    }

    debug!(server = %server, method = %parts.method, path = %path, "Proxying resource request");
    match client.request(&context, resource_request).await? {
        ResourceOutcome::Data(content) => Ok(json_response(StatusCode::OK, &content)),
        ResourceOutcome::NeedsReauth(location) => redirect_response(&location),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}
