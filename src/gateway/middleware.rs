//! Client credentials middleware
//!
//! Every request passing through gets an access token of the client
//! itself, unless it already carries one or targets the endpoint's own
//! resources.

use std::sync::Arc;

use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use super::flow::GrantFlowEndpoint;

/// Acquire a client credentials token before calling the next handler
///
/// Mount with `axum::middleware::from_fn_with_state` over the whole router.
pub async fn client_credentials_middleware(
    State(endpoint): State<Arc<GrantFlowEndpoint>>,
    request: Request,
    next: Next,
) -> Response {
    endpoint.acquire(request, next).await
}
