//! Resource server client
//!
//! Decorates calls to a protected resource server with the bearer token
//! stored by a grant flow endpoint (RFC 6750 §2.1). A missing or rejected
//! token turns into a re-authorization redirect instead of an error.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header, request::Parts};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ResourceServerConfig;
use crate::http::{parse_content, refresh_path, remove_path, with_query};
use crate::oauth::cookie::parse_request_cookies;
use crate::{Error, Result};

/// Field carrying the location to come back to
const FIELD_RETURN_URI: &str = "return_uri";

/// Inbound request state a resource call is made on behalf of
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Current path and query
    pub location: String,
    /// Inbound headers (cookies are read from here)
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Create a context for a location and headers
    pub fn new(location: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            location: location.into(),
            headers,
        }
    }

    /// Create a context from an inbound request
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(location_of(&parts.uri), parts.headers.clone())
    }
}

/// Path and query of a URI, without scheme and authority
fn location_of(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string)
}

/// Call to a resource server
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// HTTP method
    pub method: Method,
    /// Path on the resource server, may carry a query
    pub path: String,
    /// Extra headers
    pub headers: HeaderMap,
    /// Query parameters for GET, JSON body otherwise
    pub data: Option<Value>,
}

impl ResourceRequest {
    /// Create a request without headers or data
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            data: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Attach data
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of a resource call
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOutcome {
    /// Response content
    Data(Value),
    /// The user agent must be sent to this location to re-authorize
    NeedsReauth(String),
}

/// Client for one protected resource server
#[derive(Debug, Clone)]
pub struct ResourceServerClient {
    config: Arc<ResourceServerConfig>,
    http_client: Client,
}

impl ResourceServerClient {
    /// Create a client with its own HTTP client honoring `unsafe_https`
    pub fn new(config: ResourceServerConfig) -> Result<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(config.unsafe_https)
            .build()?;
        Self::with_client(http_client, config)
    }

    /// Create a client around an existing HTTP client
    pub fn with_client(http_client: Client, config: ResourceServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    /// Resource server configuration
    #[must_use]
    pub fn config(&self) -> &ResourceServerConfig {
        &self.config
    }

    /// Current access token
    #[must_use]
    pub fn token(&self, context: &RequestContext) -> Option<String> {
        parse_request_cookies(&context.headers).remove(&self.config.endpoint.access_token_name)
    }

    /// Whether the user agent holds a non-empty access token
    #[must_use]
    pub fn is_authorized(&self, context: &RequestContext) -> bool {
        self.token(context).is_some_and(|token| !token.is_empty())
    }

    /// Location that refreshes the token and comes back to the current page
    #[must_use]
    pub fn refresh_authorization(&self, context: &RequestContext) -> String {
        with_query(
            &refresh_path(&self.config.endpoint.name),
            &[(FIELD_RETURN_URI, &context.location)],
        )
    }

    /// Location that drops the tokens and comes back to the current page
    #[must_use]
    pub fn remove_authorization(&self, context: &RequestContext) -> String {
        let token = self.token(context);
        let mut params = Vec::with_capacity(2);
        if let Some(token) = token.as_deref() {
            params.push(("token", token));
        }
        params.push((FIELD_RETURN_URI, context.location.as_str()));

        with_query(&remove_path(&self.config.endpoint.name), &params)
    }

    /// Call the resource server on behalf of the user agent
    ///
    /// Without a token nothing is sent and the outcome is the refresh
    /// redirect. A 401 answer yields the same redirect.
    pub async fn request(
        &self,
        context: &RequestContext,
        request: ResourceRequest,
    ) -> Result<ResourceOutcome> {
        let Some(token) = self.token(context) else {
            debug!(endpoint = %self.config.endpoint.name, "No access token, refreshing");
            return Ok(ResourceOutcome::NeedsReauth(self.refresh_authorization(context)));
        };

        let url = self.url_for(&request)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::BadRequest("Access token is not a valid header value".to_string()))?;

        let mut headers = request.headers;
        headers.insert(header::AUTHORIZATION, bearer);

        let mut builder = self
            .http_client
            .request(request.method.clone(), url.as_str())
            .headers(headers);
        if request.method != Method::GET
            && let Some(data) = &request.data
        {
            builder = builder.json(data);
        }

        debug!(method = %request.method, url = %url, "Calling resource server");
        let response = builder.send().await?;
        let status = response.status();
        let content = parse_content(&response.text().await?);

        if (200..400).contains(&status.as_u16()) {
            return Ok(ResourceOutcome::Data(content));
        }

        if status == StatusCode::UNAUTHORIZED {
            info!(url = %url, "Access token rejected, refreshing");
            return Ok(ResourceOutcome::NeedsReauth(self.refresh_authorization(context)));
        }

        warn!(url = %url, status = status.as_u16(), "Resource server error");
        Err(Error::Upstream {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Unknown status").to_string(),
            details: Some(content),
        })
    }

    fn url_for(&self, request: &ResourceRequest) -> Result<url::Url> {
        let base = self.config.host.trim_end_matches('/');
        let path = request.path.trim_start_matches('/');
        let mut url = url::Url::parse(&format!("{base}/{path}"))?;

        if request.method == Method::GET
            && let Some(Value::Object(fields)) = &request.data
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in fields {
                match value {
                    Value::String(s) => query.append_pair(key, s),
                    Value::Null => query.append_key_only(key),
                    other => query.append_pair(key, &other.to_string()),
                };
            }
        }

        Ok(url)
    }
}
