//! HTTP helpers shared by the grant flow endpoints
//!
//! Request guards (method, content type, bounded body), JSON responses
//! and the path-only redirect used for every flow redirect.

use std::collections::HashMap;
use std::sync::LazyLock;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;

use crate::{Error, Result};

/// Form content type accepted by body-bearing flows
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Scheme prefix per RFC 3986 §3.1
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid scheme regex"));

/// Path of the primary grant resource
pub fn endpoint_path(name: &str) -> String {
    format!("/{name}")
}

/// Path of the refresh resource
pub fn refresh_path(name: &str) -> String {
    format!("/{name}/refresh")
}

/// Path of the invalidation resource
pub fn remove_path(name: &str) -> String {
    format!("/{name}/remove")
}

/// Write a JSON body with the no-store caching headers of RFC 6749 §5.1
pub fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json; charset=UTF-8"),
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        body.to_string(),
    )
        .into_response()
}

/// Check that a redirect target is a relative reference without authority
///
/// Control characters are refused outright: user agents drop tab, CR and
/// LF before parsing, so `/\t/host` would be followed as `//host`.
///
/// Returns the location with a leading slash.
pub fn safe_location(location: &str) -> Result<String> {
    if location.chars().any(char::is_control) {
        return Err(Error::Redirect(location.escape_default().to_string()));
    }

    let trimmed = location.trim_start();
    let mut leading = trimmed.chars();
    let first = leading.next();
    let second = leading.next();
    let has_authority = matches!(first, Some('\\'))
        || (first == Some('/') && matches!(second, Some('/' | '\\')));

    if SCHEME_RE.is_match(trimmed) || has_authority {
        return Err(Error::Redirect(location.to_string()));
    }

    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

/// Build a 302 redirect, refusing absolute URLs
pub fn redirect_response(location: &str) -> Result<Response> {
    let location = safe_location(location)?;
    let value = HeaderValue::from_str(&location)
        .map_err(|_| Error::Redirect(location.clone()))?;

    Ok((StatusCode::FOUND, [(header::LOCATION, value)]).into_response())
}

/// Reject requests whose method differs from `expected`
pub fn check_method(method: &Method, expected: &Method) -> Result<()> {
    if method == expected {
        Ok(())
    } else {
        Err(Error::MethodNotAllowed(static_method_name(expected)))
    }
}

fn static_method_name(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        _ => "OPTIONS",
    }
}

/// Reject requests whose media type differs from `expected`
///
/// Parameters such as `charset` are ignored.
pub fn check_content_type(headers: &HeaderMap, expected: &'static str) -> Result<()> {
    let matches = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(expected));

    if matches {
        Ok(())
    } else {
        Err(Error::NotAcceptable(expected))
    }
}

/// Read a request body, failing as soon as it grows past `limit` bytes
///
/// A body of exactly `limit` bytes is accepted.
pub async fn read_body_limited(body: Body, limit: usize) -> Result<Vec<u8>> {
    let mut stream = body.into_data_stream();
    let mut upstream = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::BadRequest(format!("Failed to read body: {e}")))?;
        if upstream.len() + chunk.len() > limit {
            return Err(Error::PayloadTooLarge(limit));
        }
        upstream.extend_from_slice(&chunk);
    }

    Ok(upstream)
}

/// Parse a response body as JSON, keeping non-JSON text as a string
///
/// An empty body is an empty object.
pub fn parse_content(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Decode the query string of a URI into a map (last value wins)
pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Append encoded query parameters to a path
pub fn with_query(path: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{path}?{query}")
}
