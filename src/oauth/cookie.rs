//! Cookie token store
//!
//! Tokens live only in the user agent: the access token in a plain
//! cookie readable by client code, the refresh token in an `HttpOnly`
//! one. Every write also patches the in-flight request so later
//! handlers of the same request see the new tokens.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::Response,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::trace;

use crate::config::CookieConfig;
use crate::oauth::token::IssuedAuthorization;
use crate::{Error, Result};

/// IMF-fixdate (RFC 7231 §7.1.1.1)
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Attributes of a single `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSetup<'a> {
    /// Cookie name
    pub key: &'a str,
    /// Cookie value, written as is
    pub value: &'a str,
    /// Lifetime in seconds
    pub max_age: u64,
    /// Path attribute
    pub path: &'a str,
    /// Domain attribute
    pub domain: Option<&'a str>,
    /// Secure flag
    pub secure: bool,
    /// HttpOnly flag
    pub http_only: bool,
}

impl CookieSetup<'_> {
    /// Render the `Set-Cookie` header value
    ///
    /// `Expires` mirrors `Max-Age` for user agents that ignore the latter;
    /// a zero lifetime expires at the epoch.
    #[must_use]
    pub fn to_header_string(&self, now: DateTime<Utc>) -> String {
        let mut cookie = format!("{}={}; Max-Age={}", self.key, self.value, self.max_age);

        let expires = if self.max_age == 0 {
            Some(DateTime::UNIX_EPOCH)
        } else {
            i64::try_from(self.max_age)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta))
        };
        if let Some(expires) = expires {
            cookie.push_str("; Expires=");
            cookie.push_str(&expires.format(IMF_FIXDATE).to_string());
        }

        cookie.push_str("; Path=");
        cookie.push_str(self.path);

        if let Some(domain) = self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }

        cookie
    }
}

/// Parse every `Cookie` header of a request into a name/value map
///
/// Pairs are split on `;`, names and values are trimmed and surrounding
/// double quotes are dropped. A later pair wins over an earlier one with
/// the same name, so values appended by [`patch_request_cookie`] shadow
/// the originals.
#[must_use]
pub fn parse_request_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            cookies.insert(key.to_string(), value.to_string());
        }
    }

    cookies
}

/// Append `key=value` to the request `Cookie` header
///
/// Multiple `Cookie` headers are folded into one.
pub fn patch_request_cookie(headers: &mut HeaderMap, key: &str, value: &str) -> Result<()> {
    let mut cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    if !cookie.is_empty() {
        cookie.push_str("; ");
    }
    cookie.push_str(key);
    cookie.push('=');
    cookie.push_str(value);

    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|_| Error::InvalidAuthorization(format!("Cookie \"{key}\" has an invalid value")))?;
    headers.insert(header::COOKIE, cookie);
    Ok(())
}

/// Tokens issued earlier in the same request
///
/// Inserted into the request extensions next to the patched `Cookie`
/// header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveTokens {
    /// Access token just issued
    pub access_token: Option<String>,
    /// Refresh token just issued
    pub refresh_token: Option<String>,
}

/// `Set-Cookie` values collected while handling a request
#[derive(Debug, Default)]
#[must_use]
pub struct CookieWrites(Vec<HeaderValue>);

impl CookieWrites {
    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collected header values
    pub fn values(&self) -> &[HeaderValue] {
        &self.0
    }

    /// Append every collected `Set-Cookie` header to a response
    pub fn apply(self, response: &mut Response) {
        let headers = response.headers_mut();
        for value in self.0 {
            headers.append(header::SET_COOKIE, value);
        }
    }

    fn push(&mut self, cookie: &str) -> Result<()> {
        let value = HeaderValue::from_str(cookie)
            .map_err(|_| Error::InvalidAuthorization("Token is not a valid cookie value".to_string()))?;
        self.0.push(value);
        Ok(())
    }
}

/// Reads and writes the token cookie pair of one endpoint
#[derive(Debug, Clone)]
pub struct CookieTokenStore {
    config: Arc<CookieConfig>,
}

impl CookieTokenStore {
    /// Create a store, rejecting missing cookie names
    pub fn new(config: CookieConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Cookie configuration
    #[must_use]
    pub fn config(&self) -> &CookieConfig {
        &self.config
    }

    /// Access token from the request cookies
    #[must_use]
    pub fn access_token(&self, headers: &HeaderMap) -> Option<String> {
        parse_request_cookies(headers).remove(&self.config.access_token_name)
    }

    /// Refresh token from the request cookies
    #[must_use]
    pub fn refresh_token(&self, headers: &HeaderMap) -> Option<String> {
        parse_request_cookies(headers).remove(&self.config.refresh_token_name)
    }

    /// Persist an issued authorization
    ///
    /// The access cookie lives for `expires_in` seconds when the server sent
    /// it, otherwise for the configured default. The refresh cookie is only
    /// written when a refresh token was issued.
    pub fn persist(&self, parts: &mut Parts, authorization: &IssuedAuthorization) -> Result<CookieWrites> {
        let now = Utc::now();
        let config = &self.config;
        let mut writes = CookieWrites::default();

        let access = CookieSetup {
            key: &config.access_token_name,
            value: &authorization.access_token,
            max_age: authorization
                .expires_in
                .unwrap_or(config.access_token_expires_in),
            path: config.path(),
            domain: config.domain(),
            secure: config.secure.unwrap_or(false),
            http_only: false,
        };
        writes.push(&access.to_header_string(now))?;
        patch_request_cookie(&mut parts.headers, access.key, access.value)?;
        trace!(cookie = access.key, max_age = access.max_age, "Access token cookie set");

        if let Some(refresh_token) = authorization.refresh_token.as_deref() {
            let refresh = CookieSetup {
                key: &config.refresh_token_name,
                value: refresh_token,
                max_age: config.refresh_token_expires_in,
                http_only: true,
                ..access
            };
            writes.push(&refresh.to_header_string(now))?;
            patch_request_cookie(&mut parts.headers, refresh.key, refresh.value)?;
            trace!(cookie = refresh.key, "Refresh token cookie set");
        }

        let mut effective = parts.extensions.remove::<EffectiveTokens>().unwrap_or_default();
        effective.access_token = Some(authorization.access_token.clone());
        if authorization.refresh_token.is_some() {
            effective.refresh_token.clone_from(&authorization.refresh_token);
        }
        parts.extensions.insert(effective);

        Ok(writes)
    }

    /// Expire the token cookies present and non-empty in the request
    pub fn clear(&self, headers: &HeaderMap) -> Result<CookieWrites> {
        let cookies = parse_request_cookies(headers);
        let config = &self.config;
        let mut writes = CookieWrites::default();

        for key in [&config.access_token_name, &config.refresh_token_name] {
            if cookies.get(key).is_none_or(String::is_empty) {
                continue;
            }
            let expired = CookieSetup {
                key,
                value: "",
                max_age: 0,
                path: config.path(),
                domain: config.domain(),
                secure: false,
                http_only: false,
            };
            writes.push(&expired.to_header_string(Utc::now()))?;
            trace!(cookie = %key, "Token cookie cleared");
        }

        Ok(writes)
    }
}
