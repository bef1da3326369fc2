//! OAuth Gateway Library
//!
//! OAuth 2.0 client role (RFC 6749) for web applications, with tokens kept
//! in user agent cookies.
//!
//! # Features
//!
//! - **Grant flows**: authorization code, client credentials, password and
//!   refresh token endpoints
//! - **Cookie token store**: access and refresh tokens as cookies, visible to
//!   the rest of the request as soon as they are issued
//! - **Invalidation**: token removal guarded against cross-site requests
//! - **Resource servers**: bearer-decorated calls that re-authorize on 401
//! - **Redirect guard**: path-only redirects

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
